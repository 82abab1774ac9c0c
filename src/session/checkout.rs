//! Save-then-navigate gate for leaving the app for checkout.
//!
//! The editor must await this before redirecting. If it fails, the redirect
//! must not happen: the snapshot is the only way back to the in-memory
//! history once the page unloads.

use super::store::SessionStore;
use crate::state::EditorState;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CheckoutBlocked {
    #[error("Could not save your current editing session. Please try again.")]
    SaveFailed,
}

/// Persist the editor state under (owner, session) before checkout.
///
/// An empty editor has nothing to lose and is allowed through.
pub async fn prepare_checkout(
    sessions: &SessionStore,
    owner_id: &str,
    session_id: &str,
    editor: &EditorState,
) -> Result<(), CheckoutBlocked> {
    let Some(draft) = editor.to_draft(owner_id, session_id) else {
        return Ok(());
    };

    if sessions.save(owner_id, session_id, draft).await {
        Ok(())
    } else {
        Err(CheckoutBlocked::SaveFailed)
    }
}
