/// Session persistence and restoration
///
/// This module handles keeping an edit session alive across a page unload:
/// - Snapshot CRUD keyed by (owner, session) with a latest pointer (store.rs)
/// - The restoration protocol after a checkout redirect (restore.rs)
/// - The save-then-navigate gate before checkout (checkout.rs)

pub mod checkout;
pub mod restore;
pub mod store;

pub use checkout::{prepare_checkout, CheckoutBlocked};
pub use restore::{
    RedirectReturn, RestorationOrchestrator, RestoreOutcome, RestoreSource, ReturnKind,
    SessionSelector,
};
pub use store::{SessionError, SessionStore, SessionSummary, LEGACY_SNAPSHOT_KEY};
