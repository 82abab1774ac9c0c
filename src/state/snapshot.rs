/// Edit-session snapshot data model
///
/// `EditSnapshot` is the unit of persisted state: the whole undo/redo
/// history of one editing session plus the UI state needed to resume it.
/// It is always replaced wholesale, never patched.

use serde::{Deserialize, Serialize};

use super::encoded::EncodedImage;

/// The editor's tool panels
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EditMode {
    /// Point-and-describe edits at a hotspot
    #[default]
    Retouch,
    Crop,
    Adjust,
    Filters,
}

/// A point in original-image pixel coordinates
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hotspot {
    pub x: u32,
    pub y: u32,
}

/// A validated, persisted edit session
///
/// `session_id` and `owner_id` are `None` only for snapshots written before
/// storage was partitioned by owner and session.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EditSnapshot {
    /// The active edit at save time (`history[cursor]` when saved)
    pub current_image_data: EncodedImage,

    /// First upload of the session (`history[0]` when saved)
    pub original_image_data: EncodedImage,

    /// Index 0 = original, last = newest
    pub history_sequence: Vec<EncodedImage>,

    /// Always `< history_sequence.len()`
    pub history_cursor: usize,

    pub pending_hotspot: Option<Hotspot>,
    pub active_mode: EditMode,
    pub pending_prompt_text: String,
    pub saved_at_epoch_millis: i64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
}

impl EditSnapshot {
    /// The image the cursor points at
    ///
    /// Restoration goes through the history, not `current_image_data`, since
    /// the two are not guaranteed to agree after a decode.
    pub fn cursor_image(&self) -> &EncodedImage {
        &self.history_sequence[self.history_cursor]
    }

    pub fn is_legacy(&self) -> bool {
        self.session_id.is_none() || self.owner_id.is_none()
    }
}

/// What the editor hands to the codec before a save
#[derive(Debug, Clone)]
pub struct SnapshotDraft {
    pub history: Vec<EncodedImage>,
    pub cursor: usize,
    pub hotspot: Option<Hotspot>,
    pub mode: EditMode,
    pub prompt: String,
    pub session_id: String,
    pub owner_id: String,
}
