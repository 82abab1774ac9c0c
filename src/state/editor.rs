/// In-memory editing state
///
/// This is what the user is actually working on: a linear undo/redo history
/// of encoded images plus the pending tool state. Snapshots are taken from
/// it before risky transitions and restored back into it afterwards.

use super::encoded::EncodedImage;
use super::snapshot::{EditMode, EditSnapshot, Hotspot, SnapshotDraft};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EditorState {
    history: Vec<EncodedImage>,
    cursor: usize,
    pub mode: EditMode,
    pub prompt: String,
    pub hotspot: Option<Hotspot>,
}

impl EditorState {
    /// Start a fresh history from an uploaded image
    pub fn from_upload(image: EncodedImage) -> Self {
        Self {
            history: vec![image],
            cursor: 0,
            mode: EditMode::Retouch,
            prompt: String::new(),
            hotspot: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn history(&self) -> &[EncodedImage] {
        &self.history
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn current(&self) -> Option<&EncodedImage> {
        self.history.get(self.cursor)
    }

    pub fn original(&self) -> Option<&EncodedImage> {
        self.history.first()
    }

    pub fn can_undo(&self) -> bool {
        self.cursor > 0
    }

    pub fn can_redo(&self) -> bool {
        self.cursor + 1 < self.history.len()
    }

    /// Record a new edit result, discarding anything past the cursor
    pub fn push(&mut self, image: EncodedImage) {
        if !self.history.is_empty() {
            self.history.truncate(self.cursor + 1);
        }
        self.history.push(image);
        self.cursor = self.history.len() - 1;
        self.hotspot = None;
    }

    pub fn undo(&mut self) -> bool {
        if !self.can_undo() {
            return false;
        }
        self.cursor -= 1;
        self.hotspot = None;
        true
    }

    pub fn redo(&mut self) -> bool {
        if !self.can_redo() {
            return false;
        }
        self.cursor += 1;
        self.hotspot = None;
        true
    }

    /// Jump back to the original upload without dropping later edits
    pub fn reset(&mut self) {
        if !self.history.is_empty() {
            self.cursor = 0;
            self.hotspot = None;
        }
    }

    /// Codec input for the current state, or `None` with nothing loaded
    pub fn to_draft(&self, owner_id: &str, session_id: &str) -> Option<SnapshotDraft> {
        if self.history.is_empty() {
            return None;
        }
        Some(SnapshotDraft {
            history: self.history.clone(),
            cursor: self.cursor,
            hotspot: self.hotspot,
            mode: self.mode,
            prompt: self.prompt.clone(),
            session_id: session_id.to_string(),
            owner_id: owner_id.to_string(),
        })
    }

    /// Replace everything with a restored snapshot
    ///
    /// This is a wholesale replacement, not a merge. The cursor comes from
    /// the snapshot's history, never from its `current_image_data`.
    pub fn apply(&mut self, snapshot: EditSnapshot) {
        let cursor = snapshot
            .history_cursor
            .min(snapshot.history_sequence.len().saturating_sub(1));

        self.history = snapshot.history_sequence;
        self.cursor = cursor;
        self.mode = snapshot.active_mode;
        self.prompt = snapshot.pending_prompt_text;
        self.hotspot = snapshot.pending_hotspot;
    }
}
