/// Edit state module
///
/// This module handles the editing state and its persisted form:
/// - Self-describing encoded images (encoded.rs)
/// - The snapshot data model (snapshot.rs)
/// - Snapshot encoding, recompression and validation (codec.rs)
/// - The in-memory undo/redo history (editor.rs)

pub mod codec;
pub mod editor;
pub mod encoded;
pub mod snapshot;

pub use codec::{CodecError, EncodedSnapshot, InvalidSnapshot, SnapshotCodec};
pub use editor::EditorState;
pub use encoded::{EncodedImage, ImageDataError, ImageKind};
pub use snapshot::{EditMode, EditSnapshot, Hotspot, SnapshotDraft};
