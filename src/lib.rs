//! Edit-session preservation for the Pixshop photo editor.
//!
//! Keeps a user's whole undo/redo history alive across a full-page redirect
//! to an external checkout and back, partitioned by owner and session.

pub mod clock;
pub mod config;
pub mod credits;
pub mod error;
pub mod guard;
pub mod identity;
pub mod session;
pub mod state;
pub mod storage;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use credits::{CreditCache, CreditError};
pub use error::{Error, Result};
pub use guard::{
    sanitize_prompt, validate_upload, EditGuard, EditRejected, RateLimiter, UploadRejected,
};
pub use identity::IdentityRegistry;
pub use session::{
    prepare_checkout, CheckoutBlocked, RedirectReturn, RestorationOrchestrator, RestoreOutcome,
    RestoreSource, ReturnKind, SessionError, SessionSelector, SessionStore, SessionSummary,
};
pub use state::{
    EditMode, EditSnapshot, EditorState, EncodedImage, Hotspot, ImageKind, SnapshotDraft,
};
pub use storage::{DurableStore, MemoryMedium, SqliteMedium, StorageMedium, StoreError};
