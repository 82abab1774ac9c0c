/// Durable keyed storage
///
/// This module handles everything that touches the persistent medium:
/// - The medium abstraction and its in-memory implementation (medium.rs)
/// - The SQLite-backed medium (sqlite.rs)
/// - The reversible scrambling transform (scramble.rs)
/// - The expiring, namespaced key-value store on top (durable.rs)

pub mod durable;
pub mod medium;
pub mod scramble;
pub mod sqlite;

pub use durable::{DurableStore, StoredEntry};
pub use medium::{MemoryMedium, StorageMedium};
pub use sqlite::SqliteMedium;

/// Failures below the durable store boundary
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage quota exceeded: {needed} bytes needed, {available} available")]
    QuotaExceeded { needed: usize, available: usize },

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
