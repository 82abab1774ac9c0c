//! Snapshot persistence keyed by (owner, session).
//!
//! Logical layout inside the durable store:
//!
//! ```text
//! edit-session:{owner}:{session}  -> EditSnapshot      (snapshot TTL)
//! latest-session:{owner}          -> session id        (snapshot TTL)
//! session-index:{owner}           -> [session id, ..]  (snapshot TTL, oldest save first)
//! edit-session                    -> legacy single-slot snapshot (read only)
//! ```
//!
//! The per-owner index keeps enumeration proportional to the owner's own
//! sessions instead of scanning every key in the medium. Saving beyond the
//! retention cap evicts the least recently saved sessions.

use chrono::Duration;
use serde::Serialize;
use std::sync::Arc;

use crate::config::Config;
use crate::state::{
    CodecError, EditMode, EditSnapshot, EncodedImage, EncodedSnapshot, SnapshotCodec,
    SnapshotDraft,
};
use crate::storage::{DurableStore, StoreError};

/// Single well-known key from before storage was partitioned
pub const LEGACY_SNAPSHOT_KEY: &str = "edit-session";

pub fn snapshot_key(owner_id: &str, session_id: &str) -> String {
    format!("edit-session:{}:{}", owner_id, session_id)
}

pub fn pointer_key(owner_id: &str) -> String {
    format!("latest-session:{}", owner_id)
}

pub fn index_key(owner_id: &str) -> String {
    format!("session-index:{}", owner_id)
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("could not encode snapshot: {0}")]
    Codec(#[from] CodecError),

    #[error("could not persist snapshot: {0}")]
    Store(#[from] StoreError),
}

/// One row of a "recent sessions" listing
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    pub saved_at_epoch_millis: i64,
    pub history_len: usize,
    pub active_mode: EditMode,
    pub preview: EncodedImage,
}

impl SessionSummary {
    fn from_snapshot(snapshot: &EditSnapshot) -> Option<Self> {
        Some(Self {
            session_id: snapshot.session_id.clone()?,
            saved_at_epoch_millis: snapshot.saved_at_epoch_millis,
            history_len: snapshot.history_sequence.len(),
            active_mode: snapshot.active_mode,
            preview: snapshot.cursor_image().clone(),
        })
    }
}

pub struct SessionStore {
    store: Arc<DurableStore>,
    codec: SnapshotCodec,
    snapshot_ttl: Duration,
    retention_cap: usize,
}

impl SessionStore {
    pub fn new(store: Arc<DurableStore>, config: &Config) -> Self {
        Self::with_codec(store, SnapshotCodec::from_config(config), config)
    }

    pub fn with_codec(store: Arc<DurableStore>, codec: SnapshotCodec, config: &Config) -> Self {
        Self {
            store,
            codec,
            snapshot_ttl: config.snapshot_ttl,
            retention_cap: config.retention_cap.max(1),
        }
    }

    pub fn codec(&self) -> &SnapshotCodec {
        &self.codec
    }

    /// Encode and persist, reporting only success.
    ///
    /// A `false` here means the caller must not go ahead with anything that
    /// would lose the in-memory state (such as leaving for checkout).
    pub async fn save(&self, owner_id: &str, session_id: &str, draft: SnapshotDraft) -> bool {
        match self.try_save(owner_id, session_id, draft).await {
            Ok(encoded) => {
                tracing::info!(
                    owner_id,
                    session_id,
                    bytes = encoded.serialized_len,
                    passes = encoded.passes,
                    "saved edit session"
                );
                true
            }
            Err(err) => {
                tracing::warn!(owner_id, session_id, error = %err, "edit session not saved");
                false
            }
        }
    }

    /// Encode and persist, with the failure reason.
    pub async fn try_save(
        &self,
        owner_id: &str,
        session_id: &str,
        mut draft: SnapshotDraft,
    ) -> Result<EncodedSnapshot, SessionError> {
        draft.owner_id = owner_id.to_string();
        draft.session_id = session_id.to_string();

        let now = self.store.clock().now_millis();
        let encoded = self.codec.encode(draft, now).await?;

        let ttl = Some(self.snapshot_ttl);
        self.store
            .put(&snapshot_key(owner_id, session_id), &encoded.snapshot, ttl)?;
        self.store.put(&pointer_key(owner_id), &session_id, ttl)?;

        let mut index = self.index(owner_id);
        index.retain(|id| id != session_id);
        index.push(session_id.to_string());

        let overflow = index.len().saturating_sub(self.retention_cap);
        for evicted in index.drain(..overflow) {
            tracing::debug!(owner_id, session_id = %evicted, "evicting session past retention cap");
            self.store.remove(&snapshot_key(owner_id, &evicted))?;
        }
        self.store.put(&index_key(owner_id), &index, ttl)?;

        Ok(encoded)
    }

    /// The snapshot saved under exactly (owner, session), if still valid.
    pub fn load_by_session(&self, owner_id: &str, session_id: &str) -> Option<EditSnapshot> {
        let candidate = self
            .store
            .get::<serde_json::Value>(&snapshot_key(owner_id, session_id))?;

        let snapshot = self.validate(candidate, &format!("{}:{}", owner_id, session_id))?;

        // Ids are embedded in the key, but ':' inside an id could alias two keys
        let owner_matches = snapshot.owner_id.as_deref().map_or(true, |id| id == owner_id);
        let session_matches = snapshot
            .session_id
            .as_deref()
            .map_or(true, |id| id == session_id);
        if !owner_matches || !session_matches {
            tracing::warn!(owner_id, session_id, "snapshot ids do not match its key");
            return None;
        }
        Some(snapshot)
    }

    /// The most recently saved session for `owner_id`.
    pub fn load_latest(&self, owner_id: &str) -> Option<EditSnapshot> {
        let session_id = self.latest_session_id(owner_id)?;
        self.load_by_session(owner_id, &session_id)
    }

    pub fn latest_session_id(&self, owner_id: &str) -> Option<String> {
        self.store.get::<String>(&pointer_key(owner_id))
    }

    /// The pre-partitioning single-slot snapshot.
    pub fn load_legacy(&self) -> Option<EditSnapshot> {
        let candidate = self.store.get::<serde_json::Value>(LEGACY_SNAPSHOT_KEY)?;
        self.validate(candidate, LEGACY_SNAPSHOT_KEY)
    }

    /// Delete one session, and the latest pointer if it pointed there.
    pub fn remove(&self, owner_id: &str, session_id: &str) -> Result<(), StoreError> {
        self.store.remove(&snapshot_key(owner_id, session_id))?;

        if self.latest_session_id(owner_id).as_deref() == Some(session_id) {
            self.store.remove(&pointer_key(owner_id))?;
        }

        let mut index = self.index(owner_id);
        let before = index.len();
        index.retain(|id| id != session_id);
        if index.len() != before {
            self.write_index(owner_id, &index)?;
        }
        Ok(())
    }

    /// Every valid snapshot for `owner_id`, newest first, capped at the
    /// retention limit.
    pub fn list_all(&self, owner_id: &str) -> Vec<EditSnapshot> {
        let mut snapshots: Vec<EditSnapshot> = self
            .index(owner_id)
            .iter()
            .filter_map(|session_id| self.load_by_session(owner_id, session_id))
            .collect();

        snapshots.sort_by(|a, b| b.saved_at_epoch_millis.cmp(&a.saved_at_epoch_millis));
        snapshots.truncate(self.retention_cap);
        snapshots
    }

    pub fn summaries(&self, owner_id: &str) -> Vec<SessionSummary> {
        self.list_all(owner_id)
            .iter()
            .filter_map(SessionSummary::from_snapshot)
            .collect()
    }

    /// Drop index entries (and the pointer) whose snapshots are gone.
    ///
    /// Reads self-heal lazily, so this is only about bounding growth.
    /// Returns how many sessions were pruned.
    pub fn sweep_expired_for_owner(&self, owner_id: &str) -> usize {
        let index = self.index(owner_id);
        let live: Vec<String> = index
            .iter()
            .filter(|session_id| self.store.contains(&snapshot_key(owner_id, session_id)))
            .cloned()
            .collect();
        let pruned = index.len() - live.len();

        if let Some(latest) = self.latest_session_id(owner_id) {
            if !live.contains(&latest) {
                if let Err(err) = self.store.remove(&pointer_key(owner_id)) {
                    tracing::warn!(owner_id, error = %err, "could not drop stale latest pointer");
                }
            }
        }

        if pruned > 0 {
            if let Err(err) = self.write_index(owner_id, &live) {
                tracing::warn!(owner_id, error = %err, "could not rewrite session index");
            }
            tracing::debug!(owner_id, pruned, "swept expired sessions");
        }
        pruned
    }

    fn index(&self, owner_id: &str) -> Vec<String> {
        self.store
            .get::<Vec<String>>(&index_key(owner_id))
            .unwrap_or_default()
    }

    fn write_index(&self, owner_id: &str, index: &[String]) -> Result<(), StoreError> {
        if index.is_empty() {
            return self.store.remove(&index_key(owner_id));
        }
        self.store
            .put(&index_key(owner_id), &index, Some(self.snapshot_ttl))
    }

    fn validate(&self, candidate: serde_json::Value, label: &str) -> Option<EditSnapshot> {
        let now = self.store.clock().now_millis();
        match self.codec.decode(candidate, now) {
            Ok(snapshot) => Some(snapshot),
            Err(reason) => {
                tracing::debug!(key = label, %reason, "ignoring unusable snapshot");
                None
            }
        }
    }
}
