//! Expiring, namespaced key-value store over a [`StorageMedium`].
//!
//! Every value is wrapped in a [`StoredEntry`], serialized to JSON and run
//! through [`scramble`](super::scramble) before it reaches the medium.
//! Reads self-heal: a record that cannot be unscrambled or parsed, or whose
//! expiry has passed, is deleted and reported as absent.
//!
//! Keys are prefixed with the configured namespace, so `clear` and
//! `sweep_expired` never touch foreign records sharing the medium.
//!
//! Writes are last-write-wins. There is no versioning or locking beyond the
//! mutex serializing access to the medium.

use chrono::Duration;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};

use super::scramble::{scramble, unscramble};
use super::{StorageMedium, StoreError};
use crate::clock::Clock;

/// Wrapper persisted around every value.
///
/// `expires_at` of `None` means the entry never expires by itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredEntry<T> {
    pub payload: T,
    pub stored_at: i64,
    pub expires_at: Option<i64>,
}

impl<T> StoredEntry<T> {
    pub fn is_expired(&self, now_ms: i64) -> bool {
        matches!(self.expires_at, Some(expires_at) if expires_at <= now_ms)
    }
}

pub struct DurableStore {
    medium: Mutex<Box<dyn StorageMedium>>,
    clock: Arc<dyn Clock>,
    namespace: String,
}

impl DurableStore {
    pub fn new(
        medium: impl StorageMedium + 'static,
        clock: Arc<dyn Clock>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            medium: Mutex::new(Box::new(medium)),
            clock,
            namespace: namespace.into(),
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Store `value` under `key`, expiring after `ttl` when given.
    ///
    /// Errors are returned, never raised further: callers treat persistence
    /// as best-effort and decide whether a failed write blocks them.
    pub fn put<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let now = self.clock.now_millis();
        let entry = StoredEntry {
            payload: value,
            stored_at: now,
            expires_at: ttl.map(|ttl| now + ttl.num_milliseconds()),
        };

        let raw = scramble(&serde_json::to_string(&entry)?);
        let full_key = self.full_key(key);

        match self.medium().write(&full_key, &raw) {
            Ok(()) => Ok(()),
            Err(err) => {
                tracing::warn!(key, bytes = raw.len(), error = %err, "durable write failed");
                Err(err)
            }
        }
    }

    /// Payload stored under `key`, or `None` when absent, expired or corrupt.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let full_key = self.full_key(key);
        let mut medium = self.medium();

        let raw = match medium.read(&full_key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(err) => {
                tracing::warn!(key, error = %err, "durable read failed");
                return None;
            }
        };

        let entry = match decode_entry::<serde_json::Value>(&raw) {
            Some(entry) => entry,
            None => {
                tracing::warn!(key, "dropping unreadable record");
                Self::delete_quietly(&mut **medium, &full_key);
                return None;
            }
        };

        if entry.is_expired(self.clock.now_millis()) {
            tracing::debug!(key, "dropping expired record");
            Self::delete_quietly(&mut **medium, &full_key);
            return None;
        }

        match serde_json::from_value(entry.payload) {
            Ok(payload) => Some(payload),
            Err(err) => {
                tracing::warn!(key, error = %err, "dropping record with unexpected payload");
                Self::delete_quietly(&mut **medium, &full_key);
                None
            }
        }
    }

    pub fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.medium().delete(&self.full_key(key))
    }

    /// Delete every record in this namespace, returning how many went.
    pub fn clear(&self) -> Result<usize, StoreError> {
        let mut medium = self.medium();
        let keys = medium.keys_with_prefix(&self.namespace)?;
        for key in &keys {
            medium.delete(key)?;
        }
        tracing::info!(removed = keys.len(), "cleared namespaced storage");
        Ok(keys.len())
    }

    /// Delete every expired or unreadable record in this namespace.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let mut medium = self.medium();

        let keys = match medium.keys_with_prefix(&self.namespace) {
            Ok(keys) => keys,
            Err(err) => {
                tracing::warn!(error = %err, "sweep could not list keys");
                return 0;
            }
        };

        let mut removed = 0;
        for key in keys {
            let stale = match medium.read(&key) {
                Ok(Some(raw)) => decode_entry::<serde::de::IgnoredAny>(&raw)
                    .map_or(true, |entry| entry.is_expired(now)),
                Ok(None) => false,
                Err(_) => false,
            };

            if stale {
                Self::delete_quietly(&mut **medium, &key);
                removed += 1;
            }
        }

        if removed > 0 {
            tracing::debug!(removed, "swept expired records");
        }
        removed
    }

    /// Whether a live (unexpired, readable) record exists under `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.get::<serde::de::IgnoredAny>(key).is_some()
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.namespace, key)
    }

    fn medium(&self) -> MutexGuard<'_, Box<dyn StorageMedium>> {
        self.medium.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn delete_quietly(medium: &mut dyn StorageMedium, full_key: &str) {
        if let Err(err) = medium.delete(full_key) {
            tracing::warn!(key = full_key, error = %err, "failed to delete record");
        }
    }
}

fn decode_entry<T: DeserializeOwned>(raw: &str) -> Option<StoredEntry<T>> {
    let json = unscramble(raw).ok()?;
    serde_json::from_str(&json).ok()
}

impl std::fmt::Debug for DurableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableStore")
            .field("namespace", &self.namespace)
            .finish()
    }
}
