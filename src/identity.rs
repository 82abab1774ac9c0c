//! Owner identity and liveness sessions.
//!
//! The owner id is minted once per browser profile and never expires. The
//! liveness session is separate: it has an 8-hour hard lifetime and a
//! 30-minute inactivity window, and gates only new edit requests. A stored
//! snapshot can outlive the liveness session and still be restored.

use chrono::Duration;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::sync::Arc;

use crate::config::Config;
use crate::storage::{DurableStore, StoreError};

pub const OWNER_ID_KEY: &str = "owner-id";
pub const LIVENESS_TOKEN_KEY: &str = "liveness-token";
pub const LIVENESS_ACTIVITY_KEY: &str = "liveness-activity";

pub struct IdentityRegistry {
    store: Arc<DurableStore>,
    liveness_lifetime: Duration,
    inactivity_window: Duration,
}

impl IdentityRegistry {
    pub fn new(store: Arc<DurableStore>, config: &Config) -> Self {
        Self {
            store,
            liveness_lifetime: config.liveness_lifetime,
            inactivity_window: config.inactivity_window,
        }
    }

    /// The stable owner id for this browser profile, minted on first use.
    ///
    /// If the new id cannot be persisted it is still returned, but the next
    /// call will mint a different one.
    pub fn owner_id(&self) -> String {
        if let Some(owner_id) = self.store.get::<String>(OWNER_ID_KEY) {
            return owner_id;
        }

        let owner_id = mint_token("user", self.store.clock().now_millis());
        match self.store.put(OWNER_ID_KEY, &owner_id, None) {
            Ok(()) => tracing::info!(owner_id = %owner_id, "minted new owner id"),
            Err(err) => tracing::warn!(error = %err, "owner id could not be persisted"),
        }
        owner_id
    }

    /// A fresh editing-session id; one per image upload, never reused.
    pub fn new_session_id(&self) -> String {
        mint_token("session", self.store.clock().now_millis())
    }

    /// Make sure a liveness token exists and stamp activity now.
    pub fn initialize_liveness_session(&self) -> Result<(), StoreError> {
        if self.store.get::<String>(LIVENESS_TOKEN_KEY).is_none() {
            let token = mint_token("live", self.store.clock().now_millis());
            self.store
                .put(LIVENESS_TOKEN_KEY, &token, Some(self.liveness_lifetime))?;
            tracing::debug!("started liveness session");
        }
        self.touch_activity()
    }

    /// Re-stamp last activity. Call on every user-initiated action.
    pub fn touch_activity(&self) -> Result<(), StoreError> {
        let now = self.store.clock().now_millis();
        self.store
            .put(LIVENESS_ACTIVITY_KEY, &now, Some(self.liveness_lifetime))
    }

    /// True while a token exists and the last activity is inside the window.
    pub fn is_live(&self) -> bool {
        if self.store.get::<String>(LIVENESS_TOKEN_KEY).is_none() {
            return false;
        }
        match self.store.get::<i64>(LIVENESS_ACTIVITY_KEY) {
            Some(last_activity) => {
                let idle = self.store.clock().now_millis() - last_activity;
                idle <= self.inactivity_window.num_milliseconds()
            }
            None => false,
        }
    }

    /// Hard reset: drop the liveness session and every namespaced record,
    /// owner id and stored snapshots included.
    pub fn end_session(&self) -> Result<(), StoreError> {
        self.store.remove(LIVENESS_TOKEN_KEY)?;
        self.store.remove(LIVENESS_ACTIVITY_KEY)?;
        self.store.clear()?;
        Ok(())
    }
}

/// `<prefix>_<16 random lowercase alphanumerics>_<timestamp base36>`
fn mint_token(prefix: &str, now_ms: i64) -> String {
    let random: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(|c| char::from(c).to_ascii_lowercase())
        .collect();

    format!("{}_{}_{}", prefix, random, to_base36(now_ms.max(0) as u64))
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::MemoryMedium;

    fn registry() -> (IdentityRegistry, Arc<DurableStore>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let store = Arc::new(DurableStore::new(MemoryMedium::new(), clock.clone(), "t:"));
        let registry = IdentityRegistry::new(store.clone(), &Config::default());
        (registry, store, clock)
    }

    #[test]
    fn test_owner_id_is_idempotent() {
        let (registry, store, clock) = registry();
        let first = registry.owner_id();
        assert!(first.starts_with("user_"));

        for _ in 0..5 {
            clock.advance(Duration::days(30));
            // A fresh registry over the same store simulates a reload
            let reloaded = IdentityRegistry::new(store.clone(), &Config::default());
            assert_eq!(reloaded.owner_id(), first);
        }
    }

    #[test]
    fn test_session_ids_are_unique() {
        let (registry, _, _) = registry();
        let a = registry.new_session_id();
        let b = registry.new_session_id();
        assert!(a.starts_with("session_"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_liveness_inactivity_window() {
        let (registry, _, clock) = registry();
        assert!(!registry.is_live());

        registry.initialize_liveness_session().unwrap();
        assert!(registry.is_live());

        clock.advance(Duration::minutes(29));
        registry.touch_activity().unwrap();
        clock.advance(Duration::minutes(29));
        assert!(registry.is_live());

        clock.advance(Duration::minutes(2));
        assert!(!registry.is_live());
    }

    #[test]
    fn test_liveness_hard_lifetime() {
        let (registry, _, clock) = registry();
        registry.initialize_liveness_session().unwrap();

        // Keep touching, but the token itself dies after 8 hours
        for _ in 0..17 {
            clock.advance(Duration::minutes(29));
            registry.touch_activity().unwrap();
        }
        assert!(!registry.is_live());
    }

    #[test]
    fn test_end_session_is_a_hard_reset() {
        let (registry, store, _) = registry();
        let owner = registry.owner_id();
        registry.initialize_liveness_session().unwrap();
        store.put("credits-remaining", &5u32, None).unwrap();

        registry.end_session().unwrap();

        assert!(!registry.is_live());
        assert!(!store.contains("credits-remaining"));
        assert_ne!(registry.owner_id(), owner);
    }

    #[test]
    fn test_base36() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
    }
}
