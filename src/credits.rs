/// Per-browser cache of the remaining edit credits
///
/// The ledger of record lives on the payment backend. This cache only lets
/// the editor show a balance and refuse edits without a round trip; after a
/// checkout return the caller overwrites it with the ledger's value.

use chrono::Duration;
use std::sync::Arc;

use crate::config::Config;
use crate::storage::{DurableStore, StoreError};

pub const CREDITS_KEY: &str = "credits-remaining";

#[derive(Debug, thiserror::Error)]
pub enum CreditError {
    #[error("No credits remaining. Purchase more to continue editing.")]
    Exhausted,

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct CreditCache {
    store: Arc<DurableStore>,
    ttl: Duration,
    initial: u32,
}

impl CreditCache {
    pub fn new(store: Arc<DurableStore>, config: &Config) -> Self {
        Self {
            store,
            ttl: config.credit_cache_ttl,
            initial: config.initial_credits,
        }
    }

    /// Cached balance, or the initial grant when nothing is cached
    pub fn balance(&self) -> u32 {
        self.store.get::<u32>(CREDITS_KEY).unwrap_or(self.initial)
    }

    pub fn set(&self, credits: u32) -> Result<(), StoreError> {
        self.store.put(CREDITS_KEY, &credits, Some(self.ttl))
    }

    /// Spend one credit after a successful edit; returns what is left
    pub fn consume_one(&self) -> Result<u32, CreditError> {
        let remaining = self
            .balance()
            .checked_sub(1)
            .ok_or(CreditError::Exhausted)?;
        self.set(remaining)?;
        Ok(remaining)
    }

    /// Overwrite the cache with the backend's authoritative balance
    pub fn replace_from_ledger(&self, credits: u32) -> Result<(), StoreError> {
        tracing::info!(credits, "credit balance refreshed from ledger");
        self.set(credits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::MemoryMedium;

    fn cache() -> (CreditCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let store = Arc::new(DurableStore::new(MemoryMedium::new(), clock.clone(), "t:"));
        (CreditCache::new(store, &Config::default()), clock)
    }

    #[test]
    fn test_defaults_to_initial_grant() {
        let (cache, _) = cache();
        assert_eq!(cache.balance(), 3);
    }

    #[test]
    fn test_consume_until_exhausted() {
        let (cache, _) = cache();
        assert_eq!(cache.consume_one().unwrap(), 2);
        assert_eq!(cache.consume_one().unwrap(), 1);
        assert_eq!(cache.consume_one().unwrap(), 0);
        assert!(matches!(cache.consume_one(), Err(CreditError::Exhausted)));
        assert_eq!(cache.balance(), 0);
    }

    #[test]
    fn test_ledger_value_wins_and_expires() {
        let (cache, clock) = cache();
        cache.consume_one().unwrap();
        cache.replace_from_ledger(53).unwrap();
        assert_eq!(cache.balance(), 53);

        clock.advance(Duration::minutes(1440));
        assert_eq!(cache.balance(), 3);
    }
}
