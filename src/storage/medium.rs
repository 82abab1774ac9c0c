use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use super::StoreError;

/// The raw string-to-string medium under the durable store
///
/// Implementations know nothing about namespaces, expiry or scrambling;
/// they only hold whatever strings they are given. Only `DurableStore`
/// talks to a medium.
pub trait StorageMedium: Send {
    /// Read the raw record stored under `key`
    fn read(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write (or overwrite) the raw record under `key`
    fn write(&mut self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Delete `key`; deleting a missing key is not an error
    fn delete(&mut self, key: &str) -> Result<(), StoreError>;

    /// Every key starting with `prefix`
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}

/// In-memory medium with an optional byte quota
///
/// Clones share the same map, so a test can keep a handle and inspect or
/// corrupt records behind the store's back, the way a user could poke at
/// browser storage.
#[derive(Debug, Clone, Default)]
pub struct MemoryMedium {
    entries: Arc<Mutex<BTreeMap<String, String>>>,
    quota_bytes: Option<usize>,
}

impl MemoryMedium {
    pub fn new() -> Self {
        Self::default()
    }

    /// A medium that refuses writes once keys + values exceed `quota_bytes`
    ///
    /// A quota of 0 behaves like disabled storage.
    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            entries: Arc::default(),
            quota_bytes: Some(quota_bytes),
        }
    }

    /// Number of records, foreign ones included
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl StorageMedium for MemoryMedium {
    fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.lock().get(key).cloned())
    }

    fn write(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.lock();

        if let Some(quota) = self.quota_bytes {
            let used: usize = entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            let needed = key.len() + value.len();
            let available = quota.saturating_sub(used);
            if needed > available {
                return Err(StoreError::QuotaExceeded { needed, available });
            }
        }

        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<(), StoreError> {
        self.lock().remove(key);
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .lock()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_records() {
        let medium = MemoryMedium::new();
        let mut handle = medium.clone();
        handle.write("a", "1").unwrap();

        assert_eq!(medium.read("a").unwrap().as_deref(), Some("1"));
        assert_eq!(medium.len(), 1);
    }

    #[test]
    fn test_quota_rejects_oversized_write() {
        let mut medium = MemoryMedium::with_quota(8);
        medium.write("k", "1234").unwrap();

        let err = medium.write("j", "123456789").unwrap_err();
        assert!(matches!(err, StoreError::QuotaExceeded { .. }));

        // Overwriting the same key does not count its old value twice
        medium.write("k", "1234567").unwrap();
    }

    #[test]
    fn test_prefix_listing() {
        let mut medium = MemoryMedium::new();
        medium.write("ns:a", "1").unwrap();
        medium.write("ns:b", "2").unwrap();
        medium.write("other", "3").unwrap();

        assert_eq!(medium.keys_with_prefix("ns:").unwrap(), vec!["ns:a", "ns:b"]);
    }
}
