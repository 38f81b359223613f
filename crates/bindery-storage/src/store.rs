//! The key-value store trait and the in-memory store.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use serde_json::Value;

use crate::error::Result;

/// A synchronous key-value store holding JSON values.
///
/// Implementations must be safe to share between threads. The typed,
/// task-returning API lives in [`Storage`](crate::Storage).
pub trait KeyValueStore: Send + Sync {
    /// Get the value stored under `key`.
    fn get_value(&self, key: &str) -> Result<Option<Value>>;

    /// Store `value` under `key`, replacing any previous value.
    fn set_value(&self, key: &str, value: Value) -> Result<()>;

    /// Remove `key`, returning the value it held.
    fn remove(&self, key: &str) -> Result<Option<Value>>;

    /// Check whether `key` holds a value.
    fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.get_value(key)?.is_some())
    }

    /// All stored keys, in sorted order.
    fn keys(&self) -> Result<Vec<String>>;
}

/// A process-local store. Nothing is persisted.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<BTreeMap<String, Value>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with `entries`.
    pub fn from_entries<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Self {
            data: RwLock::new(entries.into_iter().map(|(k, v)| (k.into(), v)).collect()),
        }
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Remove every key.
    pub fn clear(&self) {
        self.data.write().clear();
    }
}

impl KeyValueStore for MemoryStore {
    fn get_value(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.data.read().get(key).cloned())
    }

    fn set_value(&self, key: &str, value: Value) -> Result<()> {
        self.data.write().insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.data.write().remove(key))
    }

    fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.data.read().contains_key(key))
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.data.read().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_basic_get_set() {
        let store = MemoryStore::new();
        assert!(store.is_empty());

        store.set_value("volume", json!(7)).unwrap();
        assert_eq!(store.get_value("volume").unwrap(), Some(json!(7)));
        assert_eq!(store.get_value("missing").unwrap(), None);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_contains_and_remove() {
        let store = MemoryStore::from_entries([("a", json!(1)), ("b", json!("two"))]);
        assert!(store.contains("a").unwrap());
        assert_eq!(store.remove("a").unwrap(), Some(json!(1)));
        assert!(!store.contains("a").unwrap());
        assert_eq!(store.remove("a").unwrap(), None);
        assert_eq!(store.keys().unwrap(), vec!["b".to_string()]);

        store.clear();
        assert!(store.is_empty());
    }
}
