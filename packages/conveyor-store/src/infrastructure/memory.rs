//! In-memory adapter for deterministic tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;

use crate::error::{Result, StorageError};
use crate::StateStore;

/// Map-backed [`StateStore`]. Behaves like [`FsStateStore`](super::FsStateStore)
/// minus the filesystem: whole-record replace, sorted key listing, and the
/// not-found/corrupted distinction (corruption can be injected for tests).
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    records: Mutex<BTreeMap<(String, String), Record>>,
}

#[derive(Debug, Clone)]
enum Record {
    Value(serde_json::Value),
    /// Simulates an unreadable on-disk record.
    Corrupted,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a record as corrupted so reads fail with `Corrupted`. Test hook.
    pub fn corrupt(&self, collection: &str, key: &str) {
        self.records.lock().insert(
            (collection.to_string(), key.to_string()),
            Record::Corrupted,
        );
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn put(&self, collection: &str, key: &str, value: serde_json::Value) -> Result<()> {
        self.records.lock().insert(
            (collection.to_string(), key.to_string()),
            Record::Value(value),
        );
        Ok(())
    }

    async fn get(&self, collection: &str, key: &str) -> Result<serde_json::Value> {
        let records = self.records.lock();
        match records.get(&(collection.to_string(), key.to_string())) {
            Some(Record::Value(value)) => Ok(value.clone()),
            Some(Record::Corrupted) => Err(StorageError::corrupted(format!(
                "Unreadable record {}/{}",
                collection, key
            ))),
            None => Err(StorageError::record_not_found(collection, key)),
        }
    }

    async fn exists(&self, collection: &str, key: &str) -> Result<bool> {
        Ok(self
            .records
            .lock()
            .contains_key(&(collection.to_string(), key.to_string())))
    }

    async fn list_keys(&self, collection: &str) -> Result<Vec<String>> {
        // BTreeMap iteration is already sorted.
        Ok(self
            .records
            .lock()
            .keys()
            .filter(|(c, _)| c == collection)
            .map(|(_, k)| k.clone())
            .collect())
    }

    async fn delete(&self, collection: &str, key: &str) -> Result<()> {
        self.records
            .lock()
            .remove(&(collection.to_string(), key.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_round_trip() {
        let store = MemoryStateStore::new();
        store
            .put("sessions", "s1", serde_json::json!({"x": 1}))
            .await
            .unwrap();

        let value = store.get("sessions", "s1").await.unwrap();
        assert_eq!(value["x"], 1);
    }

    #[tokio::test]
    async fn test_injected_corruption() {
        let store = MemoryStateStore::new();
        store.corrupt("sessions", "s1");

        let err = store.get("sessions", "s1").await.unwrap_err();
        assert!(err.is_corrupted());
        assert!(store.exists("sessions", "s1").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_keys_scoped_to_collection() {
        let store = MemoryStateStore::new();
        store.put("a", "k1", serde_json::json!(1)).await.unwrap();
        store.put("a", "k2", serde_json::json!(2)).await.unwrap();
        store.put("b", "k3", serde_json::json!(3)).await.unwrap();

        assert_eq!(store.list_keys("a").await.unwrap(), vec!["k1", "k2"]);
        assert_eq!(store.list_keys("b").await.unwrap(), vec!["k3"]);
    }
}
