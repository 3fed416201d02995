//! Domain layer for the conveyor state store
//!
//! The scheduler core shares exactly one mutable resource: the durable state
//! store. Everything the orchestrator and the worker pool persist — sessions,
//! work orders, pool snapshots — goes through the [`StateStore`] port as a
//! JSON record addressed by `(collection, key)`.
//!
//! # Record Model
//!
//! - A *collection* is a flat namespace (`"sessions"`, `"work_orders"`,
//!   `"pool_state"`).
//! - A *key* uniquely identifies one record within its collection.
//! - A record is a single JSON value, replaced whole on every write. There is
//!   no partial update; a reader never observes a half-written record.
//!
//! # Port Trait
//!
//! - [`StateStore`]: the storage abstraction injected into the core. Adapters
//!   live in `infrastructure` (filesystem, in-memory).
//!
//! # Examples
//!
//! ```rust,ignore
//! use conveyor_store::{StateStore, MemoryStateStore};
//!
//! async fn example(store: &dyn StateStore) -> conveyor_store::Result<()> {
//!     store.put("sessions", "pipeline-42", serde_json::json!({"status": "running"})).await?;
//!     let record = store.get("sessions", "pipeline-42").await?;
//!     assert_eq!(record["status"], "running");
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::{Result, StorageError};

/// Storage port for durable scheduler state.
///
/// All writes are whole-record replace-on-write. `get` distinguishes a record
/// that never existed (`RecordNotFound`) from one that exists but cannot be
/// read (`Corrupted`).
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Store a record, replacing any existing record with the same key.
    async fn put(&self, collection: &str, key: &str, value: serde_json::Value) -> Result<()>;

    /// Load a record.
    ///
    /// # Errors
    ///
    /// - `RecordNotFound` when no record exists under `(collection, key)`
    /// - `Corrupted` when a record exists but cannot be parsed
    async fn get(&self, collection: &str, key: &str) -> Result<serde_json::Value>;

    /// Check whether a record exists without reading it.
    async fn exists(&self, collection: &str, key: &str) -> Result<bool>;

    /// List all record keys in a collection, sorted ascending.
    ///
    /// A collection that was never written to is empty, not an error.
    async fn list_keys(&self, collection: &str) -> Result<Vec<String>>;

    /// Delete a record. Deleting a missing record is a no-op.
    async fn delete(&self, collection: &str, key: &str) -> Result<()>;
}

/// Typed convenience layer over [`StateStore`].
///
/// Records are serialized through `serde_json`; a record that deserializes
/// into the wrong shape surfaces as `Corrupted`, not `Serialization`, because
/// from the caller's perspective the persisted bytes are the problem.
#[async_trait]
pub trait StateStoreExt: StateStore {
    async fn put_record<T: Serialize + Sync>(
        &self,
        collection: &str,
        key: &str,
        record: &T,
    ) -> Result<()> {
        let value = serde_json::to_value(record)?;
        self.put(collection, key, value).await
    }

    async fn get_record<T: DeserializeOwned>(&self, collection: &str, key: &str) -> Result<T> {
        let value = self.get(collection, key).await?;
        serde_json::from_value(value).map_err(|e| {
            StorageError::corrupted(format!(
                "Record {}/{} has unexpected shape: {}",
                collection, key, e
            ))
            .with_source(e)
        })
    }
}

impl<S: StateStore + ?Sized> StateStoreExt for S {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::MemoryStateStore;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        count: u32,
    }

    #[tokio::test]
    async fn test_typed_round_trip() {
        let store = MemoryStateStore::new();
        let record = Sample {
            name: "analyze".to_string(),
            count: 3,
        };

        store
            .put_record("samples", "s1", &record)
            .await
            .unwrap();

        let loaded: Sample = store.get_record("samples", "s1").await.unwrap();
        assert_eq!(loaded, record);
    }

    #[tokio::test]
    async fn test_wrong_shape_is_corrupted() {
        let store = MemoryStateStore::new();
        store
            .put("samples", "s1", serde_json::json!({"unexpected": true}))
            .await
            .unwrap();

        let err = store.get_record::<Sample>("samples", "s1").await.unwrap_err();
        assert!(err.is_corrupted());
    }

    #[tokio::test]
    async fn test_missing_record_is_not_found() {
        let store = MemoryStateStore::new();
        let err = store.get("samples", "nope").await.unwrap_err();
        assert!(err.is_not_found());
    }
}
