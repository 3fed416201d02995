//! Filesystem adapter: one JSON file per record.
//!
//! Layout: `<root>/<collection>/<key>.json`. Every write goes to a `.tmp`
//! sibling first and is then renamed over the target, so a concurrent reader
//! never observes a half-written record. The store assumes a single writer
//! per record (the orchestrator's single-writer session rule); it does not
//! take multi-writer locks.

use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{Result, StorageError};
use crate::StateStore;

/// File-backed [`StateStore`].
#[derive(Debug, Clone)]
pub struct FsStateStore {
    root: PathBuf,
}

impl FsStateStore {
    /// Create a store rooted at `root`. The directory is created on first
    /// write; a missing root on read behaves as an empty store.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, collection: &str, key: &str) -> Result<PathBuf> {
        validate_segment(collection)?;
        validate_segment(key)?;
        Ok(self.root.join(collection).join(format!("{}.json", key)))
    }
}

/// Collection and key names become path segments; reject anything that could
/// escape the store root.
fn validate_segment(segment: &str) -> Result<()> {
    if segment.is_empty() {
        return Err(StorageError::config("Empty collection or key name"));
    }
    if segment.contains(['/', '\\']) || segment == "." || segment == ".." {
        return Err(StorageError::config(format!(
            "Invalid collection or key name: {:?}",
            segment
        )));
    }
    Ok(())
}

#[async_trait]
impl StateStore for FsStateStore {
    async fn put(&self, collection: &str, key: &str, value: serde_json::Value) -> Result<()> {
        let path = self.record_path(collection, key)?;
        let dir = path.parent().expect("record path always has a parent");
        std::fs::create_dir_all(dir)?;

        let body = serde_json::to_string_pretty(&value)?;

        // Replace-on-write: temp file in the same directory, then rename.
        let tmp = path.with_extension("json.tmp");
        {
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(body.as_bytes())?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, &path)?;

        tracing::debug!(
            collection,
            key,
            path = %path.display(),
            "state record written"
        );
        Ok(())
    }

    async fn get(&self, collection: &str, key: &str) -> Result<serde_json::Value> {
        let path = self.record_path(collection, key)?;

        let body = match std::fs::read_to_string(&path) {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::record_not_found(collection, key));
            }
            Err(e) => {
                // The record exists but cannot be read: corrupted, not missing.
                return Err(StorageError::corrupted(format!(
                    "Unreadable record {}: {}",
                    path.display(),
                    e
                ))
                .with_source(e));
            }
        };

        serde_json::from_str(&body).map_err(|e| {
            StorageError::corrupted(format!("Invalid JSON in {}: {}", path.display(), e))
                .with_source(e)
        })
    }

    async fn exists(&self, collection: &str, key: &str) -> Result<bool> {
        let path = self.record_path(collection, key)?;
        Ok(path.is_file())
    }

    async fn list_keys(&self, collection: &str) -> Result<Vec<String>> {
        validate_segment(collection)?;
        let dir = self.root.join(collection);

        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().map_or(false, |ext| ext == "json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    keys.push(stem.to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, collection: &str, key: &str) -> Result<()> {
        let path = self.record_path(collection, key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, FsStateStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStateStore::new(dir.path());
        (dir, store)
    }

    #[tokio::test]
    async fn test_put_get_round_trip() {
        let (_dir, store) = store();

        store
            .put("sessions", "pipeline-1", serde_json::json!({"status": "running"}))
            .await
            .unwrap();

        let value = store.get("sessions", "pipeline-1").await.unwrap();
        assert_eq!(value["status"], "running");
    }

    #[tokio::test]
    async fn test_put_replaces_whole_record() {
        let (_dir, store) = store();

        store
            .put("sessions", "s1", serde_json::json!({"a": 1, "b": 2}))
            .await
            .unwrap();
        store
            .put("sessions", "s1", serde_json::json!({"a": 3}))
            .await
            .unwrap();

        let value = store.get("sessions", "s1").await.unwrap();
        assert_eq!(value, serde_json::json!({"a": 3}));
    }

    #[tokio::test]
    async fn test_missing_record_is_not_found() {
        let (_dir, store) = store();
        let err = store.get("sessions", "nope").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_garbage_file_is_corrupted() {
        let (dir, store) = store();

        let collection_dir = dir.path().join("sessions");
        std::fs::create_dir_all(&collection_dir).unwrap();
        std::fs::write(collection_dir.join("bad.json"), "{ not json").unwrap();

        let err = store.get("sessions", "bad").await.unwrap_err();
        assert!(err.is_corrupted());
        assert!(!err.is_not_found());
    }

    #[tokio::test]
    async fn test_no_tmp_file_left_behind() {
        let (dir, store) = store();

        store
            .put("orders", "WO-001", serde_json::json!({"item": "ITEM-1"}))
            .await
            .unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("orders"))
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .filter(|name| name.ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_list_keys_sorted() {
        let (_dir, store) = store();

        for key in ["WO-003", "WO-001", "WO-002"] {
            store
                .put("orders", key, serde_json::json!({}))
                .await
                .unwrap();
        }

        let keys = store.list_keys("orders").await.unwrap();
        assert_eq!(keys, vec!["WO-001", "WO-002", "WO-003"]);
    }

    #[tokio::test]
    async fn test_list_keys_missing_collection_is_empty() {
        let (_dir, store) = store();
        let keys = store.list_keys("never_written").await.unwrap();
        assert!(keys.is_empty());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (_dir, store) = store();

        store
            .put("sessions", "s1", serde_json::json!({}))
            .await
            .unwrap();
        store.delete("sessions", "s1").await.unwrap();
        store.delete("sessions", "s1").await.unwrap();

        assert!(!store.exists("sessions", "s1").await.unwrap());
    }

    #[tokio::test]
    async fn test_path_escape_rejected() {
        let (_dir, store) = store();
        let err = store
            .put("..", "escape", serde_json::json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::ErrorKind::Config);

        let err = store
            .put("sessions", "../escape", serde_json::json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::ErrorKind::Config);
    }

    #[tokio::test]
    async fn test_readable_by_fresh_store_instance() {
        let (dir, store) = store();

        store
            .put("sessions", "s1", serde_json::json!({"mode": "greenfield"}))
            .await
            .unwrap();

        // A different store instance over the same root sees the record.
        let other = FsStateStore::new(dir.path());
        let value = other.get("sessions", "s1").await.unwrap();
        assert_eq!(value["mode"], "greenfield");
    }
}
