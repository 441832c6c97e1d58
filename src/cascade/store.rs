//! Durable queue storage.
//!
//! The engine keeps its whole queue in a single key. Stores deal in raw JSON
//! documents so that decoding (and dropping malformed rows) stays in one place.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use super::lock::mutex_lock;

const SOURCE: &str = "cascade::store";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("stored document is not valid json: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("database error: {0}")]
    Database(String),
    #[error("invalid store key `{0}`")]
    InvalidKey(String),
}

/// Cross-request persistence slot for the queue.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Load the raw document under `key`; `None` when the key is absent.
    async fn load(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Overwrite the document under `key`.
    async fn save(&self, key: &str, document: Value) -> Result<(), StoreError>;

    /// Remove `key`. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// In-process store, used for tests and single-process deployments.
#[derive(Default)]
pub struct MemoryQueueStore {
    documents: Mutex<HashMap<String, Value>>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Synchronous peek for assertions and status output.
    pub fn get(&self, key: &str) -> Option<Value> {
        mutex_lock(&self.documents, SOURCE, "get").get(key).cloned()
    }

    /// Synchronous seed, bypassing the engine.
    pub fn put(&self, key: &str, document: Value) {
        mutex_lock(&self.documents, SOURCE, "put").insert(key.to_string(), document);
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn load(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.get(key))
    }

    async fn save(&self, key: &str, document: Value) -> Result<(), StoreError> {
        self.put(key, document);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        mutex_lock(&self.documents, SOURCE, "delete").remove(key);
        Ok(())
    }
}

/// One JSON file per key inside a directory.
///
/// Writes go to a sibling temp file first and are renamed into place, so a
/// reader never observes a half-written document.
#[derive(Debug, Clone)]
pub struct FileQueueStore {
    directory: PathBuf,
}

impl FileQueueStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
            && !key.starts_with('.');
        if !valid {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.directory.join(format!("{key}.json")))
    }
}

#[async_trait]
impl QueueStore for FileQueueStore {
    async fn load(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn save(&self, key: &str, document: Value) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        tokio::fs::create_dir_all(&self.directory).await?;

        let temp = path.with_extension("json.tmp");
        tokio::fs::write(&temp, serde_json::to_vec(&document)?).await?;
        tokio::fs::rename(&temp, &path).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn memory_store_roundtrip() {
        let store = MemoryQueueStore::new();
        assert!(store.load("queue").await.unwrap().is_none());

        store.save("queue", json!([1, 2])).await.unwrap();
        assert_eq!(store.load("queue").await.unwrap(), Some(json!([1, 2])));

        store.delete("queue").await.unwrap();
        assert!(store.load("queue").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_store_persists_and_deletes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileQueueStore::new(dir.path().join("state"));

        assert!(store.load("cascade_queue").await.unwrap().is_none());

        let document = json!([{ "slug": "object_cache", "expires": 10, "delay": 10 }]);
        store.save("cascade_queue", document.clone()).await.unwrap();
        assert_eq!(store.load("cascade_queue").await.unwrap(), Some(document));
        assert!(dir.path().join("state/cascade_queue.json").exists());

        store.delete("cascade_queue").await.unwrap();
        store.delete("cascade_queue").await.unwrap();
        assert!(store.load("cascade_queue").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_store_rejects_path_like_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileQueueStore::new(dir.path());

        let err = store.save("../escape", json!([])).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidKey(_)));
    }

    #[tokio::test]
    async fn file_store_reports_corrupt_documents() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("cascade_queue.json"), b"{not json").unwrap();
        let store = FileQueueStore::new(dir.path());

        let err = store.load("cascade_queue").await.unwrap_err();
        assert!(matches!(err, StoreError::Decode(_)));
    }
}
