//! Key-value storage backends for persisted preferences.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

use cloudstorage_common::{Error, Result};

/// Async string key-value store.
#[async_trait]
pub trait KeyValueStorage: Send + Sync {
    /// Read a value. Missing keys yield `None`.
    async fn get_item(&self, key: &str) -> Result<Option<String>>;

    async fn set_item(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a key. Removing a missing key is not an error.
    async fn remove_item(&self, key: &str) -> Result<()>;
}

/// In-memory storage, lost on drop.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: RwLock<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check whether a key is present.
    pub async fn contains(&self, key: &str) -> bool {
        self.items.read().await.contains_key(key)
    }
}

#[async_trait]
impl KeyValueStorage for MemoryStorage {
    async fn get_item(&self, key: &str) -> Result<Option<String>> {
        Ok(self.items.read().await.get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.items
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<()> {
        self.items.write().await.remove(key);
        Ok(())
    }
}

/// Storage backed by a single JSON object file.
///
/// Every write rewrites the whole file through a temporary file and a
/// rename, so a crash never leaves a half written file behind.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Storage file in the platform data directory.
    ///
    /// # Errors
    /// - `Storage` if the platform has no data directory
    pub fn default_location() -> Result<Self> {
        let dir = dirs::data_dir()
            .ok_or_else(|| Error::Storage("No data directory available".to_string()))?;
        Ok(Self::new(dir.join("cloudsync").join("preferences.json")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_map(&self) -> Result<Map<String, Value>> {
        let data = match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(e.into()),
        };
        if data.trim().is_empty() {
            return Ok(Map::new());
        }

        match serde_json::from_str(&data)? {
            Value::Object(map) => Ok(map),
            _ => Err(Error::Storage(format!(
                "{} does not contain a JSON object",
                self.path.display()
            ))),
        }
    }

    async fn write_map(&self, map: Map<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let data = serde_json::to_vec_pretty(&Value::Object(map))?;
        let temp = self
            .path
            .with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
        tokio::fs::write(&temp, data).await?;
        if let Err(e) = tokio::fs::rename(&temp, &self.path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e.into());
        }

        debug!("Wrote {}", self.path.display());
        Ok(())
    }
}

#[async_trait]
impl KeyValueStorage for FileStorage {
    async fn get_item(&self, key: &str) -> Result<Option<String>> {
        let map = self.read_map().await?;
        Ok(map.get(key).and_then(|v| v.as_str()).map(str::to_string))
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut map = self.read_map().await?;
        map.insert(key.to_string(), Value::String(value.to_string()));
        self.write_map(map).await
    }

    async fn remove_item(&self, key: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut map = self.read_map().await?;
        if map.remove(key).is_none() {
            return Ok(());
        }
        self.write_map(map).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_memory_storage() {
        let storage = MemoryStorage::new();
        assert_eq!(storage.get_item("a").await.unwrap(), None);

        storage.set_item("a", "1").await.unwrap();
        assert_eq!(storage.get_item("a").await.unwrap().as_deref(), Some("1"));

        storage.remove_item("a").await.unwrap();
        assert!(!storage.contains("a").await);
        storage.remove_item("a").await.unwrap();
    }

    #[tokio::test]
    async fn test_file_storage_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("prefs.json");

        let storage = FileStorage::new(&path);
        assert_eq!(storage.get_item("refs").await.unwrap(), None);
        storage.set_item("refs", "[]").await.unwrap();
        storage.set_item("other", "x").await.unwrap();

        let reopened = FileStorage::new(&path);
        assert_eq!(reopened.get_item("refs").await.unwrap().as_deref(), Some("[]"));
        assert_eq!(reopened.get_item("other").await.unwrap().as_deref(), Some("x"));

        reopened.remove_item("refs").await.unwrap();
        assert_eq!(storage.get_item("refs").await.unwrap(), None);

        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_file_storage_rejects_non_object() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("prefs.json");
        std::fs::write(&path, "[1, 2]").unwrap();

        let storage = FileStorage::new(&path);
        assert!(storage.get_item("refs").await.is_err());
    }
}
