//! Sync orchestration over the connected storages and the ref store.
//!
//! The manager is what front ends talk to: it resolves the storage behind a
//! local file through its ref, runs the facade operation and persists the
//! updated ref.

use bytes::Bytes;
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use cloudstorage_common::{CloudFile, CloudStorageError, Provider, Result, StoredRef};
use cloudstorage_storage::{
    CloudStorage, Content, ListOptions, ListResult, SyncFileOptions, SyncOperation, SyncResult,
    UploadOptions,
};

use crate::preferences::CloudPreferences;

/// Outcome of syncing one local file.
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub identifier: String,
    pub operation: SyncOperation,
    /// The ref after the sync.
    pub cloud_ref: StoredRef,
    /// New local content, present only for downloads.
    pub content: Option<Content>,
}

/// Per-file result of [`SyncManager::sync_all`].
#[derive(Debug)]
pub struct FileSyncReport {
    pub identifier: String,
    pub result: Result<SyncOutcome>,
}

/// Orchestrates sync for a set of connected storages.
pub struct SyncManager {
    storages: RwLock<Vec<CloudStorage>>,
    preferences: Arc<CloudPreferences>,
}

impl SyncManager {
    pub fn new(preferences: Arc<CloudPreferences>) -> Self {
        Self {
            storages: RwLock::new(Vec::new()),
            preferences,
        }
    }

    pub fn preferences(&self) -> &CloudPreferences {
        &self.preferences
    }

    /// Connect a storage, replacing any storage of the same provider.
    pub async fn add_storage(&self, storage: CloudStorage) {
        let mut storages = self.storages.write().await;
        storages.retain(|s| s.provider() != storage.provider());
        info!("Connected {}", storage.provider());
        storages.push(storage);
    }

    /// Disconnect a provider and forget every ref that belongs to it.
    pub async fn remove_storage(&self, provider: Provider) -> Result<()> {
        self.storages
            .write()
            .await
            .retain(|s| s.provider() != provider);
        let removed = self.preferences.remove_refs(provider).await?;
        info!("Disconnected {} ({} refs removed)", provider, removed);
        Ok(())
    }

    /// The storage of a connected provider.
    ///
    /// # Errors
    /// - `CloudStorageError` "No storage found for provider" if not connected
    pub async fn storage(&self, provider: Provider) -> Result<CloudStorage> {
        self.storages
            .read()
            .await
            .iter()
            .find(|s| s.provider() == provider)
            .cloned()
            .ok_or_else(|| {
                CloudStorageError::new(
                    provider,
                    None,
                    format!("No storage found for provider: {}", provider),
                )
                .into()
            })
    }

    /// Connected providers, in connection order.
    pub async fn providers(&self) -> Vec<Provider> {
        self.storages.read().await.iter().map(|s| s.provider()).collect()
    }

    /// List one page of a remote directory.
    pub async fn list(
        &self,
        provider: Provider,
        path: Option<&str>,
        cursor: Option<&str>,
    ) -> Result<ListResult> {
        let storage = self.storage(provider).await?;
        let options = ListOptions {
            path: path.map(str::to_string),
            cursor: cursor.map(str::to_string),
        };
        Ok(storage.list(options).await?)
    }

    /// Enable sync for a local file by uploading it.
    pub async fn upload_file(
        &self,
        identifier: &str,
        provider: Provider,
        remote_path: &str,
        content: Bytes,
    ) -> Result<StoredRef> {
        let storage = self.storage(provider).await?;
        let cloud_ref = storage
            .upload_file(UploadOptions::new(remote_path, content))
            .await?;
        info!("Uploaded {} to {} {}", identifier, provider, cloud_ref.path);
        self.preferences.set_ref(identifier, cloud_ref).await
    }

    /// Enable sync for a local file by downloading its remote counterpart.
    ///
    /// Returns the content the local file has to be written with.
    pub async fn download_file(
        &self,
        identifier: &str,
        provider: Provider,
        remote_path: &str,
    ) -> Result<Content> {
        let storage = self.storage(provider).await?;
        let download = storage.download_file(remote_path).await?;
        info!("Downloaded {} {} to {}", provider, remote_path, identifier);
        self.preferences.set_ref(identifier, download.cloud_ref).await?;
        Ok(download.content)
    }

    /// Current remote metadata of a synced file.
    pub async fn get_metadata(&self, identifier: &str) -> Result<CloudFile> {
        let stored = self.preferences.get_ref(identifier).await?;
        let storage = self.storage(stored.cloud_ref.provider).await?;
        Ok(storage.get_metadata(&stored.cloud_ref.path).await?)
    }

    /// Sync one local file.
    ///
    /// `content` is the current local content. Without it only remote
    /// changes are picked up. The ref is persisted unless nothing changed.
    pub async fn sync_file(&self, identifier: &str, content: Option<Bytes>) -> Result<SyncOutcome> {
        let stored = self.preferences.get_ref(identifier).await?;
        let storage = self.storage(stored.cloud_ref.provider).await?;

        let result = storage
            .sync_file(SyncFileOptions {
                cloud_ref: stored.cloud_ref,
                content,
            })
            .await?;

        let operation = result.operation();
        let (cloud_ref, content) = match result {
            SyncResult::None { cloud_ref } => {
                debug!("{} is in sync", identifier);
                (
                    StoredRef {
                        identifier: identifier.to_string(),
                        cloud_ref,
                    },
                    None,
                )
            }
            SyncResult::Upload { cloud_ref } => {
                info!("Uploaded local changes of {}", identifier);
                (self.preferences.set_ref(identifier, cloud_ref).await?, None)
            }
            SyncResult::Download { cloud_ref, content } => {
                info!("Downloaded remote changes of {}", identifier);
                (
                    self.preferences.set_ref(identifier, cloud_ref).await?,
                    Some(content),
                )
            }
        };

        Ok(SyncOutcome {
            identifier: identifier.to_string(),
            operation,
            cloud_ref,
            content,
        })
    }

    /// Sync several local files concurrently.
    ///
    /// Files without a ref are skipped. A failure of one file does not stop
    /// the others.
    pub async fn sync_all(&self, files: Vec<(String, Option<Bytes>)>) -> Result<Vec<FileSyncReport>> {
        let mut pending = Vec::new();
        for (identifier, content) in files {
            if self.preferences.find_ref(&identifier).await?.is_some() {
                pending.push((identifier, content));
            } else {
                debug!("Skipping {}: sync not enabled", identifier);
            }
        }

        let syncs = pending.into_iter().map(|(identifier, content)| async move {
            let result = self.sync_file(&identifier, content).await;
            FileSyncReport { identifier, result }
        });
        Ok(join_all(syncs).await)
    }

    /// Delete the remote file behind a ref and disable sync for it.
    pub async fn delete_file(&self, identifier: &str) -> Result<()> {
        let stored = self.preferences.get_ref(identifier).await?;
        let storage = self.storage(stored.cloud_ref.provider).await?;
        storage.delete_file(&stored.cloud_ref.path).await?;
        info!("Deleted {} {}", stored.cloud_ref.provider, stored.cloud_ref.path);
        self.preferences.remove_ref(identifier).await
    }

    /// Disable sync for a local file, leaving the remote file alone.
    pub async fn unlink_file(&self, identifier: &str) -> Result<()> {
        self.preferences.remove_ref(identifier).await
    }

    pub async fn is_sync_enabled(&self, identifier: &str) -> Result<bool> {
        Ok(self.preferences.find_ref(identifier).await?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryStorage;
    use chrono::Duration;
    use cloudstorage_common::{Error, ErrorKind};
    use cloudstorage_storage::{Client, MemoryClient};

    struct Fixture {
        client: Arc<MemoryClient>,
        manager: SyncManager,
    }

    async fn fixture() -> Fixture {
        let preferences = Arc::new(CloudPreferences::new(Arc::new(MemoryStorage::new())));
        let client = Arc::new(MemoryClient::new(Provider::WebDAV));
        let manager = SyncManager::new(preferences);
        manager.add_storage(CloudStorage::new(client.clone())).await;
        Fixture { client, manager }
    }

    fn bytes(s: &'static str) -> Bytes {
        Bytes::from_static(s.as_bytes())
    }

    #[tokio::test]
    async fn test_fresh_upload_enables_sync() {
        let Fixture { client, manager } = fixture().await;

        let stored = manager
            .upload_file("/home/me/todo.txt", Provider::WebDAV, "/todo.txt", bytes("x done"))
            .await
            .unwrap();

        assert_eq!(stored.identifier, "/home/me/todo.txt");
        assert_eq!(stored.cloud_ref.path, "/todo.txt");
        assert!(manager.is_sync_enabled("/home/me/todo.txt").await.unwrap());
        assert_eq!(client.content("/todo.txt").await.unwrap(), "x done");

        let outcome = manager
            .sync_file("/home/me/todo.txt", Some(bytes("x done")))
            .await
            .unwrap();
        assert_eq!(outcome.operation, SyncOperation::None);
        assert_eq!(client.upload_count(), 1);
    }

    #[tokio::test]
    async fn test_remote_deleted_out_of_band_is_restored() {
        let Fixture { client, manager } = fixture().await;
        manager
            .upload_file("todo", Provider::WebDAV, "/todo.txt", bytes("a"))
            .await
            .unwrap();
        client.delete_file("/todo.txt").await.unwrap();

        let outcome = manager.sync_file("todo", Some(bytes("a"))).await.unwrap();
        assert_eq!(outcome.operation, SyncOperation::Upload);
        assert_eq!(client.content("/todo.txt").await.unwrap(), "a");
    }

    #[tokio::test]
    async fn test_conflicting_edits_prefer_newer_remote() {
        let Fixture { client, manager } = fixture().await;
        let stored = manager
            .upload_file("todo", Provider::WebDAV, "/todo.txt", bytes("v1"))
            .await
            .unwrap();

        let remote_edit = stored.cloud_ref.last_modified + Duration::seconds(30);
        client.insert_file("/todo.txt", "v2 remote", remote_edit).await;

        let outcome = manager.sync_file("todo", Some(bytes("v1 local"))).await.unwrap();
        assert_eq!(outcome.operation, SyncOperation::Download);
        assert_eq!(outcome.content.unwrap().text().unwrap(), "v2 remote");

        let persisted = manager.preferences().get_ref("todo").await.unwrap();
        assert_eq!(persisted.cloud_ref.last_modified, remote_edit);
    }

    #[tokio::test]
    async fn test_download_enables_sync() {
        let Fixture { client, manager } = fixture().await;
        client
            .insert_file("/done.txt", "x 2024-01-01 task", chrono::Utc::now())
            .await;

        let content = manager
            .download_file("done", Provider::WebDAV, "/done.txt")
            .await
            .unwrap();
        assert_eq!(content.text().unwrap(), "x 2024-01-01 task");
        assert!(manager.is_sync_enabled("done").await.unwrap());
    }

    #[tokio::test]
    async fn test_sync_all_skips_unlinked_files() {
        let Fixture { manager, .. } = fixture().await;
        manager
            .upload_file("a", Provider::WebDAV, "/a.txt", bytes("a"))
            .await
            .unwrap();
        manager
            .upload_file("b", Provider::WebDAV, "/b.txt", bytes("b"))
            .await
            .unwrap();

        let reports = manager
            .sync_all(vec![
                ("a".to_string(), Some(bytes("a changed"))),
                ("b".to_string(), Some(bytes("b"))),
                ("c".to_string(), Some(bytes("c"))),
            ])
            .await
            .unwrap();

        assert_eq!(reports.len(), 2);
        let a = reports.iter().find(|r| r.identifier == "a").unwrap();
        assert_eq!(a.result.as_ref().unwrap().operation, SyncOperation::Upload);
        let b = reports.iter().find(|r| r.identifier == "b").unwrap();
        assert_eq!(b.result.as_ref().unwrap().operation, SyncOperation::None);
    }

    #[tokio::test]
    async fn test_delete_and_unlink() {
        let Fixture { client, manager } = fixture().await;
        manager
            .upload_file("a", Provider::WebDAV, "/a.txt", bytes("a"))
            .await
            .unwrap();
        manager
            .upload_file("b", Provider::WebDAV, "/b.txt", bytes("b"))
            .await
            .unwrap();

        manager.delete_file("a").await.unwrap();
        assert!(client.content("/a.txt").await.is_none());
        assert!(!manager.is_sync_enabled("a").await.unwrap());

        manager.unlink_file("b").await.unwrap();
        assert!(client.content("/b.txt").await.is_some());
        assert!(!manager.is_sync_enabled("b").await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_provider() {
        let Fixture { manager, .. } = fixture().await;
        let err = manager
            .upload_file("a", Provider::Dropbox, "/a.txt", bytes("a"))
            .await
            .unwrap_err();
        let Error::CloudStorage(err) = err else {
            panic!("expected CloudStorageError");
        };
        assert_eq!(err.provider, Provider::Dropbox);
        assert_eq!(err.message(), "No storage found for provider: Dropbox");
    }

    #[tokio::test]
    async fn test_remove_storage_drops_refs() {
        let Fixture { manager, .. } = fixture().await;
        manager
            .upload_file("a", Provider::WebDAV, "/a.txt", bytes("a"))
            .await
            .unwrap();

        manager.remove_storage(Provider::WebDAV).await.unwrap();
        assert!(manager.providers().await.is_empty());
        assert!(manager.preferences().get_refs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sync_without_ref_fails() {
        let Fixture { manager, .. } = fixture().await;
        let err = manager.sync_file("nope", None).await.unwrap_err();
        assert!(matches!(err, Error::RefNotFound(_)));
    }

    #[tokio::test]
    async fn test_facade_errors_keep_kind() {
        let Fixture { client, manager } = fixture().await;
        manager
            .upload_file("a", Provider::WebDAV, "/a.txt", bytes("a"))
            .await
            .unwrap();
        client.delete_file("/a.txt").await.unwrap();

        let err = manager.get_metadata("a").await.unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::NotFound));
    }
}
