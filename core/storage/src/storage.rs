//! Provider independent storage facade.
//!
//! Wraps a [`Client`] and turns raw transfers into sync refs: every
//! upload and download computes the content checksum and stamps `last_sync`.
//! All failures surface as [`CloudStorageError`] carrying the provider and the
//! remote path of the failed operation.

use bytes::Bytes;
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use tracing::error;

use cloudstorage_common::{
    create_checksum, CloudFile, CloudFileRef, CloudStorageError, Error, Provider, Result,
};

use crate::client::{
    collect_stream, Client, ListOptions, ListResult, SyncFileOptions, SyncFileResult,
    SyncOperation, UploadFileOptions,
};

/// Result type of the facade.
pub type StorageResult<T> = std::result::Result<T, CloudStorageError>;

/// Fully buffered file content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Content(Bytes);

impl Content {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// Raw bytes.
    pub fn bytes(&self) -> &Bytes {
        &self.0
    }

    /// Content decoded as UTF-8.
    ///
    /// # Errors
    /// - `InvalidInput` if the content is not valid UTF-8
    pub fn text(&self) -> Result<&str> {
        std::str::from_utf8(&self.0)
            .map_err(|e| Error::InvalidInput(format!("Content is not valid UTF-8: {}", e)))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Options for [`CloudStorage::upload_file`].
#[derive(Debug, Clone)]
pub struct UploadOptions {
    pub path: String,
    pub content: Bytes,
    pub overwrite: bool,
}

impl UploadOptions {
    /// Upload replacing any existing file.
    pub fn new(path: impl Into<String>, content: impl Into<Bytes>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            overwrite: true,
        }
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }
}

/// A downloaded file and the ref describing it.
#[derive(Debug, Clone)]
pub struct Download {
    pub cloud_ref: CloudFileRef,
    pub content: Content,
}

/// Outcome of [`CloudStorage::sync_file`]. Every variant carries the
/// updated ref.
#[derive(Debug, Clone)]
pub enum SyncResult {
    None { cloud_ref: CloudFileRef },
    Upload { cloud_ref: CloudFileRef },
    Download { cloud_ref: CloudFileRef, content: Content },
}

impl SyncResult {
    pub fn operation(&self) -> SyncOperation {
        match self {
            Self::None { .. } => SyncOperation::None,
            Self::Upload { .. } => SyncOperation::Upload,
            Self::Download { .. } => SyncOperation::Download,
        }
    }

    pub fn cloud_ref(&self) -> &CloudFileRef {
        match self {
            Self::None { cloud_ref }
            | Self::Upload { cloud_ref }
            | Self::Download { cloud_ref, .. } => cloud_ref,
        }
    }

    /// Downloaded content, present only for `Download`.
    pub fn content(&self) -> Option<&Content> {
        match self {
            Self::Download { content, .. } => Some(content),
            _ => None,
        }
    }
}

/// Arguments that name the remote path an operation works on.
pub trait OperationTarget {
    fn target_path(&self) -> Option<&str>;
}

impl OperationTarget for str {
    fn target_path(&self) -> Option<&str> {
        Some(self)
    }
}

impl<T: OperationTarget + ?Sized> OperationTarget for &T {
    fn target_path(&self) -> Option<&str> {
        (**self).target_path()
    }
}

impl OperationTarget for UploadOptions {
    fn target_path(&self) -> Option<&str> {
        Some(&self.path)
    }
}

impl OperationTarget for SyncFileOptions {
    fn target_path(&self) -> Option<&str> {
        Some(&self.cloud_ref.path)
    }
}

impl OperationTarget for ListOptions {
    fn target_path(&self) -> Option<&str> {
        self.path.as_deref()
    }
}

/// Storage facade over one provider client.
#[derive(Clone)]
pub struct CloudStorage {
    client: Arc<dyn Client>,
}

impl CloudStorage {
    pub fn new(client: Arc<dyn Client>) -> Self {
        Self { client }
    }

    pub fn provider(&self) -> Provider {
        self.client.provider()
    }

    /// The wrapped client.
    pub fn client(&self) -> &Arc<dyn Client> {
        &self.client
    }

    /// Download a file and build a fresh ref for it.
    pub async fn download_file(&self, path: &str) -> StorageResult<Download> {
        self.op(path, |path| self.download(path)).await
    }

    /// Upload a file and build a fresh ref for it.
    ///
    /// # Errors
    /// - `Conflict` if `overwrite` is false and the file exists
    pub async fn upload_file(&self, options: UploadOptions) -> StorageResult<CloudFileRef> {
        self.op(options, |options| self.upload(options)).await
    }

    /// Get metadata of a remote file.
    pub async fn get_metadata(&self, path: &str) -> StorageResult<CloudFile> {
        self.op(path, |path| self.client.get_file_metadata(path)).await
    }

    /// Delete a remote file.
    pub async fn delete_file(&self, path: &str) -> StorageResult<()> {
        self.op(path, |path| self.client.delete_file(path)).await
    }

    /// Reconcile local content with the remote file behind `cloud_ref`.
    pub async fn sync_file(&self, options: SyncFileOptions) -> StorageResult<SyncResult> {
        self.op(options, |options| self.sync(options)).await
    }

    /// List one page of a remote directory.
    pub async fn list(&self, options: ListOptions) -> StorageResult<ListResult> {
        self.op(options, |options| self.client.list(options)).await
    }

    /// Run an operation, attaching provider and path context to any failure.
    async fn op<A, T, F, Fut>(&self, args: A, f: F) -> StorageResult<T>
    where
        A: OperationTarget,
        F: FnOnce(A) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let path = args.target_path().map(str::to_string);
        f(args).await.map_err(|e| {
            error!(
                "CloudStorage {} ({}) failed: {}",
                self.provider(),
                path.as_deref().unwrap_or(""),
                e
            );
            CloudStorageError::wrap(self.provider(), path, e)
        })
    }

    async fn download(&self, path: &str) -> Result<Download> {
        let result = self.client.download_file(path).await?;
        let content = collect_stream(result.response).await?;
        let checksum = create_checksum(&content);

        Ok(Download {
            cloud_ref: CloudFileRef::new(result.cloud_file, self.provider(), Some(checksum)),
            content: Content(content),
        })
    }

    async fn upload(&self, options: UploadOptions) -> Result<CloudFileRef> {
        let checksum = create_checksum(&options.content);
        let cloud_file = self
            .client
            .upload_file(UploadFileOptions {
                path: options.path,
                content: options.content,
                overwrite: options.overwrite,
            })
            .await?;

        Ok(CloudFileRef::new(cloud_file, self.provider(), Some(checksum)))
    }

    async fn sync(&self, options: SyncFileOptions) -> Result<SyncResult> {
        let cloud_ref = options.cloud_ref.clone();
        let content = options.content.clone();
        let result = self.client.sync_file(options).await?;

        match result {
            SyncFileResult::None => Ok(SyncResult::None {
                cloud_ref: CloudFileRef {
                    last_sync: Utc::now(),
                    ..cloud_ref
                },
            }),
            SyncFileResult::Upload { cloud_file } => {
                let checksum = content
                    .map(|content| create_checksum(&content))
                    .or_else(|| cloud_ref.checksum.clone());
                let cloud_ref = CloudFileRef {
                    checksum,
                    last_sync: Utc::now(),
                    ..cloud_ref.with_cloud_file(cloud_file)
                };
                Ok(SyncResult::Upload { cloud_ref })
            }
            SyncFileResult::Download {
                cloud_file,
                response,
            } => {
                let data = collect_stream(response).await?;
                let cloud_ref = CloudFileRef {
                    checksum: Some(create_checksum(&data)),
                    last_sync: Utc::now(),
                    ..cloud_ref.with_cloud_file(cloud_file)
                };
                Ok(SyncResult::Download {
                    cloud_ref,
                    content: Content(data),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryClient;
    use chrono::{Duration, TimeZone};
    use cloudstorage_common::ErrorKind;

    fn storage() -> (Arc<MemoryClient>, CloudStorage) {
        let client = Arc::new(MemoryClient::new(Provider::WebDAV));
        let storage = CloudStorage::new(client.clone());
        (client, storage)
    }

    #[tokio::test]
    async fn test_upload_download_round_trip() {
        let (_, storage) = storage();

        let uploaded = storage
            .upload_file(UploadOptions::new("/todo.txt", "(A) call mom"))
            .await
            .unwrap();
        assert_eq!(uploaded.provider, Provider::WebDAV);
        assert_eq!(uploaded.checksum.as_deref(), Some(create_checksum("(A) call mom").as_str()));

        let downloaded = storage.download_file("/todo.txt").await.unwrap();
        assert_eq!(downloaded.content.text().unwrap(), "(A) call mom");
        assert_eq!(downloaded.cloud_ref.checksum, uploaded.checksum);
        assert_eq!(downloaded.cloud_ref.last_modified, uploaded.last_modified);
    }

    #[tokio::test]
    async fn test_upload_defaults_to_overwrite() {
        let (client, storage) = storage();
        storage.upload_file(UploadOptions::new("/a.txt", "1")).await.unwrap();
        storage.upload_file(UploadOptions::new("/a.txt", "2")).await.unwrap();
        assert_eq!(client.content("/a.txt").await.unwrap(), "2");

        let err = storage
            .upload_file(UploadOptions::new("/a.txt", "3").overwrite(false))
            .await
            .unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::Conflict));
        assert_eq!(err.path.as_deref(), Some("/a.txt"));
    }

    #[tokio::test]
    async fn test_errors_carry_context() {
        let (_, storage) = storage();
        let err = storage.get_metadata("/missing.txt").await.unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::NotFound));
        assert_eq!(err.provider, Provider::WebDAV);
        assert_eq!(err.path.as_deref(), Some("/missing.txt"));
        assert!(err.source.is_some());
    }

    #[tokio::test]
    async fn test_sync_error_uses_ref_path() {
        let (_, storage) = storage();
        let cloud_ref = CloudFileRef::new(
            CloudFile {
                path: "/gone.txt".to_string(),
                name: "gone.txt".to_string(),
                last_modified: Utc::now(),
            },
            Provider::WebDAV,
            None,
        );
        let err = storage
            .sync_file(SyncFileOptions {
                cloud_ref,
                content: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::NotFound));
        assert_eq!(err.path.as_deref(), Some("/gone.txt"));
    }

    #[tokio::test]
    async fn test_sync_noop_refreshes_last_sync() {
        let (client, storage) = storage();
        let mut cloud_ref = storage
            .upload_file(UploadOptions::new("/todo.txt", "task"))
            .await
            .unwrap();
        cloud_ref.last_sync = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();

        let result = storage
            .sync_file(SyncFileOptions {
                cloud_ref: cloud_ref.clone(),
                content: Some(Bytes::from_static(b"task")),
            })
            .await
            .unwrap();

        assert_eq!(result.operation(), SyncOperation::None);
        assert!(result.cloud_ref().last_sync > cloud_ref.last_sync);
        assert_eq!(result.cloud_ref().checksum, cloud_ref.checksum);
        assert_eq!(client.upload_count(), 1);
    }

    #[tokio::test]
    async fn test_sync_upload_updates_checksum() {
        let (_, storage) = storage();
        let cloud_ref = storage
            .upload_file(UploadOptions::new("/todo.txt", "task"))
            .await
            .unwrap();

        let result = storage
            .sync_file(SyncFileOptions {
                cloud_ref: cloud_ref.clone(),
                content: Some(Bytes::from_static(b"task\nnew task")),
            })
            .await
            .unwrap();

        assert_eq!(result.operation(), SyncOperation::Upload);
        let updated = result.cloud_ref();
        assert_eq!(updated.checksum, Some(create_checksum("task\nnew task")));
        assert!(updated.last_modified > cloud_ref.last_modified);
    }

    #[tokio::test]
    async fn test_sync_download_returns_content() {
        let (client, storage) = storage();
        let cloud_ref = storage
            .upload_file(UploadOptions::new("/todo.txt", "old"))
            .await
            .unwrap();

        let edited = cloud_ref.last_modified + Duration::minutes(1);
        client.insert_file("/todo.txt", "edited elsewhere", edited).await;

        let result = storage
            .sync_file(SyncFileOptions {
                cloud_ref,
                content: Some(Bytes::from_static(b"old")),
            })
            .await
            .unwrap();

        assert_eq!(result.operation(), SyncOperation::Download);
        assert_eq!(result.content().unwrap().text().unwrap(), "edited elsewhere");
        assert_eq!(result.cloud_ref().last_modified, edited);
        assert_eq!(result.cloud_ref().checksum, Some(create_checksum("edited elsewhere")));
    }

    #[tokio::test]
    async fn test_list_wraps_client() {
        let (_, storage) = storage();
        storage.upload_file(UploadOptions::new("/a.txt", "a")).await.unwrap();
        let page = storage.list(ListOptions::default()).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].name(), "a.txt");
    }

    #[test]
    fn test_content_text() {
        let content = Content::new(vec![0xff, 0xfe]);
        assert!(content.text().is_err());
        assert_eq!(content.len(), 2);
        assert_eq!(Content::new("x").text().unwrap(), "x");
    }
}
