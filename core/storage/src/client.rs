//! Provider client trait definition.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{stream, Stream, StreamExt};
use std::fmt;
use std::pin::Pin;

use cloudstorage_common::{CloudFile, CloudFileRef, CloudItem, Provider, Result};

/// Byte stream type for downloaded content.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Wrap an in-memory payload as a [`ByteStream`].
pub fn byte_stream(data: Bytes) -> ByteStream {
    Box::pin(stream::once(async move { Ok(data) }))
}

/// Read a [`ByteStream`] to the end.
pub async fn collect_stream(mut stream: ByteStream) -> Result<Bytes> {
    let mut buffer = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        buffer.extend_from_slice(&chunk?);
    }
    Ok(buffer.freeze())
}

/// Downloaded file: its metadata and the not yet consumed content.
pub struct DownloadFileResult {
    pub cloud_file: CloudFile,
    pub response: ByteStream,
}

/// Options for [`Client::upload_file`].
#[derive(Debug, Clone)]
pub struct UploadFileOptions {
    /// Remote destination path.
    pub path: String,
    /// Complete file content.
    pub content: Bytes,
    /// Replace an existing file. When false, an existing file is a `Conflict`.
    pub overwrite: bool,
}

/// Options for [`Client::list`].
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub path: Option<String>,
    /// Continuation cursor from a previous page.
    pub cursor: Option<String>,
}

impl ListOptions {
    pub fn path(path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            cursor: None,
        }
    }

    pub fn cursor(cursor: impl Into<String>) -> Self {
        Self {
            path: None,
            cursor: Some(cursor.into()),
        }
    }
}

/// One page of a directory listing.
#[derive(Debug, Clone, Default)]
pub struct ListResult {
    pub items: Vec<CloudItem>,
    pub cursor: Option<String>,
    pub has_more: bool,
}

/// Options for a sync run.
#[derive(Debug, Clone)]
pub struct SyncFileOptions {
    /// Last known state of the remote file.
    pub cloud_ref: CloudFileRef,
    /// Current local content. `None` only checks for remote changes.
    pub content: Option<Bytes>,
}

/// The decision taken by a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOperation {
    Upload,
    Download,
    None,
}

impl fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Upload => write!(f, "upload"),
            Self::Download => write!(f, "download"),
            Self::None => write!(f, "none"),
        }
    }
}

/// Outcome of [`Client::sync_file`].
pub enum SyncFileResult {
    /// Local content was uploaded.
    Upload { cloud_file: CloudFile },
    /// Remote content is newer and has to be written locally.
    Download {
        cloud_file: CloudFile,
        response: ByteStream,
    },
    /// Nothing to do.
    None,
}

impl SyncFileResult {
    pub fn operation(&self) -> SyncOperation {
        match self {
            Self::Upload { .. } => SyncOperation::Upload,
            Self::Download { .. } => SyncOperation::Download,
            Self::None => SyncOperation::None,
        }
    }
}

impl fmt::Debug for SyncFileResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Upload { cloud_file } => f
                .debug_struct("Upload")
                .field("cloud_file", cloud_file)
                .finish(),
            Self::Download { cloud_file, .. } => f
                .debug_struct("Download")
                .field("cloud_file", cloud_file)
                .finish_non_exhaustive(),
            Self::None => write!(f, "None"),
        }
    }
}

/// Primitive remote operations every cloud storage backend implements.
///
/// Clients hold connection configuration only and are shared across
/// concurrent calls.
#[async_trait]
pub trait Client: Send + Sync {
    /// The backend this client talks to.
    fn provider(&self) -> Provider;

    /// Get metadata of a file.
    ///
    /// # Errors
    /// - `NotFound` if no file exists at `path`
    async fn get_file_metadata(&self, path: &str) -> Result<CloudFile>;

    /// Download a file. The content is returned as an unread stream.
    async fn download_file(&self, path: &str) -> Result<DownloadFileResult>;

    /// Upload a file and return its new metadata.
    ///
    /// # Errors
    /// - `Conflict` if `overwrite` is false and a file exists at the path
    async fn upload_file(&self, options: UploadFileOptions) -> Result<CloudFile>;

    /// Delete a file.
    async fn delete_file(&self, path: &str) -> Result<()>;

    /// List one page of a directory.
    async fn list(&self, options: ListOptions) -> Result<ListResult>;

    /// Reconcile a local file with its remote counterpart.
    ///
    /// Uses the shared timestamp/checksum reconciliation unless a provider
    /// overrides it.
    async fn sync_file(&self, options: SyncFileOptions) -> Result<SyncFileResult> {
        crate::sync_file::sync_file(self, options).await
    }
}
