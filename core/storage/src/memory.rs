//! In-memory client for testing.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use cloudstorage_common::{
    get_filename, CloudDirectory, CloudFile, CloudItem, Error, Provider, Result,
};

use crate::client::{
    byte_stream, Client, DownloadFileResult, ListOptions, ListResult, UploadFileOptions,
};

#[derive(Debug, Clone)]
struct Entry {
    data: Bytes,
    last_modified: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct State {
    files: BTreeMap<String, Entry>,
    clock: Option<DateTime<Utc>>,
}

impl State {
    /// Next modification timestamp, strictly after every one handed out before.
    fn tick(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let next = match self.clock {
            Some(last) if now <= last => last + Duration::milliseconds(1),
            _ => now,
        };
        self.clock = Some(next);
        next
    }
}

/// In-memory client.
///
/// Behaves like an object store: uploads create missing parent folders
/// implicitly and folders exist only while they contain files. All data is
/// lost on drop.
pub struct MemoryClient {
    provider: Provider,
    state: Arc<RwLock<State>>,
    page_size: Option<usize>,
    uploads: AtomicUsize,
}

impl MemoryClient {
    /// Create a new empty client pretending to be `provider`.
    pub fn new(provider: Provider) -> Self {
        Self {
            provider,
            state: Arc::new(RwLock::new(State::default())),
            page_size: None,
            uploads: AtomicUsize::new(0),
        }
    }

    /// Split listings into pages of `page_size` items.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size.max(1));
        self
    }

    /// Store a file without counting it as an upload.
    pub async fn insert_file(
        &self,
        path: &str,
        content: impl Into<Bytes>,
        last_modified: DateTime<Utc>,
    ) {
        let mut state = self.state.write().await;
        state.files.insert(
            normalize_key(path),
            Entry {
                data: content.into(),
                last_modified,
            },
        );
    }

    /// Current content of a file.
    pub async fn content(&self, path: &str) -> Option<Bytes> {
        let state = self.state.read().await;
        state.files.get(&normalize_key(path)).map(|e| e.data.clone())
    }

    /// Number of uploads performed through the client.
    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    fn cloud_file(key: &str, entry: &Entry) -> CloudFile {
        CloudFile {
            path: key.to_string(),
            name: get_filename(key).to_string(),
            last_modified: entry.last_modified,
        }
    }
}

fn normalize_key(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    format!("/{}", trimmed)
}

#[async_trait]
impl Client for MemoryClient {
    fn provider(&self) -> Provider {
        self.provider
    }

    async fn get_file_metadata(&self, path: &str) -> Result<CloudFile> {
        let key = normalize_key(path);
        let state = self.state.read().await;
        state
            .files
            .get(&key)
            .map(|entry| Self::cloud_file(&key, entry))
            .ok_or_else(|| Error::NotFound(format!("File not found: {}", path)))
    }

    async fn download_file(&self, path: &str) -> Result<DownloadFileResult> {
        let key = normalize_key(path);
        let state = self.state.read().await;
        let entry = state
            .files
            .get(&key)
            .ok_or_else(|| Error::NotFound(format!("File not found: {}", path)))?;

        Ok(DownloadFileResult {
            cloud_file: Self::cloud_file(&key, entry),
            response: byte_stream(entry.data.clone()),
        })
    }

    async fn upload_file(&self, options: UploadFileOptions) -> Result<CloudFile> {
        let key = normalize_key(&options.path);
        let mut state = self.state.write().await;

        if !options.overwrite && state.files.contains_key(&key) {
            return Err(Error::Conflict(format!("File already exists: {}", options.path)));
        }

        let entry = Entry {
            data: options.content,
            last_modified: state.tick(),
        };
        let cloud_file = Self::cloud_file(&key, &entry);
        state.files.insert(key, entry);
        self.uploads.fetch_add(1, Ordering::SeqCst);

        Ok(cloud_file)
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        let key = normalize_key(path);
        let mut state = self.state.write().await;
        state
            .files
            .remove(&key)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("File not found: {}", path)))
    }

    async fn list(&self, options: ListOptions) -> Result<ListResult> {
        let (dir, offset) = match options.cursor.as_deref() {
            Some(cursor) => {
                let (offset, dir) = cursor
                    .split_once(':')
                    .ok_or_else(|| Error::InvalidInput(format!("Invalid cursor: {}", cursor)))?;
                let offset = offset
                    .parse::<usize>()
                    .map_err(|_| Error::InvalidInput(format!("Invalid cursor: {}", cursor)))?;
                (dir.to_string(), offset)
            }
            None => (normalize_key(options.path.as_deref().unwrap_or("/")), 0),
        };

        let prefix = if dir == "/" {
            "/".to_string()
        } else {
            format!("{}/", dir)
        };

        let state = self.state.read().await;
        let mut items = Vec::new();
        let mut folders = BTreeSet::new();
        for (key, entry) in state.files.range(prefix.clone()..) {
            let Some(rest) = key.strip_prefix(&prefix) else {
                break;
            };
            match rest.split_once('/') {
                None => items.push(CloudItem::File(Self::cloud_file(key, entry))),
                Some((folder, _)) => {
                    if folders.insert(folder.to_string()) {
                        items.push(CloudItem::Directory(CloudDirectory {
                            path: format!("{}{}", prefix, folder),
                            name: folder.to_string(),
                        }));
                    }
                }
            }
        }

        let total = items.len();
        let page_size = self.page_size.unwrap_or(total.max(1));
        let items: Vec<CloudItem> = items.into_iter().skip(offset).take(page_size).collect();
        let next = offset + items.len();
        let has_more = next < total;

        Ok(ListResult {
            items,
            cursor: has_more.then(|| format!("{}:{}", next, dir)),
            has_more,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::collect_stream;
    use cloudstorage_common::ErrorKind;

    fn upload(path: &str, content: &'static str, overwrite: bool) -> UploadFileOptions {
        UploadFileOptions {
            path: path.to_string(),
            content: Bytes::from_static(content.as_bytes()),
            overwrite,
        }
    }

    #[tokio::test]
    async fn test_upload_and_download() {
        let client = MemoryClient::new(Provider::WebDAV);

        let file = client.upload_file(upload("/todo.txt", "x task", true)).await.unwrap();
        assert_eq!(file.path, "/todo.txt");
        assert_eq!(file.name, "todo.txt");

        let result = client.download_file("/todo.txt").await.unwrap();
        assert_eq!(result.cloud_file, file);
        let data = collect_stream(result.response).await.unwrap();
        assert_eq!(&data[..], b"x task");
    }

    #[tokio::test]
    async fn test_upload_without_overwrite_conflicts() {
        let client = MemoryClient::new(Provider::WebDAV);
        client.upload_file(upload("/todo.txt", "a", true)).await.unwrap();

        let err = client
            .upload_file(upload("/todo.txt", "b", false))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::Conflict));
        assert_eq!(client.upload_count(), 1);
    }

    #[tokio::test]
    async fn test_upload_timestamps_strictly_increase() {
        let client = MemoryClient::new(Provider::Dropbox);
        let first = client.upload_file(upload("/a.txt", "1", true)).await.unwrap();
        let second = client.upload_file(upload("/a.txt", "2", true)).await.unwrap();
        assert!(second.last_modified > first.last_modified);
    }

    #[tokio::test]
    async fn test_missing_file() {
        let client = MemoryClient::new(Provider::WebDAV);
        assert!(client.get_file_metadata("/nope.txt").await.unwrap_err().is_not_found());
        assert!(client.delete_file("/nope.txt").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_list_direct_children() {
        let client = MemoryClient::new(Provider::WebDAV);
        client.upload_file(upload("/todo.txt", "a", true)).await.unwrap();
        client.upload_file(upload("/Documents/done.txt", "b", true)).await.unwrap();
        client.upload_file(upload("/Documents/deep/x.txt", "c", true)).await.unwrap();

        let root = client.list(ListOptions::default()).await.unwrap();
        let names: Vec<&str> = root.items.iter().map(|i| i.name()).collect();
        assert_eq!(names, vec!["Documents", "todo.txt"]);
        assert!(!root.has_more);

        let docs = client.list(ListOptions::path("/Documents/")).await.unwrap();
        assert_eq!(docs.items.len(), 2);
        assert!(!docs.items[0].is_file());
        assert_eq!(docs.items[0].path(), "/Documents/deep");
        assert_eq!(docs.items[1].path(), "/Documents/done.txt");
    }

    #[tokio::test]
    async fn test_list_paging() {
        let client = MemoryClient::new(Provider::Dropbox).with_page_size(2);
        for name in ["/a.txt", "/b.txt", "/c.txt"] {
            client.upload_file(upload(name, "x", true)).await.unwrap();
        }

        let first = client.list(ListOptions::path("/")).await.unwrap();
        assert_eq!(first.items.len(), 2);
        assert!(first.has_more);

        let second = client
            .list(ListOptions::cursor(first.cursor.unwrap()))
            .await
            .unwrap();
        assert_eq!(second.items.len(), 1);
        assert_eq!(second.items[0].name(), "c.txt");
        assert!(!second.has_more);
        assert!(second.cursor.is_none());
    }
}
