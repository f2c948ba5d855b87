//! WebDAV client implementation.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use futures::StreamExt;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop};

use cloudstorage_common::{get_filename, CloudFile, CloudItem, Error, Provider, Result};
use cloudstorage_storage::{
    handle_response_errors, Client, DownloadFileResult, ListOptions, ListResult,
    UploadFileOptions,
};

use crate::dav::{parse_xml, prepare_item};
use crate::path::{
    decode_path, encode_path, extract_url_path, join_paths, join_url, normalise_href,
    normalise_path, relative_path,
};

/// HTTP Basic credentials. Wiped from memory on drop.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAuth")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Connection settings of a WebDAV account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebDavConfig {
    /// Root URL all remote paths are relative to.
    pub base_url: String,
    pub basic_auth: BasicAuth,
}

/// WebDAV client.
pub struct WebDavClient {
    http: reqwest::Client,
    base_url: String,
    /// Path component of the base URL with a trailing slash.
    server_base_path: String,
    authorization: String,
}

impl WebDavClient {
    /// Create a client for a WebDAV account.
    ///
    /// # Errors
    /// - `InvalidInput` if the base URL is not an absolute URL
    pub fn new(config: WebDavConfig) -> Result<Self> {
        let server_base_path = join_paths(&[&extract_url_path(&config.base_url)?, "/"]);

        let credentials = STANDARD.encode(format!(
            "{}:{}",
            config.basic_auth.username, config.basic_auth.password
        ));

        let http = reqwest::Client::builder()
            .user_agent(concat!("cloudsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: config.base_url.clone(),
            server_base_path,
            authorization: format!("Basic {}", credentials),
        })
    }

    /// Create a client from its JSON configuration.
    pub fn from_value(config: Value) -> Result<Self> {
        Self::new(serde_json::from_value(config)?)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = join_url(&self.base_url, &encode_path(path));
        debug!("{} {}", method, url);
        self.http
            .request(method, url)
            .header(AUTHORIZATION, &self.authorization)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| Error::Network(format!("Request failed: {}", e)))?;
        handle_response_errors(response).await
    }

    /// PROPFIND a directory. The directory itself is part of the result.
    async fn list_directory(&self, path: &str) -> Result<Vec<CloudItem>> {
        let propfind = Method::from_bytes(b"PROPFIND")
            .map_err(|e| Error::InvalidInput(format!("Invalid method: {}", e)))?;
        let request = self
            .request(propfind, path)
            .header(ACCEPT, "text/plain,application/xml")
            .header("Depth", "1");

        let xml = self
            .send(request)
            .await?
            .text()
            .await
            .map_err(|e| Error::Network(format!("Failed to read response: {}", e)))?;
        if xml.trim().is_empty() {
            return Err(Error::InvalidResponse(
                "Failed parsing directory contents: Empty response".to_string(),
            ));
        }

        let result = parse_xml(&xml)?;
        let items = result
            .responses
            .iter()
            .map(|response| {
                let href = normalise_href(&response.href);
                let filename = if self.server_base_path == "/" {
                    decode_path(&normalise_path(href))
                } else {
                    decode_path(&normalise_path(&relative_path(&self.server_base_path, href)))
                };
                prepare_item(&response.props, &filename)
            })
            .collect();

        Ok(items)
    }
}

#[async_trait]
impl Client for WebDavClient {
    fn provider(&self) -> Provider {
        Provider::WebDAV
    }

    /// WebDAV has no stat call: the parent directory is listed and searched
    /// for a file with the same name.
    async fn get_file_metadata(&self, path: &str) -> Result<CloudFile> {
        let filename = get_filename(path);
        let dirname = &path[..path.len() - filename.len()];

        self.list_directory(dirname)
            .await?
            .into_iter()
            .filter(|item| item.is_file() && item.name() == filename)
            .find_map(CloudItem::into_file)
            .ok_or_else(|| Error::NotFound(format!("File not found: {}", path)))
    }

    async fn download_file(&self, path: &str) -> Result<DownloadFileResult> {
        let response = self.send(self.request(Method::GET, path)).await?;
        let cloud_file = self.get_file_metadata(path).await?;

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| Error::Network(format!("Download failed: {}", e))));

        Ok(DownloadFileResult {
            cloud_file,
            response: Box::pin(stream),
        })
    }

    async fn upload_file(&self, options: UploadFileOptions) -> Result<CloudFile> {
        let UploadFileOptions {
            path,
            content,
            overwrite,
        } = options;

        if !overwrite {
            match self.get_file_metadata(&path).await {
                Ok(_) => {
                    return Err(Error::Conflict(format!("File already exists: {}", path)));
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }

        let request = self
            .request(Method::PUT, &path)
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(CONTENT_LENGTH, content.len())
            .body(content);
        self.send(request).await?;

        self.get_file_metadata(&path).await
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        self.send(self.request(Method::DELETE, path)).await?;
        Ok(())
    }

    async fn list(&self, options: ListOptions) -> Result<ListResult> {
        let path = options.path.as_deref().unwrap_or("/");
        let listed = normalise_path(path);

        let items = self
            .list_directory(path)
            .await?
            .into_iter()
            .filter(|item| normalise_path(item.path()) != listed)
            .collect();

        Ok(ListResult {
            items,
            cursor: None,
            has_more: false,
        })
    }
}
