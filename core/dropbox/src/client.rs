//! Dropbox API client.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt::{self, Write};
use tracing::debug;

use cloudstorage_common::{CloudDirectory, CloudFile, CloudItem, Error, Provider, Result};
use cloudstorage_storage::{
    error_for_status, Client, DownloadFileResult, ListOptions, ListResult, UploadFileOptions,
};

use crate::auth::{DropboxCredentials, TokenManager, Tokens};

/// Dropbox RPC API base URL.
const DROPBOX_API_BASE: &str = "https://api.dropboxapi.com";
/// Dropbox content API base URL.
const DROPBOX_CONTENT_BASE: &str = "https://content.dropboxapi.com";
/// OAuth2 token endpoint.
const DROPBOX_TOKEN_URL: &str = "https://api.dropboxapi.com/oauth2/token";

/// Header carrying the arguments of content endpoints.
const API_ARG_HEADER: &str = "Dropbox-API-Arg";
/// Header carrying the file metadata of a download.
const API_RESULT_HEADER: &str = "Dropbox-API-Result";

fn default_api_url() -> String {
    DROPBOX_API_BASE.to_string()
}

fn default_content_url() -> String {
    DROPBOX_CONTENT_BASE.to_string()
}

fn default_token_url() -> String {
    DROPBOX_TOKEN_URL.to_string()
}

/// Account settings of a Dropbox client.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DropboxConfig {
    /// App key.
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Access token to use as is. Only needed without a refresh token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_content_url")]
    pub content_url: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
}

impl DropboxConfig {
    /// Configuration for the public Dropbox endpoints.
    pub fn new(client_id: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            refresh_token: Some(refresh_token.into()),
            access_token: None,
            api_url: default_api_url(),
            content_url: default_content_url(),
            token_url: default_token_url(),
        }
    }
}

impl fmt::Debug for DropboxConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redacted = |secret: &Option<String>| secret.as_ref().map(|_| "<redacted>");
        f.debug_struct("DropboxConfig")
            .field("client_id", &self.client_id)
            .field("refresh_token", &redacted(&self.refresh_token))
            .field("access_token", &redacted(&self.access_token))
            .field("api_url", &self.api_url)
            .field("content_url", &self.content_url)
            .field("token_url", &self.token_url)
            .finish()
    }
}

/// File metadata. Returned tagged by `get_metadata` and `list_folder`,
/// untagged by `upload` and in the download result header.
#[derive(Debug, Clone, Deserialize)]
struct FileMetadata {
    name: String,
    #[serde(default)]
    path_lower: Option<String>,
    server_modified: DateTime<Utc>,
}

impl FileMetadata {
    fn into_cloud_file(self) -> Result<CloudFile> {
        let path = self.path_lower.ok_or_else(|| {
            Error::InvalidResponse(format!("File with name \"{}\" not mounted", self.name))
        })?;
        Ok(CloudFile {
            path,
            name: self.name,
            last_modified: self.server_modified,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
struct FolderMetadata {
    name: String,
    #[serde(default)]
    path_lower: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = ".tag", rename_all = "lowercase")]
enum Metadata {
    File(FileMetadata),
    Folder(FolderMetadata),
    Deleted(Value),
}

impl Metadata {
    fn into_item(self) -> Option<CloudItem> {
        match self {
            Self::File(file) => file.into_cloud_file().ok().map(CloudItem::File),
            Self::Folder(FolderMetadata { name, path_lower }) => {
                path_lower.map(|path| CloudItem::Directory(CloudDirectory { path, name }))
            }
            Self::Deleted(_) => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListFolderResult {
    entries: Vec<Metadata>,
    cursor: String,
    has_more: bool,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error_summary: String,
}

/// Map a failed API response to the error taxonomy.
///
/// Dropbox reports endpoint errors as 409 with an `error_summary` such as
/// `path/not_found/..`, so the summary decides and the status only matters
/// when there is none.
pub(crate) fn map_error(status: StatusCode, body: &str) -> Error {
    if status == StatusCode::UNAUTHORIZED {
        return error_for_status(status, body.to_string());
    }

    let Ok(ApiError { error_summary }) = serde_json::from_str::<ApiError>(body) else {
        return error_for_status(status, body.to_string());
    };

    if error_summary.contains("path/not_found") || error_summary.contains("path_lookup/not_found")
    {
        Error::NotFound(error_summary)
    } else if error_summary.contains("path/conflict") {
        Error::Conflict(error_summary)
    } else {
        Error::Http {
            status: status.as_u16(),
            message: error_summary,
        }
    }
}

/// Dropbox addresses the root as `""` and everything else with a leading
/// slash and no trailing one.
pub(crate) fn api_path(path: &str) -> String {
    let trimmed = path.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

/// JSON for the `Dropbox-API-Arg` header. Header values must be ASCII, so
/// everything else is written as `\uXXXX` escapes.
pub(crate) fn header_safe_json(value: &Value) -> String {
    let json = value.to_string();
    let mut escaped = String::with_capacity(json.len());
    for c in json.chars() {
        if c.is_ascii() && c != '\u{7f}' {
            escaped.push(c);
        } else {
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units) {
                let _ = write!(escaped, "\\u{:04x}", unit);
            }
        }
    }
    escaped
}

/// Dropbox API client.
pub struct DropboxClient {
    http: reqwest::Client,
    api_url: String,
    content_url: String,
    tokens: TokenManager,
}

impl DropboxClient {
    /// Create a client for a Dropbox account.
    ///
    /// # Errors
    /// - `InvalidInput` if neither a refresh token nor an access token is set
    pub fn new(config: DropboxConfig) -> Result<Self> {
        if config.refresh_token.is_none() && config.access_token.is_none() {
            return Err(Error::InvalidInput(
                "Dropbox needs a refresh token or an access token".to_string(),
            ));
        }

        let http = reqwest::Client::builder()
            .user_agent(concat!("cloudsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        let tokens = TokenManager::new(
            http.clone(),
            config.token_url.clone(),
            DropboxCredentials {
                client_id: config.client_id.clone(),
                refresh_token: config.refresh_token.clone(),
            },
            config.access_token.clone().map(Tokens::permanent),
        );

        Ok(Self {
            http,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            content_url: config.content_url.trim_end_matches('/').to_string(),
            tokens,
        })
    }

    /// Create a client from its JSON configuration.
    pub fn from_value(config: Value) -> Result<Self> {
        Self::new(serde_json::from_value(config)?)
    }

    /// Authorize and send a request, mapping failures.
    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let token = self.tokens.access_token().await?;
        let response = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let err = map_error(status, &body);
        if err.is_unauthorized() {
            self.tokens.invalidate().await;
        }
        Err(err)
    }

    /// Call an RPC endpoint with JSON arguments and a JSON result.
    async fn rpc<T: DeserializeOwned>(&self, endpoint: &str, arg: Value) -> Result<T> {
        let url = format!("{}/2/files/{}", self.api_url, endpoint);
        debug!("POST {}", url);

        self.send(self.http.post(&url).json(&arg))
            .await?
            .json()
            .await
            .map_err(|e| Error::InvalidResponse(format!("Failed to decode {}: {}", endpoint, e)))
    }

    /// Build a request against a content endpoint.
    fn content_request(&self, endpoint: &str, arg: Value) -> RequestBuilder {
        let url = format!("{}/2/files/{}", self.content_url, endpoint);
        debug!("POST {}", url);
        self.http
            .post(url)
            .header(API_ARG_HEADER, header_safe_json(&arg))
    }
}

#[async_trait]
impl Client for DropboxClient {
    fn provider(&self) -> Provider {
        Provider::Dropbox
    }

    async fn get_file_metadata(&self, path: &str) -> Result<CloudFile> {
        let metadata: Metadata = self
            .rpc("get_metadata", json!({ "path": api_path(path) }))
            .await?;

        match metadata {
            Metadata::File(file) => file.into_cloud_file(),
            _ => Err(Error::InvalidInput(format!(
                "Resource with path \"{}\" is not a file",
                path
            ))),
        }
    }

    async fn download_file(&self, path: &str) -> Result<DownloadFileResult> {
        let request = self.content_request("download", json!({ "path": api_path(path) }));
        let response = self.send(request).await?;

        let metadata = response
            .headers()
            .get(API_RESULT_HEADER)
            .ok_or_else(|| {
                Error::InvalidResponse(format!("Download of {} has no result header", path))
            })?;
        // Raw bytes: some servers send UTF-8 here instead of escapes
        let cloud_file =
            serde_json::from_slice::<FileMetadata>(metadata.as_bytes())?.into_cloud_file()?;

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| Error::Network(format!("Download failed: {}", e))));

        Ok(DownloadFileResult {
            cloud_file,
            response: Box::pin(stream),
        })
    }

    async fn upload_file(&self, options: UploadFileOptions) -> Result<CloudFile> {
        let mode = if options.overwrite { "overwrite" } else { "add" };
        let request = self
            .content_request(
                "upload",
                json!({
                    "path": api_path(&options.path),
                    "mode": mode,
                    "autorename": false,
                    "mute": true,
                }),
            )
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(options.content);

        let metadata: FileMetadata = self
            .send(request)
            .await?
            .json()
            .await
            .map_err(|e| Error::InvalidResponse(format!("Failed to decode upload: {}", e)))?;

        metadata.into_cloud_file()
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        let _: Value = self
            .rpc("delete_v2", json!({ "path": api_path(path) }))
            .await?;
        Ok(())
    }

    /// A path starts a recursive listing, a cursor continues one. The path
    /// wins when both are given.
    async fn list(&self, options: ListOptions) -> Result<ListResult> {
        let result: ListFolderResult = match (options.path, options.cursor) {
            (Some(path), _) => {
                self.rpc(
                    "list_folder",
                    json!({ "path": api_path(&path), "recursive": true }),
                )
                .await?
            }
            (None, Some(cursor)) => {
                self.rpc("list_folder/continue", json!({ "cursor": cursor }))
                    .await?
            }
            (None, None) => {
                return Err(Error::InvalidInput(
                    "Either path or cursor must be defined".to_string(),
                ))
            }
        };

        Ok(ListResult {
            items: result
                .entries
                .into_iter()
                .filter_map(Metadata::into_item)
                .collect(),
            cursor: Some(result.cursor),
            has_more: result.has_more,
        })
    }
}
