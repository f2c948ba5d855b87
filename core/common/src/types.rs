//! Data model shared by clients, the storage facade and the ref store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Cloud storage backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Provider {
    Dropbox,
    WebDAV,
}

impl Provider {
    /// Get the provider name as persisted.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dropbox => "Dropbox",
            Self::WebDAV => "WebDAV",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dropbox" => Ok(Self::Dropbox),
            "webdav" => Ok(Self::WebDAV),
            _ => Err(Error::InvalidInput(format!("Unknown cloud storage \"{}\"", s))),
        }
    }
}

/// A remote file as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudFile {
    /// Path to the file in the cloud storage.
    pub path: String,
    /// File name.
    pub name: String,
    /// Date the file was last modified.
    pub last_modified: DateTime<Utc>,
}

/// A remote folder. Only used for navigation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudDirectory {
    pub path: String,
    pub name: String,
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CloudItem {
    File(CloudFile),
    Directory(CloudDirectory),
}

impl CloudItem {
    pub fn path(&self) -> &str {
        match self {
            Self::File(file) => &file.path,
            Self::Directory(dir) => &dir.path,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::File(file) => &file.name,
            Self::Directory(dir) => &dir.name,
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self, Self::File(_))
    }

    /// Take the file out of this item, if it is one.
    pub fn into_file(self) -> Option<CloudFile> {
        match self {
            Self::File(file) => Some(file),
            Self::Directory(_) => None,
        }
    }
}

/// Persistent link between a local file and its remote counterpart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudFileRef {
    pub path: String,
    pub name: String,
    pub last_modified: DateTime<Utc>,
    /// The cloud storage provider that the file belongs to.
    pub provider: Provider,
    /// Last time the ref was read or written by the storage facade.
    pub last_sync: DateTime<Utc>,
    /// Checksum of the last synced content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl CloudFileRef {
    /// Build a ref from freshly transferred file metadata.
    pub fn new(file: CloudFile, provider: Provider, checksum: Option<String>) -> Self {
        Self {
            path: file.path,
            name: file.name,
            last_modified: file.last_modified,
            provider,
            last_sync: Utc::now(),
            checksum,
        }
    }

    /// Replace the remote file metadata, keeping provider and checksum.
    pub fn with_cloud_file(mut self, file: CloudFile) -> Self {
        self.path = file.path;
        self.name = file.name;
        self.last_modified = file.last_modified;
        self
    }
}

/// A ref as persisted: keyed by the local file identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRef {
    /// Unique identifier mapping the local file to its cloud representation.
    pub identifier: String,
    #[serde(flatten)]
    pub cloud_ref: CloudFileRef,
}
