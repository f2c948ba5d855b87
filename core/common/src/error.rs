//! Common error types for cloud storage operations.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::types::Provider;

/// Typed failure discriminant surfaced to callers.
///
/// Everything else (network failures, malformed responses, ...) is untyped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Upload with `overwrite = false` hit an existing file.
    Conflict,
    /// The requested remote path does not exist.
    #[serde(rename = "Not Found")]
    NotFound,
    /// Authentication failed or expired.
    Unauthorized,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Conflict => write!(f, "Conflict"),
            Self::NotFound => write!(f, "Not Found"),
            Self::Unauthorized => write!(f, "Unauthorized"),
        }
    }
}

/// Top-level error type for cloud storage operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Resource not found on the remote side.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource already exists.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Credentials rejected or missing.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Transport failure: no usable HTTP response.
    #[error("Network error: {0}")]
    Network(String),

    /// The server answered with an error status that has no typed kind.
    #[error("Invalid response: {status} - {message}")]
    Http { status: u16, message: String },

    /// The remote answered with something we could not interpret.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Key-value storage operation failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// No sync ref stored for a local file.
    #[error("No ref found for identifier: {0}")]
    RefNotFound(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error that already carries provider and path context.
    #[error(transparent)]
    CloudStorage(Box<CloudStorageError>),
}

impl Error {
    /// The typed discriminant, if this error has one.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::NotFound(_) => Some(ErrorKind::NotFound),
            Self::Conflict(_) => Some(ErrorKind::Conflict),
            Self::Unauthorized(_) => Some(ErrorKind::Unauthorized),
            Self::CloudStorage(err) => err.kind,
            _ => None,
        }
    }

    /// Check whether this is a `NotFound` error, wrapped or not.
    pub fn is_not_found(&self) -> bool {
        self.kind() == Some(ErrorKind::NotFound)
    }

    /// Check whether this is an `Unauthorized` error, wrapped or not.
    pub fn is_unauthorized(&self) -> bool {
        self.kind() == Some(ErrorKind::Unauthorized)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<CloudStorageError> for Error {
    fn from(err: CloudStorageError) -> Self {
        Self::CloudStorage(Box::new(err))
    }
}

/// Error surfaced by the storage facade: the underlying failure plus the
/// provider and remote path it happened on.
#[derive(Debug, Error)]
pub struct CloudStorageError {
    /// Typed discriminant carried over from the source error.
    pub kind: Option<ErrorKind>,
    /// Provider the operation ran against.
    pub provider: Provider,
    /// Remote path of the operation, if known.
    pub path: Option<String>,
    /// The original failure.
    #[source]
    pub source: Option<Box<Error>>,
    message: String,
}

impl CloudStorageError {
    /// Wrap an error with provider and path context.
    ///
    /// An error that is already a `CloudStorageError` is returned unchanged.
    pub fn wrap(provider: Provider, path: Option<String>, source: Error) -> Self {
        match source {
            Error::CloudStorage(inner) => *inner,
            other => Self {
                kind: other.kind(),
                provider,
                path,
                message: other.to_string(),
                source: Some(Box::new(other)),
            },
        }
    }

    /// Create an error without an underlying source.
    pub fn new(provider: Provider, kind: Option<ErrorKind>, message: impl Into<String>) -> Self {
        Self {
            kind,
            provider,
            path: None,
            source: None,
            message: message.into(),
        }
    }

    /// Attach a remote path.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Human readable message of the underlying failure.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Check whether the failure was an expired or rejected session.
    pub fn is_unauthorized(&self) -> bool {
        self.kind == Some(ErrorKind::Unauthorized)
    }
}

impl fmt::Display for CloudStorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.provider)?;
        if let Some(path) = &self.path {
            if !path.is_empty() {
                write!(f, " ({})", path)?;
            }
        }
        write!(f, ": {}", self.message)
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
