//! Common types and utilities shared by the cloud storage crates.
//!
//! Provides the error taxonomy, the file/ref data model and the content
//! checksum used to detect changes independently of timestamps.

pub mod date;
pub mod error;
pub mod files;
pub mod types;

pub use date::parse_date;
pub use error::{CloudStorageError, Error, ErrorKind, Result};
pub use files::{create_checksum, get_dirname, get_filename};
pub use types::{CloudDirectory, CloudFile, CloudFileRef, CloudItem, Provider, StoredRef};
