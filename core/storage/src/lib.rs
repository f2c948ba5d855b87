//! Provider abstraction and storage facade for cloud file sync.
//!
//! This crate provides the [`Client`] trait every backend (WebDAV, Dropbox,
//! in-memory) implements, the shared reconciliation function and the
//! [`CloudStorage`] facade that turns transfers into sync refs.
//!
//! # Design Principles
//! - Provider isolation: the facade and the sync manager only see `dyn Client`
//! - Async operations: all I/O is async
//! - Unified error semantics: `NotFound`, `Conflict` and `Unauthorized` are
//!   typed across providers

pub mod client;
pub mod memory;
pub mod registry;
pub mod response;
pub mod storage;
pub mod sync_file;

pub use client::{
    byte_stream, collect_stream, ByteStream, Client, DownloadFileResult, ListOptions, ListResult,
    SyncFileOptions, SyncFileResult, SyncOperation, UploadFileOptions,
};
pub use memory::MemoryClient;
pub use registry::{ClientFactory, ClientRegistry};
pub use response::{error_for_status, handle_response_errors};
pub use storage::{CloudStorage, Content, Download, StorageResult, SyncResult, UploadOptions};
pub use sync_file::sync_file;
