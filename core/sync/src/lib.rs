//! Sync layer on top of the storage facade.
//!
//! This crate provides:
//! - The ref store linking local files to their remote counterparts
//! - Key-value storage backends the ref store persists into
//! - The sync manager orchestrating uploads, downloads and syncs
//! - A caller-side retry strategy with exponential backoff

pub mod kv;
pub mod manager;
pub mod preferences;
pub mod retry;

pub use kv::{FileStorage, KeyValueStorage, MemoryStorage};
pub use manager::{FileSyncReport, SyncManager, SyncOutcome};
pub use preferences::{CloudPreferences, DEFAULT_REFS_KEY};
pub use retry::{retry, RetryConfig, RetryExecutor, Transient};
