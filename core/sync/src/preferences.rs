//! Persistent store of sync refs, keyed by local file identifier.

use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use cloudstorage_common::{CloudFileRef, Error, Provider, Result, StoredRef};

use crate::kv::KeyValueStorage;

/// Default storage key of the ref list.
pub const DEFAULT_REFS_KEY: &str = "@cloudstorage.refs";

/// Ref store on top of a key-value storage.
///
/// All refs live as one JSON array under a single key. Mutations are
/// read-modify-write cycles serialized through a writer lock, so concurrent
/// updates from one process never overwrite each other.
pub struct CloudPreferences {
    storage: Arc<dyn KeyValueStorage>,
    refs_key: String,
    writer: Mutex<()>,
}

impl CloudPreferences {
    pub fn new(storage: Arc<dyn KeyValueStorage>) -> Self {
        Self {
            storage,
            refs_key: DEFAULT_REFS_KEY.to_string(),
            writer: Mutex::new(()),
        }
    }

    /// Use a different storage key for the ref list.
    pub fn with_refs_key(mut self, refs_key: impl Into<String>) -> Self {
        self.refs_key = refs_key.into();
        self
    }

    /// Get the ref of a local file.
    ///
    /// # Errors
    /// - `RefNotFound` if the file has no ref
    pub async fn get_ref(&self, identifier: &str) -> Result<StoredRef> {
        self.find_ref(identifier)
            .await?
            .ok_or_else(|| Error::RefNotFound(identifier.to_string()))
    }

    /// Get the ref of a local file, `None` if sync is not enabled for it.
    pub async fn find_ref(&self, identifier: &str) -> Result<Option<StoredRef>> {
        let refs = self.get_refs().await?;
        Ok(refs.into_iter().find(|r| r.identifier == identifier))
    }

    /// All stored refs. A corrupt stored value reads as no refs.
    pub async fn get_refs(&self) -> Result<Vec<StoredRef>> {
        let Some(value) = self.storage.get_item(&self.refs_key).await? else {
            return Ok(Vec::new());
        };

        match serde_json::from_str(&value) {
            Ok(refs) => Ok(refs),
            Err(e) => {
                warn!("Ignoring corrupt refs under {}: {}", self.refs_key, e);
                Ok(Vec::new())
            }
        }
    }

    /// Insert or replace the ref of a local file.
    pub async fn set_ref(&self, identifier: &str, cloud_ref: CloudFileRef) -> Result<StoredRef> {
        let _guard = self.writer.lock().await;

        let stored = StoredRef {
            identifier: identifier.to_string(),
            cloud_ref,
        };
        let mut refs = self.get_refs().await?;
        match refs.iter_mut().find(|r| r.identifier == identifier) {
            Some(existing) => *existing = stored.clone(),
            None => refs.push(stored.clone()),
        }
        self.save(&refs).await?;

        debug!("Stored ref for {}", identifier);
        Ok(stored)
    }

    /// Remove the ref of a local file.
    pub async fn remove_ref(&self, identifier: &str) -> Result<()> {
        let _guard = self.writer.lock().await;

        let mut refs = self.get_refs().await?;
        let before = refs.len();
        refs.retain(|r| r.identifier != identifier);
        if refs.len() == before {
            return Ok(());
        }
        self.save(&refs).await
    }

    /// Remove every ref of a provider. Returns the number of removed refs.
    pub async fn remove_refs(&self, provider: Provider) -> Result<usize> {
        let _guard = self.writer.lock().await;

        let mut refs = self.get_refs().await?;
        let before = refs.len();
        refs.retain(|r| r.cloud_ref.provider != provider);
        let removed = before - refs.len();
        if removed > 0 {
            self.save(&refs).await?;
        }
        Ok(removed)
    }

    /// Distinct providers among stored refs, in first-seen order.
    pub async fn get_providers(&self) -> Result<Vec<Provider>> {
        let mut providers = Vec::new();
        for stored in self.get_refs().await? {
            if !providers.contains(&stored.cloud_ref.provider) {
                providers.push(stored.cloud_ref.provider);
            }
        }
        Ok(providers)
    }

    async fn save(&self, refs: &[StoredRef]) -> Result<()> {
        if refs.is_empty() {
            return self.storage.remove_item(&self.refs_key).await;
        }
        let value = serde_json::to_string(refs)?;
        self.storage.set_item(&self.refs_key, &value).await
    }
}
