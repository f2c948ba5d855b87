//! Persisted CLI configuration: connected accounts and the ref store location.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use cloudstorage_common::Provider;
use cloudstorage_dropbox::DropboxConfig;
use cloudstorage_webdav::WebDavConfig;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CliConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webdav: Option<WebDavConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dropbox: Option<DropboxConfig>,
    /// Ref store file. The platform data directory is used when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferences_file: Option<PathBuf>,
}

impl CliConfig {
    /// `<config dir>/cloudsync/config.json`.
    pub fn default_path() -> Result<PathBuf> {
        let dir = dirs::config_dir().context("No config directory available")?;
        Ok(dir.join("cloudsync").join("config.json"))
    }

    /// Load the configuration. A missing file is an empty configuration.
    pub async fn load(path: &Path) -> Result<Self> {
        let data = match tokio::fs::read_to_string(path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()))
            }
        };
        serde_json::from_str(&data).with_context(|| format!("Invalid config {}", path.display()))
    }

    /// Save the configuration through a temp file and a rename. It holds
    /// credentials, so on unix the file is created readable by the owner only.
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let data = serde_json::to_string_pretty(self)?;

        let temp = path.with_extension("json.tmp");
        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options
            .open(&temp)
            .await
            .with_context(|| format!("Failed to create {}", temp.display()))?;
        file.write_all(data.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);

        if let Err(e) = tokio::fs::rename(&temp, path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e).with_context(|| format!("Failed to write {}", path.display()));
        }
        Ok(())
    }

    /// Client configuration of every connected provider.
    pub fn accounts(&self) -> Result<Vec<(Provider, Value)>> {
        let mut accounts = Vec::new();
        if let Some(webdav) = &self.webdav {
            accounts.push((Provider::WebDAV, serde_json::to_value(webdav)?));
        }
        if let Some(dropbox) = &self.dropbox {
            accounts.push((Provider::Dropbox, serde_json::to_value(dropbox)?));
        }
        Ok(accounts)
    }

    /// Forget a provider's credentials. Returns whether any were stored.
    pub fn remove(&mut self, provider: Provider) -> bool {
        match provider {
            Provider::WebDAV => self.webdav.take().is_some(),
            Provider::Dropbox => self.dropbox.take().is_some(),
        }
    }
}
