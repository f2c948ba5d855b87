//! cloudsync - Command line interface for cloud file sync.
//!
//! Connects WebDAV and Dropbox accounts, links local files to remote ones
//! and keeps both sides in sync.

mod config;

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use cloudstorage_common::{CloudItem, CloudStorageError, Error, Provider};
use cloudstorage_dropbox::{DropboxClient, DropboxConfig};
use cloudstorage_storage::{Client, ClientRegistry, ListOptions, SyncOperation};
use cloudstorage_sync::{
    CloudPreferences, FileStorage, RetryExecutor, SyncManager, SyncOutcome,
};
use cloudstorage_webdav::{BasicAuth, WebDavClient, WebDavConfig};

use config::CliConfig;

#[derive(Parser)]
#[command(name = "cloudsync")]
#[command(about = "cloudsync - Sync local files with WebDAV and Dropbox")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file (default: <config dir>/cloudsync/config.json).
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect a cloud storage account.
    Login {
        #[command(subcommand)]
        account: LoginCommand,
    },

    /// Disconnect an account and disable sync for all of its files.
    Logout {
        /// "webdav" or "dropbox".
        provider: Provider,
    },

    /// List a remote directory.
    Ls {
        provider: Provider,

        /// Remote directory (default: root).
        #[arg(default_value = "/")]
        path: String,
    },

    /// Upload a local file and enable sync for it.
    Push {
        file: PathBuf,

        #[arg(short, long)]
        provider: Provider,

        /// Remote path (default: the file name in the root directory).
        #[arg(short, long)]
        remote: Option<String>,
    },

    /// Download a remote file to a local file and enable sync for it.
    Pull {
        provider: Provider,
        remote: String,
        file: PathBuf,
    },

    /// Sync local files with their remote counterparts.
    Sync {
        /// Files to sync (default: every synced file).
        files: Vec<PathBuf>,

        /// Only pick up remote changes, never upload.
        #[arg(long)]
        check_only: bool,
    },

    /// Show synced files.
    Refs,

    /// Disable sync for a file, keeping the remote copy.
    Unlink { file: PathBuf },

    /// Delete the remote copy of a file and disable sync for it.
    Rm { file: PathBuf },
}

#[derive(Subcommand)]
enum LoginCommand {
    /// Connect a WebDAV server. The password is prompted for.
    Webdav {
        /// Base URL, e.g. https://cloud.example.com/remote.php/webdav
        #[arg(long)]
        url: String,

        #[arg(long)]
        username: String,
    },

    /// Connect a Dropbox account.
    Dropbox {
        #[arg(long)]
        refresh_token: String,

        /// App key of the Dropbox app the token was issued for.
        #[arg(long)]
        client_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config_path = match cli.config {
        Some(path) => path,
        None => CliConfig::default_path()?,
    };

    if let Err(err) = run(cli.command, config_path).await {
        if is_unauthorized(&err) {
            eprintln!("Your session has expired, log in again with `cloudsync login`.");
            std::process::exit(1);
        }
        return Err(err);
    }
    Ok(())
}

async fn run(command: Commands, config_path: PathBuf) -> Result<()> {
    let app = App::load(config_path).await?;

    match command {
        Commands::Login { account } => app.cmd_login(account).await,
        Commands::Logout { provider } => app.cmd_logout(provider).await,
        Commands::Ls { provider, path } => app.cmd_ls(provider, &path).await,
        Commands::Push {
            file,
            provider,
            remote,
        } => app.cmd_push(&file, provider, remote).await,
        Commands::Pull {
            provider,
            remote,
            file,
        } => app.cmd_pull(provider, &remote, &file).await,
        Commands::Sync { files, check_only } => app.cmd_sync(files, check_only).await,
        Commands::Refs => app.cmd_refs().await,
        Commands::Unlink { file } => app.cmd_unlink(&file).await,
        Commands::Rm { file } => app.cmd_rm(&file).await,
    }
}

/// Whether any error in the chain is a rejected or expired session.
fn is_unauthorized(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause.downcast_ref::<Error>().is_some_and(Error::is_unauthorized)
            || cause
                .downcast_ref::<CloudStorageError>()
                .is_some_and(CloudStorageError::is_unauthorized)
    })
}

/// Identifier of a local file in the ref store: its absolute path.
fn identifier(file: &Path) -> Result<String> {
    let absolute = std::path::absolute(file)
        .with_context(|| format!("Invalid path {}", file.display()))?;
    Ok(absolute.to_string_lossy().into_owned())
}

/// Remote path a pushed file is stored at when none is given.
fn default_remote_path(file: &Path) -> Result<String> {
    let name = file
        .file_name()
        .context("File has no name")?
        .to_string_lossy();
    Ok(format!("/{}", name))
}

fn client_registry() -> Result<ClientRegistry> {
    let mut registry = ClientRegistry::new();
    registry.register(
        Provider::WebDAV,
        Box::new(|config| Ok(Arc::new(WebDavClient::from_value(config)?) as Arc<dyn Client>)),
    )?;
    registry.register(
        Provider::Dropbox,
        Box::new(|config| Ok(Arc::new(DropboxClient::from_value(config)?) as Arc<dyn Client>)),
    )?;
    Ok(registry)
}

async fn test_connection(client: &dyn Client) -> Result<()> {
    info!("Testing connection to {}", client.provider());
    client
        .list(ListOptions::path("/"))
        .await
        .with_context(|| format!("Failed to connect to {}", client.provider()))?;
    Ok(())
}

/// Loaded configuration with every configured account connected.
struct App {
    config_path: PathBuf,
    config: CliConfig,
    manager: SyncManager,
    retry: RetryExecutor,
}

impl App {
    async fn load(config_path: PathBuf) -> Result<Self> {
        let config = CliConfig::load(&config_path).await?;

        let storage = match &config.preferences_file {
            Some(path) => FileStorage::new(path),
            None => FileStorage::default_location()?,
        };
        let preferences = Arc::new(CloudPreferences::new(Arc::new(storage)));
        let manager = SyncManager::new(preferences);

        let registry = client_registry()?;
        for (provider, account) in config.accounts()? {
            let storage = registry
                .create_storage(provider, account)
                .with_context(|| format!("Invalid {} settings", provider))?;
            manager.add_storage(storage).await;
        }

        Ok(Self {
            config_path,
            config,
            manager,
            retry: RetryExecutor::default(),
        })
    }

    /// Connect an account after checking the credentials work.
    async fn cmd_login(mut self, account: LoginCommand) -> Result<()> {
        let provider = match account {
            LoginCommand::Webdav { url, username } => {
                let password =
                    rpassword::prompt_password("Password: ").context("Failed to read password")?;
                let webdav = WebDavConfig {
                    base_url: url,
                    basic_auth: BasicAuth { username, password },
                };
                let client = WebDavClient::new(webdav.clone()).context("Invalid WebDAV settings")?;
                test_connection(&client).await?;
                self.config.webdav = Some(webdav);
                Provider::WebDAV
            }
            LoginCommand::Dropbox {
                refresh_token,
                client_id,
            } => {
                let dropbox = DropboxConfig::new(client_id, refresh_token);
                let client = DropboxClient::new(dropbox.clone()).context("Invalid Dropbox settings")?;
                test_connection(&client).await?;
                self.config.dropbox = Some(dropbox);
                Provider::Dropbox
            }
        };

        self.config.save(&self.config_path).await?;
        println!("Connected to {}.", provider);
        Ok(())
    }

    async fn cmd_logout(mut self, provider: Provider) -> Result<()> {
        if !self.config.remove(provider) {
            anyhow::bail!("Not logged in to {}", provider);
        }
        self.manager.remove_storage(provider).await?;
        self.config.save(&self.config_path).await?;
        println!("Logged out from {}.", provider);
        Ok(())
    }

    async fn cmd_ls(&self, provider: Provider, path: &str) -> Result<()> {
        let mut items: Vec<CloudItem> = Vec::new();
        let mut page = self
            .retry
            .execute(|| self.manager.list(provider, Some(path), None))
            .await
            .with_context(|| format!("Failed to list {}", path))?;

        loop {
            items.append(&mut page.items);
            let cursor = match page.cursor.take() {
                Some(cursor) if page.has_more => cursor,
                _ => break,
            };
            page = self
                .retry
                .execute(|| self.manager.list(provider, None, Some(cursor.as_str())))
                .await
                .with_context(|| format!("Failed to list {}", path))?;
        }

        if items.is_empty() {
            println!("Directory is empty.");
            return Ok(());
        }

        println!("Contents of {}:", path);
        for item in items {
            match item {
                CloudItem::Directory(dir) => println!("  [DIR]  {}/", dir.path),
                CloudItem::File(file) => println!(
                    "  [FILE] {} ({})",
                    file.path,
                    file.last_modified.format("%Y-%m-%d %H:%M:%S")
                ),
            }
        }
        Ok(())
    }

    async fn cmd_push(&self, file: &Path, provider: Provider, remote: Option<String>) -> Result<()> {
        let remote = match remote {
            Some(remote) => remote,
            None => default_remote_path(file)?,
        };
        let id = identifier(file)?;
        let content = Bytes::from(
            tokio::fs::read(file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?,
        );

        let stored = self
            .retry
            .execute(|| {
                self.manager
                    .upload_file(&id, provider, &remote, content.clone())
            })
            .await
            .with_context(|| format!("Failed to upload {}", file.display()))?;

        println!(
            "Uploaded {} to {} {}",
            file.display(),
            provider,
            stored.cloud_ref.path
        );
        Ok(())
    }

    async fn cmd_pull(&self, provider: Provider, remote: &str, file: &Path) -> Result<()> {
        let id = identifier(file)?;
        let content = self
            .retry
            .execute(|| self.manager.download_file(&id, provider, remote))
            .await
            .with_context(|| format!("Failed to download {}", remote))?;

        tokio::fs::write(file, content.bytes())
            .await
            .with_context(|| format!("Failed to write {}", file.display()))?;

        println!(
            "Downloaded {} {} to {} ({} bytes)",
            provider,
            remote,
            file.display(),
            content.len()
        );
        Ok(())
    }

    /// Local content to sync, or `None` to only check for remote changes.
    async fn local_content(identifier: &str, check_only: bool) -> Result<Option<Bytes>> {
        if check_only {
            return Ok(None);
        }
        match tokio::fs::read(identifier).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("{} does not exist locally, checking remote only", identifier);
                Ok(None)
            }
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", identifier)),
        }
    }

    async fn cmd_sync(&self, files: Vec<PathBuf>, check_only: bool) -> Result<()> {
        let identifiers = if files.is_empty() {
            self.manager
                .preferences()
                .get_refs()
                .await?
                .into_iter()
                .map(|stored| stored.identifier)
                .collect()
        } else {
            files
                .iter()
                .map(|file| identifier(file))
                .collect::<Result<Vec<_>>>()?
        };

        if identifiers.is_empty() {
            println!("No synced files.");
            return Ok(());
        }

        let mut pending = Vec::with_capacity(identifiers.len());
        for id in identifiers {
            let content = Self::local_content(&id, check_only).await?;
            pending.push((id, content));
        }

        let total = pending.len();
        let reports = self.manager.sync_all(pending).await?;
        if reports.len() < total {
            println!("Skipped {} files without sync.", total - reports.len());
        }

        let mut failures = Vec::new();
        for report in reports {
            match report.result {
                Ok(outcome) => self.apply(outcome).await?,
                Err(err) => {
                    eprintln!("Failed to sync {}: {}", report.identifier, err);
                    failures.push(err);
                }
            }
        }

        if let Some(position) = failures.iter().position(Error::is_unauthorized) {
            return Err(failures.swap_remove(position).into());
        }
        if !failures.is_empty() {
            anyhow::bail!("{} of {} files failed to sync", failures.len(), total);
        }
        Ok(())
    }

    /// Write downloaded content to disk and report the outcome.
    async fn apply(&self, outcome: SyncOutcome) -> Result<()> {
        match (outcome.operation, outcome.content) {
            (SyncOperation::Download, Some(content)) => {
                tokio::fs::write(&outcome.identifier, content.bytes())
                    .await
                    .with_context(|| format!("Failed to write {}", outcome.identifier))?;
                println!("Downloaded {}", outcome.identifier);
            }
            (SyncOperation::Upload, _) => println!("Uploaded {}", outcome.identifier),
            _ => println!("Up to date {}", outcome.identifier),
        }
        Ok(())
    }

    async fn cmd_refs(&self) -> Result<()> {
        let refs = self.manager.preferences().get_refs().await?;
        if refs.is_empty() {
            println!("No synced files.");
            return Ok(());
        }

        for stored in refs {
            let cloud_ref = &stored.cloud_ref;
            println!("{}", stored.identifier);
            println!("  Provider: {}", cloud_ref.provider);
            println!("  Remote: {}", cloud_ref.path);
            println!("  Modified: {}", cloud_ref.last_modified.to_rfc3339());
            println!("  Last sync: {}", cloud_ref.last_sync.to_rfc3339());
            if let Some(checksum) = &cloud_ref.checksum {
                println!("  Checksum: {}", checksum);
            }
        }
        Ok(())
    }

    async fn cmd_unlink(&self, file: &Path) -> Result<()> {
        let id = identifier(file)?;
        if !self.manager.is_sync_enabled(&id).await? {
            anyhow::bail!("{} is not synced", file.display());
        }
        self.manager.unlink_file(&id).await?;
        println!("Sync disabled for {}", file.display());
        Ok(())
    }

    async fn cmd_rm(&self, file: &Path) -> Result<()> {
        let id = identifier(file)?;
        self.retry
            .execute(|| self.manager.delete_file(&id))
            .await
            .with_context(|| format!("Failed to delete remote copy of {}", file.display()))?;
        println!("Deleted remote copy of {}", file.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_commands() {
        let cli = Cli::try_parse_from([
            "cloudsync", "--verbose", "push", "todo.txt", "--provider", "webdav",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Push {
                file,
                provider,
                remote,
            } => {
                assert_eq!(file, PathBuf::from("todo.txt"));
                assert_eq!(provider, Provider::WebDAV);
                assert!(remote.is_none());
            }
            _ => panic!("expected push"),
        }

        let cli = Cli::try_parse_from(["cloudsync", "sync", "--check-only"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Sync { ref files, check_only: true } if files.is_empty()
        ));
    }

    #[test]
    fn test_unknown_provider_is_rejected() {
        assert!(Cli::try_parse_from(["cloudsync", "ls", "gdrive"]).is_err());
    }

    #[test]
    fn test_default_remote_path() {
        assert_eq!(
            default_remote_path(Path::new("/home/alice/todo.txt")).unwrap(),
            "/todo.txt"
        );
        assert!(default_remote_path(Path::new("/")).is_err());
    }

    #[test]
    fn test_identifier_is_absolute() {
        let id = identifier(Path::new("todo.txt")).unwrap();
        assert!(Path::new(&id).is_absolute());
        assert!(id.ends_with("todo.txt"));
    }

    #[test]
    fn test_unauthorized_detection() {
        let err = anyhow::Error::from(Error::Unauthorized("401".to_string()))
            .context("Failed to list /");
        assert!(is_unauthorized(&err));

        let wrapped = CloudStorageError::wrap(
            Provider::Dropbox,
            None,
            Error::Unauthorized("401".to_string()),
        );
        assert!(is_unauthorized(&anyhow::Error::from(Error::from(wrapped))));

        let err = anyhow::Error::from(Error::Network("timeout".to_string()));
        assert!(!is_unauthorized(&err));
    }

    #[test]
    fn test_registry_knows_both_providers() {
        let registry = client_registry().unwrap();
        assert_eq!(registry.providers().len(), 2);
        assert!(registry.has_provider(Provider::Dropbox));
        assert!(registry.has_provider(Provider::WebDAV));
    }
}
