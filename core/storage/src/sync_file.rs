//! Default reconciliation between a local file and its remote counterpart.
//!
//! Compares the ref's last known remote timestamp with the current remote
//! timestamp, and the local content checksum with the ref's checksum:
//!
//! | dates            | content   | operation |
//! |------------------|-----------|-----------|
//! | equal            | equal     | none      |
//! | equal            | different | upload    |
//! | ref newer        | any       | upload    |
//! | remote newer     | any       | download  |
//!
//! A remote file that vanished is re-created from the local content.

use tracing::debug;

use cloudstorage_common::{create_checksum, Result};

use crate::client::{Client, SyncFileOptions, SyncFileResult, UploadFileOptions};

/// Decide and perform the sync operation for one file.
///
/// Without local content only remote changes are checked for: the result is
/// either `Download` or `None`. Empty content counts as no content, so an
/// unloaded local file never overwrites the remote one.
///
/// # Errors
/// Any client error except the `NotFound` of the existence check.
pub async fn sync_file<C>(client: &C, options: SyncFileOptions) -> Result<SyncFileResult>
where
    C: Client + ?Sized,
{
    let SyncFileOptions { cloud_ref, content } = options;

    let Some(content) = content.filter(|c| !c.is_empty()) else {
        let cloud_file = client.get_file_metadata(&cloud_ref.path).await?;
        if cloud_ref.last_modified >= cloud_file.last_modified {
            debug!("{} is up to date", cloud_ref.path);
            return Ok(SyncFileResult::None);
        }
        debug!("{} changed remotely, downloading", cloud_ref.path);
        let download = client.download_file(&cloud_ref.path).await?;
        return Ok(SyncFileResult::Download {
            cloud_file,
            response: download.response,
        });
    };

    let cloud_file = match client.get_file_metadata(&cloud_ref.path).await {
        Ok(file) => file,
        Err(err) if err.is_not_found() => {
            debug!("{} no longer exists remotely, uploading", cloud_ref.path);
            let cloud_file = client
                .upload_file(UploadFileOptions {
                    path: cloud_ref.path.clone(),
                    content,
                    overwrite: true,
                })
                .await?;
            return Ok(SyncFileResult::Upload { cloud_file });
        }
        Err(err) => return Err(err),
    };

    let same_content = cloud_ref.checksum.as_deref() == Some(create_checksum(&content).as_str());
    let same_date = cloud_ref.last_modified == cloud_file.last_modified;

    if same_date && same_content {
        debug!("{} is up to date", cloud_ref.path);
        return Ok(SyncFileResult::None);
    }

    if same_date || cloud_ref.last_modified > cloud_file.last_modified {
        debug!("{} changed locally, uploading", cloud_ref.path);
        let cloud_file = client
            .upload_file(UploadFileOptions {
                path: cloud_ref.path.clone(),
                content,
                overwrite: true,
            })
            .await?;
        return Ok(SyncFileResult::Upload { cloud_file });
    }

    if cloud_ref.last_modified < cloud_file.last_modified {
        debug!("{} changed remotely, downloading", cloud_ref.path);
        let download = client.download_file(&cloud_ref.path).await?;
        return Ok(SyncFileResult::Download {
            cloud_file: download.cloud_file,
            response: download.response,
        });
    }

    Ok(SyncFileResult::None)
}
