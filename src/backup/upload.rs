use std::path::{Path, PathBuf};

use tracing::{error, info};

use crate::backup::s3_upload::ObjectStorage;
use crate::errors::{AppError, Result};

/// Blob name for an archive: `{container_name}/{file name}`.
pub fn blob_name(container_name: &str, archive: &Path) -> Result<String> {
    let file_name = archive
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| AppError::LocalFileMissing(archive.to_path_buf()))?;
    Ok(format!("{}/{}", container_name, file_name))
}

/// Uploads archives in order and stops at the first failure, which is logged
/// with the file and container before it is returned.
///
/// Returns the blob names that were written.
pub async fn upload_all<S: ObjectStorage + ?Sized>(
    storage: &S,
    container_name: &str,
    archives: &[PathBuf],
) -> Result<Vec<String>> {
    let mut uploaded = Vec::with_capacity(archives.len());

    for archive in archives {
        let result = match blob_name(container_name, archive) {
            Ok(name) => storage.upload(archive, &name).await.map(|_| name),
            Err(e) => Err(e),
        };
        match result {
            Ok(name) => uploaded.push(name),
            Err(e) => {
                error!(
                    container = %container_name,
                    file = %archive.display(),
                    uploaded = uploaded.len(),
                    remaining = archives.len() - uploaded.len(),
                    "Upload failed: {}",
                    e
                );
                return Err(e);
            }
        }
    }

    info!(container = %container_name, count = uploaded.len(), "Uploaded archives");
    Ok(uploaded)
}
