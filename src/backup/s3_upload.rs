// volume-backup/src/backup/s3_upload.rs
use std::path::Path;

use async_trait::async_trait;
use aws_sdk_s3 as s3;
use s3::config::Region;
use s3::primitives::ByteStream;
use tracing::{debug, info, warn};

use crate::config::StorageConfig;
use crate::errors::{AppError, Result};

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Confirms the target is reachable with the configured credentials.
    async fn check_connection(&self) -> Result<()>;

    /// Writes the file at `local_path` as `blob_name`, replacing any existing blob.
    async fn upload(&self, local_path: &Path, blob_name: &str) -> Result<()>;
}

/// Uploads to an S3-compatible object storage service (like DigitalOcean Spaces).
pub struct S3Storage {
    client: s3::Client,
    bucket_name: String,
    folder_prefix: Option<String>,
}

impl S3Storage {
    pub async fn new(storage_config: &StorageConfig) -> Self {
        let sdk_config = aws_config::defaults(s3::config::BehaviorVersion::latest())
            .endpoint_url(&storage_config.endpoint_url)
            .region(Region::new(storage_config.region.clone()))
            .credentials_provider(s3::config::Credentials::new(
                &storage_config.access_key_id,
                &storage_config.secret_access_key,
                None,     // session_token
                None,     // expiry
                "Static", // provider_name
            ))
            .load()
            .await;

        Self {
            client: s3::Client::new(&sdk_config),
            bucket_name: storage_config.bucket_name.clone(),
            folder_prefix: storage_config.folder_prefix.clone(),
        }
    }

    fn object_key(&self, blob_name: &str) -> String {
        object_key(self.folder_prefix.as_deref(), blob_name)
    }
}

#[async_trait]
impl ObjectStorage for S3Storage {
    async fn check_connection(&self) -> Result<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket_name)
            .send()
            .await
            .map_err(|e| {
                AppError::StorageUnavailable(format!(
                    "bucket {} is not accessible: {}",
                    self.bucket_name,
                    s3::error::DisplayErrorContext(&e)
                ))
            })?;
        debug!(bucket = %self.bucket_name, "Object storage bucket is accessible");
        Ok(())
    }

    async fn upload(&self, local_path: &Path, blob_name: &str) -> Result<()> {
        let key = self.object_key(blob_name);

        let body = match ByteStream::from_path(local_path).await {
            Ok(body) => body,
            Err(e) => {
                warn!(file = %local_path.display(), "Cannot read archive: {}", e);
                return Err(AppError::LocalFileMissing(local_path.to_path_buf()));
            }
        };

        self.client
            .put_object()
            .bucket(&self.bucket_name)
            .key(&key)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                AppError::StorageUnavailable(format!(
                    "failed to upload {} to bucket {} with key {}: {}",
                    local_path.display(),
                    self.bucket_name,
                    key,
                    s3::error::DisplayErrorContext(&e)
                ))
            })?;

        info!(bucket = %self.bucket_name, key = %key, "Uploaded archive");
        Ok(())
    }
}

fn object_key(prefix: Option<&str>, blob_name: &str) -> String {
    match prefix.map(|p| p.trim_matches('/')).filter(|p| !p.is_empty()) {
        Some(prefix) => format!("{}/{}", prefix, blob_name),
        None => blob_name.to_string(),
    }
}
