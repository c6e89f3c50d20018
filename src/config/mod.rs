// volume-backup/src/config/mod.rs
use std::path::PathBuf;
use std::time::Duration;

use regex::Regex;

use crate::errors::{AppError, Result};

const DEFAULT_BACKUP_ROOT: &str = "./backups";
const DEFAULT_BACKUP_IMAGE: &str = "busybox";
const DEFAULT_HELPER_TIMEOUT_SECS: u64 = 3600;
const DEFAULT_LOG_FILE: &str = "backup.log";
const DEFAULT_STORAGE_REGION: &str = "us-east-1";
const DEFAULT_STORAGE_BUCKET: &str = "backup";

// S3-compatible object storage settings
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub endpoint_url: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket_name: String,
    pub folder_prefix: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BackupConfig {
    pub backup_root: PathBuf,
    pub helper_image: String,
    pub helper_timeout: Duration,
    pub docker_host: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub backup: BackupConfig,
    pub storage: Option<StorageConfig>,
    /// Some storage variables were set but not the full required set.
    pub storage_incomplete: bool,
    pub log_file: Option<PathBuf>,
}

impl AppConfig {
    /// Reads the configuration from the process environment, after loading a
    /// `.env` file when one is present.
    pub fn from_env() -> Result<Self> {
        let _ = dotenv::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup. Empty values
    /// count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let helper_timeout = match get("HELPER_TIMEOUT_SECS") {
            Some(raw) => parse_timeout_secs(&raw)?,
            None => Duration::from_secs(DEFAULT_HELPER_TIMEOUT_SECS),
        };

        let backup = BackupConfig {
            backup_root: PathBuf::from(get("BACKUP_ROOT").unwrap_or_else(|| DEFAULT_BACKUP_ROOT.to_string())),
            helper_image: get("BACKUP_IMAGE").unwrap_or_else(|| DEFAULT_BACKUP_IMAGE.to_string()),
            helper_timeout,
            docker_host: get("DOCKER_HOST"),
        };

        // LOG_FILE set but empty disables the file sink
        let log_file = match lookup("LOG_FILE") {
            Some(v) if v.trim().is_empty() => None,
            Some(v) => Some(PathBuf::from(v.trim())),
            None => Some(PathBuf::from(DEFAULT_LOG_FILE)),
        };

        let (storage, storage_incomplete) = load_storage_config(&get);
        Ok(AppConfig {
            backup,
            storage,
            storage_incomplete,
            log_file,
        })
    }

    /// Storage settings, or a configuration error naming the missing variables.
    pub fn require_storage(&self) -> Result<&StorageConfig> {
        self.storage.as_ref().ok_or_else(|| {
            AppError::Config(
                "upload requested but STORAGE_ENDPOINT_URL, STORAGE_ACCESS_KEY_ID and \
                 STORAGE_SECRET_ACCESS_KEY are not all set"
                    .to_string(),
            )
        })
    }
}

/// Storage settings, plus whether a partial set of storage variables was ignored.
fn load_storage_config<G>(get: &G) -> (Option<StorageConfig>, bool)
where
    G: Fn(&str) -> Option<String>,
{
    let endpoint = get("STORAGE_ENDPOINT_URL");
    let key_id = get("STORAGE_ACCESS_KEY_ID");
    let secret = get("STORAGE_SECRET_ACCESS_KEY");

    match (endpoint, key_id, secret) {
        (Some(endpoint_url), Some(access_key_id), Some(secret_access_key)) => (
            Some(StorageConfig {
                endpoint_url,
                region: get("STORAGE_REGION").unwrap_or_else(|| DEFAULT_STORAGE_REGION.to_string()),
                access_key_id,
                secret_access_key,
                bucket_name: get("STORAGE_BUCKET").unwrap_or_else(|| DEFAULT_STORAGE_BUCKET.to_string()),
                folder_prefix: get("STORAGE_PREFIX"),
            }),
            false,
        ),
        (None, None, None) => (None, false),
        _ => (None, true),
    }
}

fn parse_timeout_secs(raw: &str) -> Result<Duration> {
    let secs: u64 = raw
        .parse()
        .map_err(|_| AppError::Config(format!("HELPER_TIMEOUT_SECS must be a whole number of seconds, got {:?}", raw)))?;
    if secs == 0 {
        return Err(AppError::Config("HELPER_TIMEOUT_SECS must be greater than zero".to_string()));
    }
    Ok(Duration::from_secs(secs))
}

/// Checks a container name before it is used as a directory name or blob prefix.
pub fn validate_container_name(name: &str) -> Result<()> {
    let pattern = Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9_.-]*$")
        .map_err(|e| AppError::Config(format!("container name pattern: {}", e)))?;
    if pattern.is_match(name) {
        Ok(())
    } else {
        Err(AppError::InvalidContainerName(name.to_string()))
    }
}
