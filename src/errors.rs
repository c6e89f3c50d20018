use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    #[error("Invalid container name: {0:?}")]
    InvalidContainerName(String),

    #[error("Backup root directory does not exist: {}", .0.display())]
    BackupDirectoryUnavailable(PathBuf),

    #[error("Container runtime unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Container runtime error: {0}")]
    Runtime(String),

    #[error("Helper container {helper} did not finish within {}s", .timeout.as_secs())]
    HelperTimeout { helper: String, timeout: Duration },

    #[error("Volume {0} is mounted more than once in the same container")]
    DuplicateVolume(String),

    #[error("Object storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Archive file cannot be opened: {}", .0.display())]
    LocalFileMissing(PathBuf),
}

impl AppError {
    /// Failures an operator can reasonably re-run without changing anything.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::HelperTimeout { .. }
                | AppError::BackendUnavailable(_)
                | AppError::StorageUnavailable(_)
        )
    }
}

impl From<bollard::errors::Error> for AppError {
    fn from(err: bollard::errors::Error) -> Self {
        use bollard::errors::Error as DockerError;
        match err {
            DockerError::DockerResponseServerError { status_code, message } => {
                AppError::Runtime(format!("{} (HTTP {})", message, status_code))
            }
            DockerError::DockerContainerWaitError { error, code } => {
                AppError::Runtime(format!("helper exited with code {}: {}", code, error))
            }
            other => AppError::BackendUnavailable(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
