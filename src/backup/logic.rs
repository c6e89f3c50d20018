use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::Local;
use tracing::{debug, error, info, warn};

use crate::backup::docker::{ContainerBackend, HelperOutcome};
use crate::backup::planner::{ArchiveJob, plan_archive_jobs};
use crate::config::{BackupConfig, validate_container_name};
use crate::errors::{AppError, Result};

/// Outcome of backing up one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupRun {
    pub container_name: String,
    pub backup_directory: PathBuf,
    pub volumes_discovered: usize,
    /// Host paths of the archives that were written, in volume discovery order.
    pub produced_archives: Vec<PathBuf>,
}

pub struct BackupOrchestrator<'a, B: ContainerBackend + ?Sized> {
    backend: &'a B,
    backup_root: PathBuf,
    helper_timeout: Duration,
}

impl<'a, B: ContainerBackend + ?Sized> BackupOrchestrator<'a, B> {
    pub fn new(backend: &'a B, config: &BackupConfig) -> Self {
        Self {
            backend,
            backup_root: config.backup_root.clone(),
            helper_timeout: config.helper_timeout,
        }
    }

    /// Archives every named volume of `container_name` into `{root}/{container_name}`.
    ///
    /// Discovery and directory failures abort the run. A volume whose helper
    /// fails to launch, exits non-zero or times out is logged and left out of
    /// `produced_archives`; the remaining volumes are still attempted.
    pub async fn backup(&self, container_name: &str) -> Result<BackupRun> {
        validate_container_name(container_name)?;

        let volumes = self
            .backend
            .get_volumes(container_name)
            .await
            .map_err(|e| log_fatal(container_name, "discover volumes", e))?;

        let backup_directory = ensure_backup_directory(&self.backup_root, container_name)
            .map_err(|e| log_fatal(container_name, "prepare backup directory", e))?;

        let mut run = BackupRun {
            container_name: container_name.to_string(),
            backup_directory,
            volumes_discovered: volumes.len(),
            produced_archives: Vec::new(),
        };

        if volumes.is_empty() {
            info!(container = %container_name, "Container has no volumes, nothing to back up");
            return Ok(run);
        }

        let jobs = plan_archive_jobs(&volumes, &Local::now())
            .map_err(|e| log_fatal(container_name, "plan archive jobs", e))?;

        for job in &jobs {
            match self.run_job(container_name, &run.backup_directory, job).await {
                Ok(archive) => {
                    info!(container = %container_name, volume = %job.volume.name, archive = %archive.display(), "Volume archived");
                    run.produced_archives.push(archive);
                }
                Err(e) => {
                    warn!(
                        container = %container_name,
                        volume = %job.volume.name,
                        retryable = e.is_retryable(),
                        "Skipping volume: {}",
                        e
                    );
                }
            }
        }

        info!(
            container = %container_name,
            produced = run.produced_archives.len(),
            discovered = run.volumes_discovered,
            "Backup for container completed"
        );
        Ok(run)
    }

    async fn run_job(&self, container_name: &str, backup_directory: &Path, job: &ArchiveJob) -> Result<PathBuf> {
        let archive = job.host_path(backup_directory);
        let previous = modified_time(&archive);
        debug!(container = %container_name, command = %job, "Launching helper container");

        let helper = self
            .backend
            .run_archive_job(backup_directory, container_name, &job.command)
            .await?;

        let outcome = match self.backend.wait_for_completion(&helper, self.helper_timeout).await {
            Err(e @ AppError::HelperTimeout { .. }) => {
                self.backend.discard(&helper).await;
                return Err(e);
            }
            other => other?,
        };

        match outcome {
            HelperOutcome::Exited { status_code: 0 } => Ok(archive),
            HelperOutcome::Exited { status_code } => Err(AppError::Runtime(format!(
                "helper {} exited with code {} while archiving {}",
                helper.id, status_code, job.volume.mount_path
            ))),
            // Auto-removed before we could read its exit code; trust the file only if this run wrote it.
            HelperOutcome::Removed if written_since(&archive, previous) => Ok(archive),
            HelperOutcome::Removed => Err(AppError::Runtime(format!(
                "helper {} was removed and {} was not written",
                helper.id,
                archive.display()
            ))),
        }
    }
}

/// Creates `{root}/{container_name}` if needed and returns its absolute path.
/// The root itself must already exist.
fn ensure_backup_directory(root: &Path, container_name: &str) -> Result<PathBuf> {
    if !root.is_dir() {
        return Err(AppError::BackupDirectoryUnavailable(root.to_path_buf()));
    }
    let dir = root.join(container_name);
    fs::create_dir_all(&dir)?;
    // Docker only accepts absolute bind sources.
    Ok(fs::canonicalize(&dir)?)
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// True when `archive` exists and was created or rewritten after `previous` was sampled.
fn written_since(archive: &Path, previous: Option<SystemTime>) -> bool {
    archive.is_file() && modified_time(archive).is_some_and(|now| previous != Some(now))
}

fn log_fatal(container_name: &str, step: &str, err: AppError) -> AppError {
    error!(container = %container_name, step, "Backup failed: {}", err);
    err
}
