mod logic;
pub(crate) mod docker; // Docker helper containers
pub(crate) mod planner; // tar job planning
pub(crate) mod s3_upload;
pub(crate) mod upload;
#[cfg(test)]
mod test_support;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::{AppConfig, BackupConfig};
use docker::{ContainerBackend, DockerBackend};
use logic::{BackupOrchestrator, BackupRun};
use s3_upload::{ObjectStorage, S3Storage};

/// Public entry point for the backup process: archives every volume of
/// `container_name`, then uploads the archives when `upload` is set.
pub async fn run_backup_flow(app_config: &AppConfig, container_name: &str, upload: bool) -> Result<()> {
    // Fail on missing storage settings before any helper container runs.
    let storage = if upload {
        Some(S3Storage::new(app_config.require_storage()?).await)
    } else {
        None
    };

    let backend = DockerBackend::connect(&app_config.backup)
        .await
        .context("Cannot reach the container runtime")?;

    backup_and_upload(backend, storage.as_ref(), &app_config.backup, container_name).await?;
    Ok(())
}

/// Archives the volumes through `backend`, releases it, then uploads the
/// produced archives to `storage` when one is given.
///
/// The storage connection is only checked when there is something to upload.
pub(crate) async fn backup_and_upload<B, S>(
    backend: B,
    storage: Option<&S>,
    backup_config: &BackupConfig,
    container_name: &str,
) -> Result<BackupRun>
where
    B: ContainerBackend,
    S: ObjectStorage + ?Sized,
{
    let archived = BackupOrchestrator::new(&backend, backup_config)
        .backup(container_name)
        .await;
    drop(backend);
    let run = archived.with_context(|| format!("Backup of container {} failed", container_name))?;

    match storage {
        Some(storage) if !run.produced_archives.is_empty() => {
            storage
                .check_connection()
                .await
                .context("Object storage check failed")?;
            upload::upload_all(storage, &run.container_name, &run.produced_archives)
                .await
                .with_context(|| format!("Uploading archives of container {} failed", run.container_name))?;
        }
        Some(_) => info!(container = %container_name, "No archives produced, nothing to upload"),
        None => {}
    }
    Ok(run)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::docker::HelperOutcome;
    use crate::backup::test_support::{FakeBackend, Journal, RecordingStorage};
    use crate::errors::AppError;
    use std::path::Path;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tempfile::TempDir;

    fn backup_config(root: &Path) -> BackupConfig {
        BackupConfig {
            backup_root: root.to_path_buf(),
            helper_image: "busybox".to_string(),
            helper_timeout: Duration::from_secs(5),
            docker_host: None,
        }
    }

    fn journal_of(journal: &Journal) -> Vec<String> {
        journal.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn test_upload_without_storage_settings_fails_before_runtime_is_contacted() -> anyhow::Result<()> {
        let root = TempDir::new()?;
        let root_path = root.path().to_string_lossy().into_owned();
        let app_config = AppConfig::from_lookup(|key| match key {
            "BACKUP_ROOT" => Some(root_path.clone()),
            "STORAGE_ENDPOINT_URL" => Some("https://s3.example.com".to_string()),
            // Unroutable, so a premature runtime connection would fail differently.
            "DOCKER_HOST" => Some("tcp://127.0.0.1:9".to_string()),
            _ => None,
        })?;

        let err = run_backup_flow(&app_config, "nginx", true)
            .await
            .expect_err("incomplete storage settings must fail");

        assert!(matches!(err.downcast_ref::<AppError>(), Some(AppError::Config(_))));
        assert!(!root.path().join("nginx").exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_uploads_start_after_every_launch() -> anyhow::Result<()> {
        let root = TempDir::new()?;
        let journal: Journal = Arc::new(Mutex::new(Vec::new()));
        let backend = FakeBackend {
            write_archives: true,
            journal: journal.clone(),
            ..Default::default()
        }
        .with_container("app", &[("pgdata", "/var/lib/postgresql/data"), ("uploads", "/srv/uploads")]);
        let storage = RecordingStorage {
            journal: journal.clone(),
            ..Default::default()
        };

        let run = backup_and_upload(backend, Some(&storage), &backup_config(root.path()), "app").await?;

        let events = journal_of(&journal);
        assert_eq!(events.len(), 5, "unexpected events {:?}", events);
        assert_eq!(events[0], "launch /var/lib/postgresql/data");
        assert_eq!(events[1], "launch /srv/uploads");
        assert_eq!(events[2], "check");
        assert!(events[3].starts_with("upload app/pgdata-"));
        assert!(events[4].starts_with("upload app/uploads-"));

        let uploaded: Vec<_> = storage.calls.lock().unwrap().iter().map(|(path, _)| path.clone()).collect();
        assert_eq!(uploaded, run.produced_archives);
        Ok(())
    }

    #[tokio::test]
    async fn test_no_archives_skips_storage_entirely() -> anyhow::Result<()> {
        let root = TempDir::new()?;
        let journal: Journal = Arc::new(Mutex::new(Vec::new()));
        let mut backend = FakeBackend {
            journal: journal.clone(),
            ..Default::default()
        }
        .with_container("app", &[("data", "/data")]);
        backend
            .outcomes
            .insert("/data".to_string(), HelperOutcome::Exited { status_code: 1 });
        let storage = RecordingStorage {
            unreachable: true,
            journal: journal.clone(),
            ..Default::default()
        };

        let run = backup_and_upload(backend, Some(&storage), &backup_config(root.path()), "app").await?;

        assert!(run.produced_archives.is_empty());
        assert_eq!(journal_of(&journal), vec!["launch /data".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn test_unreachable_storage_uploads_nothing() -> anyhow::Result<()> {
        let root = TempDir::new()?;
        let backend = FakeBackend {
            write_archives: true,
            ..Default::default()
        }
        .with_container("app", &[("data", "/data")]);
        let storage = RecordingStorage {
            unreachable: true,
            ..Default::default()
        };

        let result = backup_and_upload(backend, Some(&storage), &backup_config(root.path()), "app").await;

        let err = result.expect_err("storage check must fail");
        assert!(matches!(err.downcast_ref::<AppError>(), Some(AppError::StorageUnavailable(_))));
        assert!(storage.calls.lock().unwrap().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_without_upload_storage_is_not_touched() -> anyhow::Result<()> {
        let root = TempDir::new()?;
        let backend = FakeBackend::default().with_container("nginx", &[("webdata", "/usr/share/nginx/html")]);

        let run = backup_and_upload(backend, None::<&RecordingStorage>, &backup_config(root.path()), "nginx").await?;

        assert_eq!(run.produced_archives.len(), 1);
        Ok(())
    }
}
