//! Docker integration
//!
//! Reads a container's volume mounts and runs disposable helper containers
//! that archive those volumes into a host directory.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, MountPoint, MountPointTypeEnum};
use futures::{StreamExt, TryStreamExt};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::backup::planner::{HELPER_BACKUP_DIR, VolumeMount};
use crate::config::BackupConfig;
use crate::errors::{AppError, Result};

const DOCKER_CONNECT_TIMEOUT_SECS: u64 = 120;
const HELPER_LABEL: &str = "volume-backup.source";

/// Handle to a helper container that was created and started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperRun {
    pub id: String,
}

/// How a helper container finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelperOutcome {
    Exited { status_code: i64 },
    /// The runtime had already removed the helper when we asked for its status.
    Removed,
}

#[async_trait]
pub trait ContainerBackend: Send + Sync {
    /// Named volumes mounted by `container_name`, in the order the runtime reports them.
    async fn get_volumes(&self, container_name: &str) -> Result<Vec<VolumeMount>>;

    /// Starts an auto-removing helper that shares the source container's volumes,
    /// mounts `host_backup_dir` at `/backup` and runs `command`.
    async fn run_archive_job(&self, host_backup_dir: &Path, source_container: &str, command: &[String])
    -> Result<HelperRun>;

    async fn wait_for_completion(&self, run: &HelperRun, timeout: Duration) -> Result<HelperOutcome>;

    /// Force-removes a helper that is no longer waited on. Failures are logged, not returned.
    async fn discard(&self, run: &HelperRun);
}

pub struct DockerBackend {
    docker: Docker,
    image: String,
    image_ready: OnceCell<()>,
}

impl DockerBackend {
    /// Connects to the Docker daemon and checks that it answers.
    pub async fn connect(config: &BackupConfig) -> Result<Self> {
        let docker = connect_docker(config.docker_host.as_deref())?;
        docker
            .ping()
            .await
            .map_err(|e| AppError::BackendUnavailable(format!("Docker daemon did not answer ping: {}", e)))?;
        debug!(image = %config.helper_image, "Connected to Docker daemon");

        Ok(Self {
            docker,
            image: config.helper_image.clone(),
            image_ready: OnceCell::new(),
        })
    }

    /// Pulls the helper image once per backend if the daemon does not have it.
    async fn ensure_image(&self) -> Result<()> {
        self.image_ready
            .get_or_try_init(|| async {
                match self.docker.inspect_image(&self.image).await {
                    Ok(_) => Ok(()),
                    Err(DockerError::DockerResponseServerError { status_code: 404, .. }) => {
                        info!(image = %self.image, "Pulling helper image");
                        let options = CreateImageOptions {
                            from_image: self.image.clone(),
                            ..Default::default()
                        };
                        self.docker
                            .create_image(Some(options), None, None)
                            .try_collect::<Vec<_>>()
                            .await
                            .map_err(|e| AppError::Runtime(format!("failed to pull image {}: {}", self.image, e)))?;
                        Ok(())
                    }
                    Err(e) => Err(AppError::from(e)),
                }
            })
            .await
            .map(|_| ())
    }

    async fn discard_helper(&self, id: &str) {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        if let Err(e) = self.docker.remove_container(id, Some(options)).await {
            warn!(helper = %id, "Failed to remove helper container, it may still be running: {}", e);
        }
    }
}

#[async_trait]
impl ContainerBackend for DockerBackend {
    async fn get_volumes(&self, container_name: &str) -> Result<Vec<VolumeMount>> {
        let inspect = match self.docker.inspect_container(container_name, None).await {
            Ok(inspect) => inspect,
            Err(DockerError::DockerResponseServerError { status_code: 404, .. }) => {
                return Err(AppError::ContainerNotFound(container_name.to_string()));
            }
            Err(e) => return Err(AppError::from(e)),
        };
        Ok(named_volumes(inspect.mounts.unwrap_or_default()))
    }

    async fn run_archive_job(
        &self,
        host_backup_dir: &Path,
        source_container: &str,
        command: &[String],
    ) -> Result<HelperRun> {
        self.ensure_image().await?;

        let config = helper_config(&self.image, host_backup_dir, source_container, command);
        let created = self.docker.create_container::<String, String>(None, config).await?;
        for warning in &created.warnings {
            warn!(helper = %created.id, "Docker warning: {}", warning);
        }

        if let Err(e) = self.docker.start_container(&created.id, None::<StartContainerOptions<String>>).await {
            self.discard_helper(&created.id).await;
            return Err(AppError::from(e));
        }

        debug!(helper = %created.id, container = %source_container, "Helper container started");
        Ok(HelperRun { id: created.id })
    }

    async fn wait_for_completion(&self, run: &HelperRun, timeout: Duration) -> Result<HelperOutcome> {
        let options = WaitContainerOptions {
            condition: "not-running".to_string(),
        };
        let mut stream = Box::pin(self.docker.wait_container(&run.id, Some(options)));

        let next = tokio::time::timeout(timeout, stream.next())
            .await
            .map_err(|_| AppError::HelperTimeout {
                helper: run.id.clone(),
                timeout,
            })?;

        match next {
            Some(Ok(response)) => Ok(HelperOutcome::Exited {
                status_code: response.status_code,
            }),
            Some(Err(DockerError::DockerContainerWaitError { code, .. })) => {
                Ok(HelperOutcome::Exited { status_code: code })
            }
            Some(Err(DockerError::DockerResponseServerError { status_code: 404, .. })) | None => {
                Ok(HelperOutcome::Removed)
            }
            Some(Err(e)) => Err(AppError::from(e)),
        }
    }

    async fn discard(&self, run: &HelperRun) {
        info!(helper = %run.id, "Removing helper container");
        self.discard_helper(&run.id).await;
    }
}

fn connect_docker(host: Option<&str>) -> Result<Docker> {
    let connected = match host {
        None => Docker::connect_with_local_defaults(),
        Some(addr) if addr.starts_with("unix://") => {
            Docker::connect_with_unix(addr, DOCKER_CONNECT_TIMEOUT_SECS, bollard::API_DEFAULT_VERSION)
        }
        Some(addr) if addr.starts_with("tcp://") || addr.starts_with("http://") => {
            Docker::connect_with_http(addr, DOCKER_CONNECT_TIMEOUT_SECS, bollard::API_DEFAULT_VERSION)
        }
        Some(addr) => {
            return Err(AppError::Config(format!(
                "DOCKER_HOST must start with unix://, tcp:// or http://, got {}",
                addr
            )));
        }
    };
    connected.map_err(|e| AppError::BackendUnavailable(format!("Failed to connect to Docker daemon: {}", e)))
}

/// Keeps only named volumes; bind mounts, tmpfs and the rest are skipped.
fn named_volumes(mounts: Vec<MountPoint>) -> Vec<VolumeMount> {
    mounts
        .into_iter()
        .filter(|m| m.typ == Some(MountPointTypeEnum::VOLUME))
        .filter_map(|m| match (m.name, m.destination) {
            (Some(name), Some(mount_path)) => Some(VolumeMount { name, mount_path }),
            _ => None,
        })
        .collect()
}

fn helper_config(image: &str, host_backup_dir: &Path, source_container: &str, command: &[String]) -> Config<String> {
    let bind = format!("{}:{}:rw", host_backup_dir.display(), HELPER_BACKUP_DIR);
    let mut labels = HashMap::new();
    labels.insert(HELPER_LABEL.to_string(), source_container.to_string());

    Config {
        image: Some(image.to_string()),
        cmd: Some(command.to_vec()),
        labels: Some(labels),
        host_config: Some(HostConfig {
            auto_remove: Some(true),
            volumes_from: Some(vec![source_container.to_string()]),
            binds: Some(vec![bind]),
            ..Default::default()
        }),
        ..Default::default()
    }
}
