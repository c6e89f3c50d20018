//! In-memory stand-ins for the container runtime and object storage.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::backup::docker::{ContainerBackend, HelperOutcome, HelperRun};
use crate::backup::planner::VolumeMount;
use crate::backup::s3_upload::ObjectStorage;
use crate::errors::{AppError, Result};

/// Ordered record of calls made against the fakes, shared between them.
pub type Journal = Arc<Mutex<Vec<String>>>;

/// Scripted container runtime. Launch and wait results are keyed by the
/// volume mount path, which is the last argument of the tar command.
#[derive(Default)]
pub struct FakeBackend {
    pub containers: HashMap<String, Vec<VolumeMount>>,
    pub launch_failures: HashMap<String, fn() -> AppError>,
    pub outcomes: HashMap<String, HelperOutcome>,
    pub timeouts: Vec<String>,
    pub write_archives: bool,
    pub launches: Mutex<Vec<Vec<String>>>,
    pub launch_dirs: Mutex<Vec<PathBuf>>,
    pub discarded: Mutex<Vec<String>>,
    pub journal: Journal,
}

impl FakeBackend {
    pub fn with_container(mut self, name: &str, volumes: &[(&str, &str)]) -> Self {
        let mounts = volumes
            .iter()
            .map(|(n, p)| VolumeMount {
                name: n.to_string(),
                mount_path: p.to_string(),
            })
            .collect();
        self.containers.insert(name.to_string(), mounts);
        self
    }

    pub fn launch_count(&self) -> usize {
        self.launches.lock().unwrap().len()
    }
}

#[async_trait]
impl ContainerBackend for FakeBackend {
    async fn get_volumes(&self, container_name: &str) -> Result<Vec<VolumeMount>> {
        self.containers
            .get(container_name)
            .cloned()
            .ok_or_else(|| AppError::ContainerNotFound(container_name.to_string()))
    }

    async fn run_archive_job(
        &self,
        host_backup_dir: &Path,
        _source_container: &str,
        command: &[String],
    ) -> Result<HelperRun> {
        let source = command.last().cloned().unwrap_or_default();
        self.launches.lock().unwrap().push(command.to_vec());
        self.launch_dirs.lock().unwrap().push(host_backup_dir.to_path_buf());
        self.journal.lock().unwrap().push(format!("launch {}", source));

        if let Some(make_err) = self.launch_failures.get(&source) {
            return Err(make_err());
        }
        if self.write_archives {
            let filename = command[2].trim_start_matches("/backup/");
            fs::write(host_backup_dir.join(filename), b"tar")?;
        }
        Ok(HelperRun { id: source })
    }

    async fn wait_for_completion(&self, run: &HelperRun, timeout: Duration) -> Result<HelperOutcome> {
        if self.timeouts.contains(&run.id) {
            return Err(AppError::HelperTimeout {
                helper: run.id.clone(),
                timeout,
            });
        }
        Ok(self
            .outcomes
            .get(&run.id)
            .copied()
            .unwrap_or(HelperOutcome::Exited { status_code: 0 }))
    }

    async fn discard(&self, run: &HelperRun) {
        self.discarded.lock().unwrap().push(run.id.clone());
    }
}

/// Object storage that records every call and can be told to fail.
#[derive(Default)]
pub struct RecordingStorage {
    pub fail_on: Option<String>,
    pub unreachable: bool,
    pub calls: Mutex<Vec<(PathBuf, String)>>,
    pub journal: Journal,
}

#[async_trait]
impl ObjectStorage for RecordingStorage {
    async fn check_connection(&self) -> Result<()> {
        self.journal.lock().unwrap().push("check".to_string());
        if self.unreachable {
            return Err(AppError::StorageUnavailable("bucket backup is not accessible".to_string()));
        }
        Ok(())
    }

    async fn upload(&self, local_path: &Path, blob_name: &str) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push((local_path.to_path_buf(), blob_name.to_string()));
        self.journal.lock().unwrap().push(format!("upload {}", blob_name));
        if self.fail_on.as_deref() == Some(blob_name) {
            return Err(AppError::StorageUnavailable("403 Forbidden".to_string()));
        }
        Ok(())
    }
}
