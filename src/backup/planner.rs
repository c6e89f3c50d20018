// volume-backup/src/backup/planner.rs
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone};

use crate::errors::{AppError, Result};

/// Directory inside the helper container where the host backup directory is mounted.
pub const HELPER_BACKUP_DIR: &str = "/backup";

const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M";

/// A named volume attached to a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeMount {
    pub name: String,
    pub mount_path: String,
}

/// One planned archival of a single volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveJob {
    pub volume: VolumeMount,
    pub output_filename: String,
    pub command: Vec<String>,
}

impl ArchiveJob {
    /// Where the archive lands on the host once the helper has written it.
    pub fn host_path(&self, host_backup_dir: &Path) -> PathBuf {
        host_backup_dir.join(&self.output_filename)
    }
}

impl fmt::Display for ArchiveJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.command.join(" "))
    }
}

/// Builds one tar job per volume, all stamped with the same run timestamp.
///
/// Volume names must be unique within the run since they make up the output
/// filename; a repeated name is rejected before anything is launched.
pub fn plan_archive_jobs<Tz>(volumes: &[VolumeMount], timestamp: &DateTime<Tz>) -> Result<Vec<ArchiveJob>>
where
    Tz: TimeZone,
    Tz::Offset: fmt::Display,
{
    let stamp = timestamp.format(TIMESTAMP_FORMAT).to_string();
    let mut seen = HashSet::new();

    volumes
        .iter()
        .map(|volume| {
            if !seen.insert(volume.name.as_str()) {
                return Err(AppError::DuplicateVolume(volume.name.clone()));
            }
            let output_filename = format!("{}-{}.tar", volume.name, stamp);
            let destination = format!("{}/{}", HELPER_BACKUP_DIR, output_filename);
            Ok(ArchiveJob {
                volume: volume.clone(),
                command: vec![
                    "tar".to_string(),
                    "cvf".to_string(),
                    destination,
                    volume.mount_path.clone(),
                ],
                output_filename,
            })
        })
        .collect()
}
