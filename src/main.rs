//! Docker Volume Backup Tool
//!
//! Archives the named volumes of a container to tar files on the host and
//! optionally uploads them to object storage.

// volume-backup/src/main.rs
mod backup;
mod config;
mod errors;

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use config::AppConfig;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "volume-backup", version, about = "Docker volume backup tool")]
struct Cli {
    /// Container whose volumes are backed up
    #[arg(short, long)]
    container: String,

    /// Upload the archives to object storage
    #[arg(short, long)]
    upload: bool,

    /// Root backup directory; must already exist (overrides BACKUP_ROOT)
    #[arg(long)]
    backup_root: Option<PathBuf>,

    /// Helper image used to run tar (overrides BACKUP_IMAGE)
    #[arg(long)]
    image: Option<String>,

    /// Seconds to wait for each helper container (overrides HELPER_TIMEOUT_SECS)
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    timeout: Option<u64>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

/// Main entry point for the backup tool
#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let app_config = match AppConfig::from_env() {
        Ok(config) => apply_overrides(config, &cli),
        Err(e) => {
            eprintln!("❌ Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_logging(cli.debug, app_config.log_file.as_deref()) {
        eprintln!("❌ Error: {:?}", e);
        return ExitCode::FAILURE;
    }

    if app_config.storage_incomplete {
        warn!(
            "Storage configuration is incomplete (STORAGE_ENDPOINT_URL, STORAGE_ACCESS_KEY_ID and \
             STORAGE_SECRET_ACCESS_KEY are all required). Uploads are disabled."
        );
    }

    match run_app(&app_config, &cli).await {
        Ok(_) => {
            info!(container = %cli.container, "Operation completed successfully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(container = %cli.container, "{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_app(app_config: &AppConfig, cli: &Cli) -> Result<()> {
    info!(
        container = %cli.container,
        backup_root = %app_config.backup.backup_root.display(),
        upload = cli.upload,
        "Starting volume backup"
    );
    backup::run_backup_flow(app_config, &cli.container, cli.upload)
        .await
        .context("Backup process failed")
}

fn apply_overrides(mut config: AppConfig, cli: &Cli) -> AppConfig {
    if let Some(root) = &cli.backup_root {
        config.backup.backup_root = root.clone();
    }
    if let Some(image) = &cli.image {
        config.backup.helper_image = image.clone();
    }
    if let Some(secs) = cli.timeout {
        config.backup.helper_timeout = Duration::from_secs(secs);
    }
    config
}

/// Logs to stdout and, when configured, appends plain-text lines to `log_file`.
fn init_logging(debug: bool, log_file: Option<&Path>) -> Result<()> {
    let filter = if debug { "volume_backup=debug" } else { "volume_backup=info" };

    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(file_layer)
        .init();
    Ok(())
}
