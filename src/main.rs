//! Scheduled-style backup companion
//!
//! Dumps databases and copies directories, archives the result per job and
//! uploads the archive to S3-compatible storage.

// backupcompanion/src/main.rs
mod backup;
mod config;
mod errors;
mod utils;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use backup::BackupContext;
use config::{Config, DEFAULT_CONFIG_PATH, ValidatedConfig};
use errors::AppError;

#[derive(Parser, Debug)]
#[command(name = "backupcompanion", version, about = "Back up databases and directories to S3-compatible storage")]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[arg(long, global = true, value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Run every configured backup job
    Backup,
    /// Check the configuration and probe every database and destination
    Validate,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(cli.log_level.as_filter()))
        .init();

    match run_app(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run_app(cli: Cli) -> Result<ExitCode> {
    let config = load_config(&cli.config)?;
    let cancel = CancellationToken::new();
    cancel_on_interrupt(cancel.clone());
    let ctx = BackupContext::new(config, cancel);

    match cli.command {
        Command::Backup => {
            info!(config = %cli.config.display(), "Starting backup process");
            let reports = backup::run_backup_flow(Arc::new(ctx)).await;
            // Per-job failures are already logged and do not change the exit code.
            info!(jobs = reports.len(), "Backup process finished");
            Ok(ExitCode::SUCCESS)
        }
        Command::Validate => {
            let failures = backup::check_connectivity(&ctx).await;
            if failures.is_empty() {
                info!("Configuration valid and every database and destination is reachable");
                Ok(ExitCode::SUCCESS)
            } else {
                error!(failures = failures.len(), "Connectivity checks failed");
                Ok(ExitCode::FAILURE)
            }
        }
    }
}

fn load_config(path: &Path) -> Result<ValidatedConfig> {
    let config = Config::load(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    let validated = config
        .validate()
        .map_err(|errors| {
            error!(violations = errors.len(), "Configuration validation failed");
            AppError::InvalidConfig(errors)
        })
        .with_context(|| format!("Configuration in {} is not usable", path.display()))?;
    info!(
        jobs = validated.jobs.len(),
        databases = validated.sources.databases.len(),
        directories = validated.sources.directories.len(),
        destinations = validated.destinations.len(),
        "Configuration loaded"
    );
    Ok(validated)
}

fn cancel_on_interrupt(cancel: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Interrupt received, cancelling running jobs");
                cancel.cancel();
            }
            Err(e) => warn!(error = %e, "Could not listen for interrupt signal"),
        }
    });
}
