// backupcompanion/src/backup/mod.rs
pub(crate) mod archive;
pub(crate) mod db_dump;
pub(crate) mod dir_copy;
pub(crate) mod logic;
pub(crate) mod s3_upload;
pub(crate) mod workspace;

#[cfg(test)]
pub(crate) mod testing;

use futures::future::join_all;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, warn};

use crate::config::ValidatedConfig;
use crate::errors::AppError;
use db_dump::{DatabaseBackend, ExternalDumpTool};
use logic::{JobOutcome, JobReport};
use s3_upload::{S3Connector, StoreConnector};

/// Everything a job run needs, shared read-only across concurrently running jobs.
pub struct BackupContext {
    pub config: ValidatedConfig,
    pub databases: Arc<dyn DatabaseBackend>,
    pub stores: Arc<dyn StoreConnector>,
    pub cancel: CancellationToken,
}

impl BackupContext {
    /// Uses the external dump tools and the S3 SDK.
    pub fn new(config: ValidatedConfig, cancel: CancellationToken) -> Self {
        Self::with_backends(
            config,
            Arc::new(ExternalDumpTool::new()),
            Arc::new(S3Connector::new()),
            cancel,
        )
    }

    pub fn with_backends(
        config: ValidatedConfig,
        databases: Arc<dyn DatabaseBackend>,
        stores: Arc<dyn StoreConnector>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            databases,
            stores,
            cancel,
        }
    }
}

/// Runs every configured job concurrently and returns one report per job,
/// in job-name order.
///
/// Each job runs in its own task so a panic in one cannot take down the
/// others; a panicked job is reported as aborted.
pub async fn run_backup_flow(ctx: Arc<BackupContext>) -> Vec<JobReport> {
    let job_count = ctx.config.jobs.len();
    if job_count == 0 {
        warn!("No backup jobs configured");
        return Vec::new();
    }
    info!(jobs = job_count, "Starting backup jobs");

    let handles: Vec<_> = ctx
        .config
        .jobs
        .iter()
        .map(|(name, job)| {
            let ctx = Arc::clone(&ctx);
            let (task_name, job) = (name.clone(), job.clone());
            let span = info_span!("job", job = %name);
            let handle = tokio::spawn(
                async move { logic::run_job(&ctx, &task_name, &job).await }.instrument(span),
            );
            (name.clone(), handle)
        })
        .collect();

    let mut reports = Vec::with_capacity(handles.len());
    for (name, handle) in handles {
        match handle.await {
            Ok(report) => reports.push(report),
            Err(e) => {
                error!(job = %name, error = %e, "Backup job task failed");
                reports.push(JobReport::aborted(
                    &name,
                    AppError::InvalidInput(format!("job task failed: {e}")),
                ));
            }
        }
    }

    log_summary(&reports);
    reports
}

fn log_summary(reports: &[JobReport]) {
    for report in reports {
        let job = report.job_name.as_str();
        match &report.outcome {
            JobOutcome::SkippedValidation(errors) => {
                warn!(job, failures = errors.len(), "Job skipped, validation failed")
            }
            JobOutcome::Aborted(e) => error!(job, error = %e, "Job aborted"),
            JobOutcome::SkippedArchive(e) => error!(job, error = %e, "Job produced no archive"),
            JobOutcome::Cancelled => warn!(job, "Job cancelled"),
            JobOutcome::Completed | JobOutcome::CompletedWithUploadErrors => {
                let failed_sources: Vec<&str> =
                    report.failed_sources().map(|(name, _)| name).collect();
                let failed_destinations: Vec<&str> = report
                    .destinations
                    .iter()
                    .filter(|d| d.result.is_err())
                    .map(|d| d.name.as_str())
                    .collect();
                if failed_sources.is_empty() && failed_destinations.is_empty() {
                    info!(job, key = ?report.archive_key, "Job succeeded");
                } else {
                    warn!(job, ?failed_sources, ?failed_destinations, "Job completed with failures");
                }
            }
        }
    }

    let succeeded = reports.iter().filter(|r| r.is_success()).count();
    let cancelled = reports
        .iter()
        .filter(|r| matches!(r.outcome, JobOutcome::Cancelled))
        .count();
    let failed = reports.len() - succeeded - cancelled;

    if failed == 0 && cancelled == 0 {
        info!(succeeded, "All backup jobs finished");
    } else {
        warn!(succeeded, failed, cancelled, "Backup jobs finished with problems");
    }
}

/// Probes every configured database and destination, whether or not a job
/// references it. Returns one error per unreachable unit.
pub async fn check_connectivity(ctx: &BackupContext) -> Vec<AppError> {
    let databases = ctx
        .config
        .sources
        .databases
        .keys()
        .map(|name| logic::probe_database(ctx, name));
    let destinations = ctx
        .config
        .destinations
        .keys()
        .map(|name| logic::probe_destination(ctx, name));

    let (databases, destinations) = tokio::join!(join_all(databases), join_all(destinations));

    let errors: Vec<AppError> = databases
        .into_iter()
        .chain(destinations)
        .filter_map(|r| r.err())
        .collect();
    for e in &errors {
        error!(error = %e, "Connectivity check failed");
    }
    errors
}
