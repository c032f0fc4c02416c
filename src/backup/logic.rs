// backupcompanion/src/backup/logic.rs
//! Per-job pipeline: validate sources and destinations, dump into a fresh
//! working directory, archive it, upload the archive everywhere, clean up.
//!
//! Failures stay inside the unit that produced them. A broken source leaves
//! the other sources' output in the archive, a broken destination does not
//! stop uploads to the others, and nothing here can affect a sibling job.

use futures::future::join_all;
use std::future::Future;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backup::BackupContext;
use crate::backup::archive::create_tar_gz_archive_async;
use crate::backup::dir_copy::copy_directory_async;
use crate::backup::workspace::Workspace;
use crate::config::{Job, JobKind};
use crate::errors::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Database,
    Directory,
}

#[derive(Debug)]
pub struct SourceResult {
    pub name: String,
    pub kind: SourceKind,
    pub result: Result<PathBuf>,
}

#[derive(Debug)]
pub struct DestinationResult {
    pub name: String,
    pub result: Result<()>,
}

/// Terminal state of one job run.
#[derive(Debug)]
pub enum JobOutcome {
    /// A source or destination failed its pre-flight check; nothing was produced.
    SkippedValidation(Vec<AppError>),
    /// The working directory could not be created.
    Aborted(AppError),
    /// Archiving failed, so no upload was attempted.
    SkippedArchive(AppError),
    Cancelled,
    Completed,
    /// At least one destination failed; see [`JobReport::upload_errors`].
    CompletedWithUploadErrors,
}

#[derive(Debug)]
pub struct JobReport {
    pub job_name: String,
    pub outcome: JobOutcome,
    pub sources: Vec<SourceResult>,
    pub destinations: Vec<DestinationResult>,
    pub archive_key: Option<String>,
    pub cleanup_errors: Vec<AppError>,
}

impl JobReport {
    fn new(job_name: &str, outcome: JobOutcome) -> Self {
        Self {
            job_name: job_name.to_string(),
            outcome,
            sources: Vec::new(),
            destinations: Vec::new(),
            archive_key: None,
            cleanup_errors: Vec::new(),
        }
    }

    pub(crate) fn aborted(job_name: &str, err: AppError) -> Self {
        Self::new(job_name, JobOutcome::Aborted(err))
    }

    /// Completed, every source dumped and every destination received the archive.
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, JobOutcome::Completed) && self.failed_sources().next().is_none()
    }

    pub fn failed_sources(&self) -> impl Iterator<Item = (&str, &AppError)> {
        self.sources
            .iter()
            .filter_map(|s| s.result.as_ref().err().map(|e| (s.name.as_str(), e)))
    }

    pub fn upload_errors(&self) -> impl Iterator<Item = &AppError> {
        self.destinations.iter().filter_map(|d| d.result.as_ref().err())
    }
}

/// Runs one job to a terminal state. Never fails as a whole: every error is
/// recorded in the returned report.
pub async fn run_job(ctx: &BackupContext, job_name: &str, job: &Job) -> JobReport {
    info!(
        databases = ?job.databases,
        directories = ?job.directories,
        destinations = ?job.destinations,
        "Starting backup job"
    );

    if ctx.cancel.is_cancelled() {
        warn!("Backup job cancelled before start");
        return JobReport::new(job_name, JobOutcome::Cancelled);
    }

    let source_errors = validate_sources(ctx, job).await;
    if !source_errors.is_empty() {
        return skipped(job_name, "source", source_errors);
    }
    info!("All sources for job validated successfully");

    let destination_errors = validate_destinations(ctx, job).await;
    if !destination_errors.is_empty() {
        return skipped(job_name, "destination", destination_errors);
    }
    info!("All remote destinations for job validated successfully");

    let workspace = match Workspace::create(&job.output) {
        Ok(ws) => ws,
        Err(e) => {
            error!(error = %e, "Failed to create a working directory");
            return JobReport::aborted(job_name, e);
        }
    };

    let mut report = JobReport::new(job_name, JobOutcome::Completed);
    report.archive_key = Some(workspace.archive_key());
    let outcome = execute(ctx, job, &workspace, &mut report).await;
    report.outcome = outcome;

    report.cleanup_errors = workspace.cleanup();
    for e in &report.cleanup_errors {
        error!(error = %e, "Failed to clean up job artifacts");
    }

    log_outcome(&report);
    report
}

fn skipped(job_name: &str, what: &str, errors: Vec<AppError>) -> JobReport {
    if errors.iter().any(AppError::is_cancelled) {
        warn!("Backup job cancelled during {what} validation");
        return JobReport::new(job_name, JobOutcome::Cancelled);
    }
    for e in &errors {
        error!(error = %e, "{what} validation failed");
    }
    error!(
        failures = errors.len(),
        "Skipping backup job due to {what} validation failures"
    );
    JobReport::new(job_name, JobOutcome::SkippedValidation(errors))
}

async fn execute(
    ctx: &BackupContext,
    job: &Job,
    workspace: &Workspace,
    report: &mut JobReport,
) -> JobOutcome {
    report.sources = dump_sources(ctx, job, workspace.working_dir()).await;
    if ctx.cancel.is_cancelled() {
        return JobOutcome::Cancelled;
    }

    let archive = create_tar_gz_archive_async(
        workspace.working_dir().to_path_buf(),
        workspace.archive_path().to_path_buf(),
    )
    .await;
    if let Err(e) = archive {
        error!(error = %e, "Failed to create archive");
        return JobOutcome::SkippedArchive(e);
    }
    info!(archive = %workspace.archive_path().display(), "Successfully created archive");

    if ctx.cancel.is_cancelled() {
        return JobOutcome::Cancelled;
    }

    let key = workspace.archive_key();
    report.destinations = upload_archive(ctx, job, workspace.archive_path(), &key).await;

    if report.upload_errors().any(AppError::is_cancelled) {
        JobOutcome::Cancelled
    } else if report.upload_errors().next().is_some() {
        JobOutcome::CompletedWithUploadErrors
    } else {
        JobOutcome::Completed
    }
}

async fn cancellable<T>(
    cancel: &CancellationToken,
    what: &str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        res = fut => res,
        _ = cancel.cancelled() => Err(AppError::Cancelled(what.to_string())),
    }
}

/// Resolves and probes one configured database.
pub(crate) async fn probe_database(ctx: &BackupContext, name: &str) -> Result<()> {
    let source = ctx.config.sources.databases.get(name).ok_or_else(|| {
        AppError::source_validation(name, AppError::InvalidInput("not defined in sources".into()))
    })?;
    debug!(source = name, "Attempting to validate database connection");
    cancellable(
        &ctx.cancel,
        "database probe",
        ctx.databases.check_connection(name, source),
    )
    .await
    .map_err(|e| AppError::source_validation(name, e))
}

/// Resolves one destination, builds its client and checks the bucket.
pub(crate) async fn probe_destination(ctx: &BackupContext, name: &str) -> Result<()> {
    let wrap = |e| AppError::destination_validation(name, e);
    let destination = ctx
        .config
        .destinations
        .get(name)
        .ok_or_else(|| wrap(AppError::InvalidInput("not defined in destinations".into())))?;
    debug!(destination = name, "Attempting to create S3 client for destination");
    let store = ctx.stores.connect(name, destination).await.map_err(wrap)?;
    cancellable(&ctx.cancel, "bucket check", store.check_connection())
        .await
        .map_err(wrap)?;
    info!(destination = name, bucket = store.bucket(), "Destination validated successfully");
    Ok(())
}

async fn validate_sources(ctx: &BackupContext, job: &Job) -> Vec<AppError> {
    let probes = job.databases.iter().map(|name| probe_database(ctx, name));
    let mut errors: Vec<AppError> = join_all(probes)
        .await
        .into_iter()
        .filter_map(|r| r.err())
        .collect();

    // Directory existence was checked when the config was validated.
    for name in &job.directories {
        if !ctx.config.sources.directories.contains_key(name) {
            errors.push(AppError::source_validation(
                name.as_str(),
                AppError::InvalidInput("not defined in sources".into()),
            ));
        }
    }
    errors
}

async fn validate_destinations(ctx: &BackupContext, job: &Job) -> Vec<AppError> {
    let probes = job.destinations.iter().map(|name| probe_destination(ctx, name));
    join_all(probes)
        .await
        .into_iter()
        .filter_map(|r| r.err())
        .collect()
}

async fn dump_sources(ctx: &BackupContext, job: &Job, working_dir: &Path) -> Vec<SourceResult> {
    let kind = job.kind();
    debug!(?kind, "Dispatching sources");
    let results = match kind {
        JobKind::FilesOnly => copy_directories(ctx, job, working_dir).await,
        JobKind::DatabasesOnly => dump_databases(ctx, job, working_dir).await,
        JobKind::Both => {
            let (mut files, databases) = tokio::join!(
                copy_directories(ctx, job, working_dir),
                dump_databases(ctx, job, working_dir)
            );
            files.extend(databases);
            files
        }
    };

    for source in &results {
        match &source.result {
            Ok(path) => info!(
                source = %source.name,
                kind = ?source.kind,
                path = %path.display(),
                "Source backed up"
            ),
            Err(e) => error!(source = %source.name, kind = ?source.kind, error = %e, "Source backup failed"),
        }
    }
    results
}

async fn copy_directories(ctx: &BackupContext, job: &Job, working_dir: &Path) -> Vec<SourceResult> {
    let copies = job.directories.iter().map(|name| async move {
        let result = match ctx.config.sources.directories.get(name) {
            Some(source) => {
                copy_directory_async(name.clone(), source.clone(), working_dir.to_path_buf()).await
            }
            None => Err(AppError::InvalidInput("not defined in sources".into())),
        };
        SourceResult {
            name: name.clone(),
            kind: SourceKind::Directory,
            result: result.map_err(|e| AppError::dump(name.as_str(), e)),
        }
    });
    join_all(copies).await
}

async fn dump_databases(ctx: &BackupContext, job: &Job, working_dir: &Path) -> Vec<SourceResult> {
    let dumps = job.databases.iter().map(|name| async move {
        let result = match ctx.config.sources.databases.get(name) {
            Some(source) => {
                ctx.databases
                    .dump(name, source, working_dir, &ctx.cancel)
                    .await
            }
            None => Err(AppError::InvalidInput("not defined in sources".into())),
        };
        SourceResult {
            name: name.clone(),
            kind: SourceKind::Database,
            result: result.map_err(|e| AppError::dump(name.as_str(), e)),
        }
    });
    join_all(dumps).await
}

async fn upload_archive(
    ctx: &BackupContext,
    job: &Job,
    archive_path: &Path,
    key: &str,
) -> Vec<DestinationResult> {
    let uploads = job.destinations.iter().map(|name| async move {
        let result = upload_to(ctx, name, archive_path, key).await;
        match &result {
            Ok(()) => info!(destination = %name, key, "Successfully uploaded archive to destination"),
            Err(e) => error!(destination = %name, key, error = %e, "Failed to upload archive to destination"),
        }
        DestinationResult {
            name: name.clone(),
            result,
        }
    });
    join_all(uploads).await
}

async fn upload_to(ctx: &BackupContext, name: &str, archive_path: &Path, key: &str) -> Result<()> {
    let wrap = |e| AppError::upload(name, key, e);
    let destination = ctx
        .config
        .destinations
        .get(name)
        .ok_or_else(|| wrap(AppError::InvalidInput("not defined in destinations".into())))?;
    let store = ctx.stores.connect(name, destination).await.map_err(wrap)?;
    cancellable(&ctx.cancel, "bucket check", store.check_connection())
        .await
        .map_err(wrap)?;
    cancellable(&ctx.cancel, "upload", store.upload_file(archive_path, key))
        .await
        .map_err(wrap)
}

fn log_outcome(report: &JobReport) {
    let failed_sources = report.failed_sources().count();
    match &report.outcome {
        JobOutcome::Completed if failed_sources == 0 => {
            info!(key = ?report.archive_key, "Archive successfully uploaded to all destinations")
        }
        JobOutcome::Completed => warn!(
            key = ?report.archive_key,
            failed_sources,
            "Archive uploaded to all destinations but some sources are missing from it"
        ),
        JobOutcome::CompletedWithUploadErrors => error!(
            key = ?report.archive_key,
            failed_destinations = report.upload_errors().count(),
            failed_sources,
            "Failed to upload archive to one or more destinations"
        ),
        JobOutcome::SkippedArchive(e) => error!(error = %e, "Backup job failed while archiving"),
        JobOutcome::Cancelled => warn!("Backup job cancelled"),
        JobOutcome::SkippedValidation(_) | JobOutcome::Aborted(_) => {}
    }
}
