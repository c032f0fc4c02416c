// backupcompanion/src/backup/workspace.rs
//! Per-run working directory and archive path.
//!
//! A [`Workspace`] owns both paths for the lifetime of one job run. Call
//! [`Workspace::cleanup`] to remove them and collect any failures; if the
//! workspace is dropped first (early return, panic, cancelled task) the drop
//! handler removes them and logs instead.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

use crate::backup::archive::archive_path_for;
use crate::config::OutputSpec;
use crate::errors::{AppError, Result};
use crate::utils::timestamp;

/// Attempts at a numeric suffix before giving up on a unique name.
const MAX_SUFFIX: u32 = 1000;

#[derive(Debug)]
pub struct Workspace {
    working_dir: PathBuf,
    archive_path: PathBuf,
    armed: bool,
}

impl Workspace {
    /// Creates `<dir>/<name>-<YYYYMMDDHHMMSS>` (plus `-<n>` if taken).
    pub fn create(output: &OutputSpec) -> Result<Self> {
        fs::create_dir_all(&output.dir)?;
        let base = format!("{}-{}", output.name, timestamp());

        for attempt in 0..MAX_SUFFIX {
            let candidate = if attempt == 0 {
                output.dir.join(&base)
            } else {
                output.dir.join(format!("{base}-{attempt}"))
            };
            let archive_path = archive_path_for(&candidate);
            if archive_path.exists() {
                continue;
            }
            // create_dir fails if the path exists, which makes the claim atomic.
            match fs::create_dir(&candidate) {
                Ok(()) => {
                    info!(path = %candidate.display(), "Created working directory");
                    return Ok(Self {
                        working_dir: candidate,
                        archive_path,
                        armed: true,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Err(AppError::InvalidInput(format!(
            "no free working directory name for {} in {}",
            base,
            output.dir.display()
        )))
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn archive_path(&self) -> &Path {
        &self.archive_path
    }

    /// Object key used on every destination.
    pub fn archive_key(&self) -> String {
        self.archive_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Removes the working directory and the archive file.
    pub fn cleanup(mut self) -> Vec<AppError> {
        self.armed = false;
        remove_artifacts(&self.working_dir, &self.archive_path)
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        for err in remove_artifacts(&self.working_dir, &self.archive_path) {
            error!(error = %err, "Cleanup after interrupted run failed");
        }
    }
}

fn remove_artifacts(working_dir: &Path, archive_path: &Path) -> Vec<AppError> {
    let mut errors = Vec::new();

    match fs::remove_dir_all(working_dir) {
        Ok(()) => info!(path = %working_dir.display(), "Removed working directory"),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(path = %working_dir.display(), "Working directory already gone")
        }
        Err(source) => errors.push(AppError::Cleanup {
            path: working_dir.to_path_buf(),
            source,
        }),
    }

    match fs::remove_file(archive_path) {
        Ok(()) => info!(path = %archive_path.display(), "Removed archive file"),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(path = %archive_path.display(), "No archive file to remove")
        }
        Err(source) => errors.push(AppError::Cleanup {
            path: archive_path.to_path_buf(),
            source,
        }),
    }

    errors
}
