// backupcompanion/src/backup/dir_copy.rs
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::DirectorySource;
use crate::errors::{AppError, Result};

/// Copies a directory source into `<target_dir>/<name>`.
///
/// Empty directories are recreated. Symlinks are recreated as links on unix
/// and skipped elsewhere. A copy that fails partway leaves nothing behind.
pub fn copy_directory(name: &str, source: &DirectorySource, target_dir: &Path) -> Result<PathBuf> {
    let dest_root = target_dir.join(name);
    info!(
        source = name,
        from = %source.path.display(),
        to = %dest_root.display(),
        "Backing up directory"
    );

    match copy_tree(name, source, &dest_root) {
        Ok(files) => {
            debug!(source = name, files, "Directory copy finished");
            Ok(dest_root)
        }
        Err(e) => {
            match fs::remove_dir_all(&dest_root) {
                Ok(()) => debug!(path = %dest_root.display(), "Removed partial directory copy"),
                Err(rm) if rm.kind() == ErrorKind::NotFound => {}
                Err(rm) => {
                    warn!(path = %dest_root.display(), error = %rm, "Failed to remove partial directory copy")
                }
            }
            Err(e)
        }
    }
}

fn copy_tree(name: &str, source: &DirectorySource, dest_root: &Path) -> Result<usize> {
    let mut files = 0usize;
    for entry in WalkDir::new(&source.path) {
        let entry = entry.map_err(|e| AppError::Io(e.into()))?;
        let rel = entry
            .path()
            .strip_prefix(&source.path)
            .map_err(|e| AppError::InvalidInput(e.to_string()))?;
        let target = dest_root.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
            files += 1;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else {
            warn!(source = name, path = %entry.path().display(), "Skipping special file");
        }
    }

    Ok(files)
}

/// Runs [`copy_directory`] on the blocking thread pool.
pub async fn copy_directory_async(
    name: String,
    source: DirectorySource,
    target_dir: PathBuf,
) -> Result<PathBuf> {
    tokio::task::spawn_blocking(move || copy_directory(&name, &source, &target_dir))
        .await
        .map_err(|e| AppError::Io(std::io::Error::other(e)))?
}

#[cfg(unix)]
fn copy_symlink(link: &Path, target: &Path) -> Result<()> {
    let points_to = fs::read_link(link)?;
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    std::os::unix::fs::symlink(points_to, target)?;
    Ok(())
}

#[cfg(not(unix))]
fn copy_symlink(link: &Path, _target: &Path) -> Result<()> {
    warn!(path = %link.display(), "Skipping symlink");
    Ok(())
}
