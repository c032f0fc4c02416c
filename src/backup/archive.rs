// backupcompanion/src/backup/archive.rs
use flate2::Compression;
use flate2::write::GzEncoder;
use std::fs::File;
use std::path::{Path, PathBuf};
use tar::Builder;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::errors::{AppError, Result};

/// Archive path for a working directory: the `.tar.gz` sibling of it.
pub fn archive_path_for(working_dir: &Path) -> PathBuf {
    let mut name = working_dir.as_os_str().to_os_string();
    name.push(".tar.gz");
    PathBuf::from(name)
}

/// Creates a GZipped TAR archive from a source directory.
///
/// Paths inside the archive are relative to `source_dir`. Directories get
/// their own entries, so empty ones survive extraction.
pub fn create_tar_gz_archive(source_dir: &Path, archive_dest_path: &Path) -> Result<PathBuf> {
    build_archive(source_dir, archive_dest_path).map_err(|cause| AppError::Archive {
        path: archive_dest_path.to_path_buf(),
        cause: Box::new(cause),
    })
}

/// Same as [`create_tar_gz_archive`], on the blocking thread pool.
pub async fn create_tar_gz_archive_async(
    source_dir: PathBuf,
    archive_dest_path: PathBuf,
) -> Result<PathBuf> {
    let dest = archive_dest_path.clone();
    tokio::task::spawn_blocking(move || create_tar_gz_archive(&source_dir, &archive_dest_path))
        .await
        .map_err(|e| AppError::Archive {
            path: dest,
            cause: Box::new(AppError::Io(std::io::Error::other(e))),
        })?
}

fn build_archive(source_dir: &Path, archive_dest_path: &Path) -> Result<PathBuf> {
    if !source_dir.is_dir() {
        return Err(AppError::InvalidInput(format!(
            "source for archival is not a directory: {}",
            source_dir.display()
        )));
    }

    info!(
        source = %source_dir.display(),
        archive = %archive_dest_path.display(),
        "Creating tar.gz archive"
    );

    let archive_file = File::create(archive_dest_path)?;
    let enc = GzEncoder::new(archive_file, Compression::default());
    let mut tar_builder = Builder::new(enc);
    tar_builder.follow_symlinks(false);

    let mut entries = 0usize;
    for entry in WalkDir::new(source_dir).sort_by_file_name() {
        let entry = entry.map_err(|e| AppError::Io(e.into()))?;
        let path = entry.path();
        let name = path
            .strip_prefix(source_dir)
            .map_err(|e| AppError::InvalidInput(e.to_string()))?;

        // The root itself has no entry.
        if name.as_os_str().is_empty() {
            continue;
        }

        if entry.file_type().is_dir() {
            tar_builder.append_dir(name, path)?;
        } else {
            tar_builder.append_path_with_name(path, name)?;
        }
        entries += 1;
    }

    let encoder = tar_builder.into_inner()?;
    encoder.finish()?;

    debug!(entries, "Archive entries written");
    Ok(archive_dest_path.to_path_buf())
}
