use std::path::PathBuf;

use thiserror::Error;

use crate::config::validate::ValidationErrors;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Failed to read configuration file {}: {source}", path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration file {}: {source}", path.display())]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid configuration:\n{0}")]
    InvalidConfig(ValidationErrors),

    #[error("source {name:?} failed validation: {cause}")]
    SourceValidation { name: String, cause: Box<AppError> },

    #[error("destination {name:?} failed validation: {cause}")]
    DestinationValidation { name: String, cause: Box<AppError> },

    #[error("backup of source {name:?} failed: {cause}")]
    Dump { name: String, cause: Box<AppError> },

    #[error("failed to create archive {}: {cause}", path.display())]
    Archive { path: PathBuf, cause: Box<AppError> },

    #[error("upload of {key:?} to destination {name:?} failed: {cause}")]
    Upload {
        name: String,
        key: String,
        cause: Box<AppError>,
    },

    #[error("failed to remove {}: {source}", path.display())]
    Cleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("AWS SDK S3 error: {0}")]
    S3Sdk(String),

    #[error("{program} exited with {status}: {stderr}")]
    Command {
        program: String,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("{0} not found in PATH: {1}")]
    MissingExecutable(String, which::Error),

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl AppError {
    pub fn source_validation(name: impl Into<String>, cause: AppError) -> Self {
        AppError::SourceValidation {
            name: name.into(),
            cause: Box::new(cause),
        }
    }

    pub fn destination_validation(name: impl Into<String>, cause: AppError) -> Self {
        AppError::DestinationValidation {
            name: name.into(),
            cause: Box::new(cause),
        }
    }

    pub fn dump(name: impl Into<String>, cause: AppError) -> Self {
        AppError::Dump {
            name: name.into(),
            cause: Box::new(cause),
        }
    }

    pub fn upload(name: impl Into<String>, key: impl Into<String>, cause: AppError) -> Self {
        AppError::Upload {
            name: name.into(),
            key: key.into(),
            cause: Box::new(cause),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            AppError::Cancelled(_) => true,
            AppError::SourceValidation { cause, .. }
            | AppError::DestinationValidation { cause, .. }
            | AppError::Dump { cause, .. }
            | AppError::Archive { cause, .. }
            | AppError::Upload { cause, .. } => cause.is_cancelled(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
