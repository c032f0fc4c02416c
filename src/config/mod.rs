// backupcompanion/src/config/mod.rs
pub mod validate;

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::{AppError, Result};

pub use validate::ValidatedConfig;

pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// A credential that never shows up in `Debug` output or logs.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    #[cfg(test)]
    pub fn new(value: impl Into<String>) -> Self {
        Secret(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[redacted]")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseDriver {
    Postgres,
    Mysql,
}

impl fmt::Display for DatabaseDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseDriver::Postgres => f.write_str("postgres"),
            DatabaseDriver::Mysql => f.write_str("mysql"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageProvider {
    S3,
    Minio,
}

impl fmt::Display for StorageProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageProvider::S3 => f.write_str("s3"),
            StorageProvider::Minio => f.write_str("minio"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSource {
    pub driver: DatabaseDriver,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Secret,
    #[serde(rename = "name")]
    pub database_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DirectorySource {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Sources {
    #[serde(default)]
    pub databases: BTreeMap<String, DatabaseSource>,
    #[serde(default)]
    pub directories: BTreeMap<String, DirectorySource>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Destination {
    pub provider: StorageProvider,
    pub bucket_name: String,
    pub access_key_id: String,
    pub secret_access_key: Secret,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutputSpec {
    #[serde(default)]
    pub dir: PathBuf,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Job {
    #[serde(default)]
    pub output: OutputSpec,
    #[serde(default)]
    pub databases: Vec<String>,
    #[serde(default)]
    pub directories: Vec<String>,
    #[serde(default)]
    pub destinations: Vec<String>,
}

/// What a job has to produce before archiving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    FilesOnly,
    DatabasesOnly,
    Both,
}

impl Job {
    /// Callers only see validated jobs, so at least one source list is non-empty.
    pub fn kind(&self) -> JobKind {
        match (self.directories.is_empty(), self.databases.is_empty()) {
            (false, true) => JobKind::FilesOnly,
            (true, false) => JobKind::DatabasesOnly,
            _ => JobKind::Both,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub sources: Sources,
    #[serde(default)]
    pub destinations: BTreeMap<String, Destination>,
    #[serde(default)]
    pub jobs: BTreeMap<String, Job>,
}

impl Config {
    pub fn load(config_path: &Path) -> Result<Self> {
        let content = fs::read_to_string(config_path).map_err(|source| AppError::ConfigRead {
            path: config_path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&content).map_err(|source| AppError::ConfigParse {
            path: config_path.to_path_buf(),
            source,
        })
    }

    pub fn from_yaml_str(content: &str) -> std::result::Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }
}
