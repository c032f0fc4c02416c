//! In-memory collaborators for orchestrator tests.

use async_trait::async_trait;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use crate::backup::BackupContext;
use crate::backup::archive::tests::archive_entry_names;
use crate::backup::db_dump::DatabaseBackend;
use crate::backup::s3_upload::{RemoteStore, StoreConnector};
use crate::config::{
    Config, DatabaseDriver, DatabaseSource, Destination, DirectorySource, Job, OutputSpec,
    Secret, StorageProvider, ValidatedConfig,
};
use crate::errors::{AppError, Result};

#[derive(Default)]
pub struct MockDatabases {
    unreachable: HashSet<String>,
    failing_dumps: HashSet<String>,
    sabotage_workspace: bool,
    pub probes: AtomicUsize,
    pub dumps: AtomicUsize,
}

impl MockDatabases {
    pub fn unreachable(mut self, name: &str) -> Self {
        self.unreachable.insert(name.to_string());
        self
    }

    pub fn failing_dump(mut self, name: &str) -> Self {
        self.failing_dumps.insert(name.to_string());
        self
    }

    /// Deletes the working directory during the dump so archiving fails.
    pub fn sabotage_workspace(mut self) -> Self {
        self.sabotage_workspace = true;
        self
    }
}

#[async_trait]
impl DatabaseBackend for MockDatabases {
    async fn check_connection(&self, name: &str, _source: &DatabaseSource) -> Result<()> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if self.unreachable.contains(name) {
            return Err(AppError::InvalidInput("connection refused".to_string()));
        }
        Ok(())
    }

    async fn dump(
        &self,
        name: &str,
        _source: &DatabaseSource,
        target_dir: &Path,
        _cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        self.dumps.fetch_add(1, Ordering::SeqCst);
        if self.sabotage_workspace {
            fs::remove_dir_all(target_dir)?;
            return Err(AppError::InvalidInput("working directory vanished".to_string()));
        }
        if self.failing_dumps.contains(name) {
            return Err(AppError::InvalidInput("pg_dump exited with 1".to_string()));
        }
        let path = target_dir.join(format!("{name}.pgdump"));
        fs::write(&path, format!("dump of {name}"))?;
        Ok(path)
    }
}

#[derive(Debug, Clone)]
pub struct RecordedUpload {
    pub destination: String,
    pub bucket: String,
    pub key: String,
    pub entries: Vec<String>,
}

#[derive(Default)]
struct StoreBehaviour {
    unreachable: HashSet<String>,
    failing_uploads: HashSet<String>,
    hanging_uploads: HashSet<String>,
    uploads: Mutex<Vec<RecordedUpload>>,
}

#[derive(Default)]
pub struct MockStores {
    behaviour: Arc<StoreBehaviour>,
    pub connects: AtomicUsize,
}

impl MockStores {
    fn behaviour_mut(&mut self) -> &mut StoreBehaviour {
        Arc::get_mut(&mut self.behaviour).expect("configure mocks before use")
    }

    pub fn unreachable(mut self, name: &str) -> Self {
        self.behaviour_mut().unreachable.insert(name.to_string());
        self
    }

    pub fn failing_upload(mut self, name: &str) -> Self {
        self.behaviour_mut().failing_uploads.insert(name.to_string());
        self
    }

    /// Uploads to `name` never finish on their own.
    pub fn hanging_upload(mut self, name: &str) -> Self {
        self.behaviour_mut().hanging_uploads.insert(name.to_string());
        self
    }

    pub fn uploads(&self) -> Vec<RecordedUpload> {
        self.behaviour.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl StoreConnector for MockStores {
    async fn connect(&self, name: &str, destination: &Destination) -> Result<Box<dyn RemoteStore>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockStore {
            name: name.to_string(),
            bucket: destination.bucket_name.clone(),
            behaviour: Arc::clone(&self.behaviour),
        }))
    }
}

struct MockStore {
    name: String,
    bucket: String,
    behaviour: Arc<StoreBehaviour>,
}

#[async_trait]
impl RemoteStore for MockStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn check_connection(&self) -> Result<()> {
        if self.behaviour.unreachable.contains(&self.name) {
            return Err(AppError::S3Sdk("dispatch failure: connection refused".to_string()));
        }
        Ok(())
    }

    async fn upload_file(&self, file_path: &Path, key: &str) -> Result<()> {
        if self.behaviour.failing_uploads.contains(&self.name) {
            return Err(AppError::S3Sdk("PutObject failed: AccessDenied".to_string()));
        }
        if self.behaviour.hanging_uploads.contains(&self.name) {
            std::future::pending::<()>().await;
        }
        let entries = archive_entry_names(file_path);
        self.behaviour.uploads.lock().unwrap().push(RecordedUpload {
            destination: self.name.clone(),
            bucket: self.bucket.clone(),
            key: key.to_string(),
            entries,
        });
        Ok(())
    }
}

/// Temporary output and source directories plus mocks wired into a context.
pub struct Fixture {
    output: TempDir,
    uploads_dir: TempDir,
    pub databases: Arc<MockDatabases>,
    pub stores: Arc<MockStores>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with(MockDatabases::default(), MockStores::default())
    }

    pub fn with(databases: MockDatabases, stores: MockStores) -> Self {
        let uploads_dir = tempfile::tempdir().unwrap();
        fs::write(uploads_dir.path().join("notes.txt"), b"remember the milk").unwrap();
        fs::create_dir(uploads_dir.path().join("empty")).unwrap();

        Self {
            output: tempfile::tempdir().unwrap(),
            uploads_dir,
            databases: Arc::new(databases),
            stores: Arc::new(stores),
        }
    }

    pub fn output_dir(&self) -> PathBuf {
        self.output.path().join("out")
    }

    pub fn output_is_empty(&self) -> bool {
        match fs::read_dir(self.output_dir()) {
            Ok(mut entries) => entries.next().is_none(),
            Err(_) => true,
        }
    }

    pub fn job(&self, databases: &[&str], directories: &[&str], destinations: &[&str]) -> Job {
        let names = |v: &[&str]| v.iter().map(|s| s.to_string()).collect();
        Job {
            output: OutputSpec {
                dir: self.output_dir(),
                name: "nightly".to_string(),
            },
            databases: names(databases),
            directories: names(directories),
            destinations: names(destinations),
        }
    }

    pub fn config(&self, jobs: Vec<(&str, Job)>) -> ValidatedConfig {
        let mut config = Config::default();
        for name in ["orders", "billing"] {
            config.sources.databases.insert(
                name.to_string(),
                DatabaseSource {
                    driver: DatabaseDriver::Postgres,
                    host: "db.internal".to_string(),
                    port: 5432,
                    user: "backup".to_string(),
                    password: Secret::new("pw"),
                    database_name: name.to_string(),
                },
            );
        }
        config.sources.directories.insert(
            "uploads".to_string(),
            DirectorySource {
                path: self.uploads_dir.path().to_path_buf(),
            },
        );
        for name in ["primary", "secondary"] {
            config.destinations.insert(
                name.to_string(),
                Destination {
                    provider: StorageProvider::Minio,
                    bucket_name: format!("{name}-bucket"),
                    access_key_id: "minio".to_string(),
                    secret_access_key: Secret::new("minio123"),
                    region: None,
                    endpoint_url: Some("http://127.0.0.1:9000".to_string()),
                },
            );
        }
        for (name, job) in jobs {
            config.jobs.insert(name.to_string(), job);
        }
        config.validate().unwrap()
    }

    pub fn context(&self) -> BackupContext {
        self.context_with_jobs(Vec::new())
    }

    pub fn context_with_jobs(&self, jobs: Vec<(&str, Job)>) -> BackupContext {
        BackupContext::with_backends(
            self.config(jobs),
            self.databases.clone(),
            self.stores.clone(),
            CancellationToken::new(),
        )
    }
}
