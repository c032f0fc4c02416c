// backupcompanion/src/backup/db_dump.rs
use async_trait::async_trait;
use flate2::Compression;
use flate2::write::GzEncoder;
use sqlx::Connection;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use sqlx::postgres::{PgConnectOptions, PgConnection};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio_util::io::SyncIoBridge;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{DatabaseDriver, DatabaseSource};
use crate::errors::{AppError, Result};
use crate::utils::{find_executable, timestamp};

/// Upper bound for the connect + ping probe.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Connectivity probe and dump producer for database sources.
#[async_trait]
pub trait DatabaseBackend: Send + Sync {
    async fn check_connection(&self, name: &str, source: &DatabaseSource) -> Result<()>;

    /// Writes one dump file for `source` into `target_dir` and returns its path.
    async fn dump(
        &self,
        name: &str,
        source: &DatabaseSource,
        target_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<PathBuf>;
}

impl DatabaseDriver {
    pub fn dump_program(self) -> &'static str {
        match self {
            DatabaseDriver::Postgres => "pg_dump",
            DatabaseDriver::Mysql => "mysqldump",
        }
    }

    pub fn password_env(self) -> &'static str {
        match self {
            DatabaseDriver::Postgres => "PGPASSWORD",
            DatabaseDriver::Mysql => "MYSQL_PWD",
        }
    }

    /// Postgres uses the custom (compressed) dump format, MySQL plain SQL gzipped.
    pub fn file_extension(self) -> &'static str {
        match self {
            DatabaseDriver::Postgres => ".pgdump",
            DatabaseDriver::Mysql => ".sql.gz",
        }
    }
}

pub fn dump_file_path(target_dir: &Path, name: &str, driver: DatabaseDriver) -> PathBuf {
    target_dir.join(format!("{}_{}{}", name, timestamp(), driver.file_extension()))
}

/// Probes with sqlx and dumps with the engine's own client tool.
pub struct ExternalDumpTool {
    connect_timeout: Duration,
}

impl Default for ExternalDumpTool {
    fn default() -> Self {
        Self {
            connect_timeout: CONNECT_TIMEOUT,
        }
    }
}

impl ExternalDumpTool {
    pub fn new() -> Self {
        Self::default()
    }

    async fn ping(source: &DatabaseSource) -> Result<()> {
        match source.driver {
            DatabaseDriver::Postgres => {
                let options = PgConnectOptions::new()
                    .host(&source.host)
                    .port(source.port)
                    .username(&source.user)
                    .password(source.password.expose())
                    .database(&source.database_name);
                let mut conn = PgConnection::connect_with(&options).await?;
                conn.ping().await?;
                conn.close().await?;
            }
            DatabaseDriver::Mysql => {
                let options = MySqlConnectOptions::new()
                    .host(&source.host)
                    .port(source.port)
                    .username(&source.user)
                    .password(source.password.expose())
                    .database(&source.database_name);
                let mut conn = MySqlConnection::connect_with(&options).await?;
                conn.ping().await?;
                conn.close().await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl DatabaseBackend for ExternalDumpTool {
    async fn check_connection(&self, name: &str, source: &DatabaseSource) -> Result<()> {
        debug!(
            source = name,
            driver = %source.driver,
            host = %source.host,
            port = source.port,
            "Probing database connection"
        );
        tokio::time::timeout(self.connect_timeout, Self::ping(source))
            .await
            .map_err(|_| AppError::Timeout(self.connect_timeout))??;
        info!(source = name, driver = %source.driver, "Database connection validated");
        Ok(())
    }

    async fn dump(
        &self,
        name: &str,
        source: &DatabaseSource,
        target_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        let program = find_executable(source.driver.dump_program())?;
        let output_path = dump_file_path(target_dir, name, source.driver);
        info!(
            source = name,
            driver = %source.driver,
            path = %output_path.display(),
            "Dumping database"
        );

        run_dump(&program, name, source, &output_path, cancel).await?;
        Ok(output_path)
    }
}

/// Runs the dump tool at `program`, killing it if `cancel` fires. A partial
/// output file is removed on any failure.
async fn run_dump(
    program: &Path,
    name: &str,
    source: &DatabaseSource,
    output_path: &Path,
    cancel: &CancellationToken,
) -> Result<()> {
    let run = async {
        match source.driver {
            DatabaseDriver::Postgres => run_pg_dump(program, source, output_path).await,
            DatabaseDriver::Mysql => run_mysqldump(program, source, output_path).await,
        }
    };

    // Dropping `run` kills the child process.
    let result = tokio::select! {
        res = run => res,
        _ = cancel.cancelled() => Err(AppError::Cancelled(format!(
            "{} for {}",
            source.driver.dump_program(),
            name
        ))),
    };

    if result.is_err() {
        if let Err(rm) = tokio::fs::remove_file(output_path).await {
            if rm.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %output_path.display(), error = %rm, "Failed to remove partial dump");
            }
        }
    }
    result
}

async fn run_pg_dump(program: &Path, source: &DatabaseSource, output_path: &Path) -> Result<()> {
    let output = Command::new(program)
        .arg("-h")
        .arg(&source.host)
        .arg("-p")
        .arg(source.port.to_string())
        .arg("-U")
        .arg(&source.user)
        .args(["--no-password", "-F", "c", "-b", "-f"])
        .arg(output_path)
        .arg(&source.database_name)
        .env(DatabaseDriver::Postgres.password_env(), source.password.expose())
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await?;

    if !output.status.success() {
        return Err(AppError::Command {
            program: DatabaseDriver::Postgres.dump_program().to_string(),
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}

/// Streams `mysqldump` stdout through gzip into `output_path`.
async fn run_mysqldump(program: &Path, source: &DatabaseSource, output_path: &Path) -> Result<()> {
    let mut child = Command::new(program)
        .arg("-h")
        .arg(&source.host)
        .arg(format!("-P{}", source.port))
        .arg(format!("-u{}", source.user))
        .args(["--single-transaction", "--quick"])
        .arg(&source.database_name)
        .env(DatabaseDriver::Mysql.password_env(), source.password.expose())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::InvalidInput("mysqldump stdout not captured".to_string()))?;
    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| AppError::InvalidInput("mysqldump stderr not captured".to_string()))?;

    // Gzip and file I/O stay on the blocking pool.
    let file = std::fs::File::create(output_path)?;
    let reader = SyncIoBridge::new(stdout);
    let writer = tokio::task::spawn_blocking(move || compress_into(reader, file));

    let pump = async {
        let res = writer
            .await
            .unwrap_or_else(|e| Err(std::io::Error::other(e)));
        if res.is_err() {
            // The reader is gone; stop mysqldump so stderr reaches EOF.
            if let Err(e) = child.start_kill() {
                debug!(error = %e, "mysqldump already exited");
            }
        }
        res
    };
    let collect_stderr = async {
        let mut captured = Vec::new();
        stderr.read_to_end(&mut captured).await.map(|_| captured)
    };

    let (pumped, captured) = tokio::join!(pump, collect_stderr);
    let status = child.wait().await?;
    pumped?;
    let captured = captured?;

    if !status.success() {
        return Err(AppError::Command {
            program: DatabaseDriver::Mysql.dump_program().to_string(),
            status,
            stderr: String::from_utf8_lossy(&captured).trim().to_string(),
        });
    }

    Ok(())
}

fn compress_into(mut reader: impl Read, file: std::fs::File) -> std::io::Result<()> {
    let mut encoder = GzEncoder::new(file, Compression::default());
    std::io::copy(&mut reader, &mut encoder)?;
    encoder.finish()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Secret;

    fn mysql_source() -> DatabaseSource {
        DatabaseSource {
            driver: DatabaseDriver::Mysql,
            host: "127.0.0.1".to_string(),
            port: 1,
            user: "backup".to_string(),
            password: Secret::new("s3cr3t"),
            database_name: "shop".to_string(),
        }
    }

    #[test]
    fn dump_file_name_encodes_source_and_format() {
        let dir = Path::new("/work");
        let pg = dump_file_path(dir, "orders", DatabaseDriver::Postgres);
        let name = pg.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("orders_"));
        assert!(name.ends_with(".pgdump"));
        assert_eq!(name.len(), "orders_".len() + 14 + ".pgdump".len());

        let my = dump_file_path(dir, "shop", DatabaseDriver::Mysql);
        assert!(my.to_str().unwrap().ends_with(".sql.gz"));
    }

    #[tokio::test]
    async fn unreachable_database_fails_probe() {
        let tool = ExternalDumpTool::new();
        let mut source = mysql_source();
        assert!(tool.check_connection("shop", &source).await.is_err());

        source.driver = DatabaseDriver::Postgres;
        assert!(tool.check_connection("shop", &source).await.is_err());
    }

    #[cfg(unix)]
    fn fake_tool(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake-dump");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn mysqldump_output_is_gzipped_and_password_comes_from_env() {
        let tmp = tempfile::tempdir().unwrap();
        let tool = fake_tool(tmp.path(), "echo \"-- pw=$MYSQL_PWD args=$*\"");
        let out = tmp.path().join("shop.sql.gz");

        run_mysqldump(&tool, &mysql_source(), &out).await.unwrap();

        let mut text = String::new();
        flate2::read::GzDecoder::new(std::fs::File::open(&out).unwrap())
            .read_to_string(&mut text)
            .unwrap();
        assert!(text.contains("pw=s3cr3t"));
        assert!(text.contains("--single-transaction"));
        assert!(!text.split("args=").nth(1).unwrap().contains("s3cr3t"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_dump_reports_stderr() {
        let tmp = tempfile::tempdir().unwrap();
        let tool = fake_tool(tmp.path(), "echo 'access denied' >&2; exit 2");
        let out = tmp.path().join("shop.sql.gz");

        let err = run_mysqldump(&tool, &mysql_source(), &out).await.unwrap_err();
        match err {
            AppError::Command { program, stderr, .. } => {
                assert_eq!(program, "mysqldump");
                assert_eq!(stderr, "access denied");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn unwritable_output_fails_instead_of_hanging() {
        let tmp = tempfile::tempdir().unwrap();
        let tool = fake_tool(tmp.path(), "head -c 20000000 /dev/urandom");

        let res = tokio::time::timeout(
            Duration::from_secs(30),
            run_mysqldump(&tool, &mysql_source(), Path::new("/dev/full")),
        )
        .await
        .expect("mysqldump run should finish when the output cannot be written");

        assert!(matches!(res, Err(AppError::Io(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancelled_dump_is_killed_and_removed() {
        let tmp = tempfile::tempdir().unwrap();
        let tool = fake_tool(tmp.path(), "echo 'CREATE TABLE partial;'\nexec sleep 30");
        let out = tmp.path().join("shop.sql.gz");
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let res = tokio::time::timeout(
            Duration::from_secs(10),
            run_dump(&tool, "shop", &mysql_source(), &out, &cancel),
        )
        .await
        .expect("cancellation should stop the dump promptly");

        let err = res.unwrap_err();
        assert!(err.is_cancelled());
        assert!(!out.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failed_dump_leaves_no_file_behind() {
        let tmp = tempfile::tempdir().unwrap();
        let tool = fake_tool(tmp.path(), "echo partial; echo 'lost connection' >&2; exit 3");
        let out = tmp.path().join("shop.sql.gz");

        let res = run_dump(&tool, "shop", &mysql_source(), &out, &CancellationToken::new()).await;

        assert!(matches!(res, Err(AppError::Command { .. })));
        assert!(!out.exists());
    }
}
