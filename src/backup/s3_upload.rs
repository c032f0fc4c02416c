// backupcompanion/src/backup/s3_upload.rs
use async_trait::async_trait;
use aws_sdk_s3 as s3;
use s3::config::{Credentials, Region};
use s3::error::DisplayErrorContext;
use s3::primitives::ByteStream;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::{Destination, StorageProvider};
use crate::errors::{AppError, Result};

/// Region handed to the SDK when a minio destination does not name one.
pub const DEFAULT_REGION: &str = "us-east-1";

pub const BUCKET_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// A bucket on one configured destination.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    fn bucket(&self) -> &str;

    /// Lightweight existence/permission check on the bucket.
    async fn check_connection(&self) -> Result<()>;

    async fn upload_file(&self, file_path: &Path, key: &str) -> Result<()>;
}

/// Builds a [`RemoteStore`] client for a destination.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    async fn connect(&self, name: &str, destination: &Destination) -> Result<Box<dyn RemoteStore>>;
}

pub struct S3Connector {
    check_timeout: Duration,
}

impl Default for S3Connector {
    fn default() -> Self {
        Self {
            check_timeout: BUCKET_CHECK_TIMEOUT,
        }
    }
}

impl S3Connector {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StoreConnector for S3Connector {
    async fn connect(&self, name: &str, destination: &Destination) -> Result<Box<dyn RemoteStore>> {
        let region = destination
            .region
            .clone()
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_REGION.to_string());
        let endpoint = destination
            .endpoint_url
            .as_deref()
            .filter(|e| !e.trim().is_empty());

        debug!(
            destination = name,
            provider = %destination.provider,
            bucket = %destination.bucket_name,
            region = %region,
            endpoint = endpoint.unwrap_or("default"),
            "Creating S3 client"
        );

        let mut loader = aws_config::defaults(s3::config::BehaviorVersion::latest())
            .region(Region::new(region))
            .credentials_provider(Credentials::new(
                &destination.access_key_id,
                destination.secret_access_key.expose(),
                None,     // session_token
                None,     // expiry
                "Static", // provider_name
            ));
        if let Some(endpoint) = endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;

        // S3-compatible servers generally need path-style addressing.
        let path_style = destination.provider == StorageProvider::Minio || endpoint.is_some();
        let s3_config = s3::config::Builder::from(&sdk_config)
            .force_path_style(path_style)
            .build();

        Ok(Box::new(S3Store {
            client: s3::Client::from_conf(s3_config),
            bucket: destination.bucket_name.clone(),
            check_timeout: self.check_timeout,
        }))
    }
}

pub struct S3Store {
    client: s3::Client,
    bucket: String,
    check_timeout: Duration,
}

#[async_trait]
impl RemoteStore for S3Store {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn check_connection(&self) -> Result<()> {
        tokio::time::timeout(
            self.check_timeout,
            self.client.head_bucket().bucket(&self.bucket).send(),
        )
        .await
        .map_err(|_| AppError::Timeout(self.check_timeout))?
        .map_err(|e| {
            AppError::S3Sdk(format!(
                "HeadBucket on {:?} failed: {}",
                self.bucket,
                DisplayErrorContext(&e)
            ))
        })?;
        Ok(())
    }

    async fn upload_file(&self, file_path: &Path, key: &str) -> Result<()> {
        info!(
            file = %file_path.display(),
            bucket = %self.bucket,
            key,
            "Uploading archive"
        );

        let body = ByteStream::from_path(file_path).await.map_err(|e| {
            AppError::S3Sdk(format!(
                "failed to create ByteStream from {}: {e}",
                file_path.display()
            ))
        })?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type("application/gzip")
            .body(body)
            .send()
            .await
            .map_err(|e| {
                AppError::S3Sdk(format!(
                    "PutObject {key:?} into {:?} failed: {}",
                    self.bucket,
                    DisplayErrorContext(&e)
                ))
            })?;

        info!(bucket = %self.bucket, key, "Upload finished");
        Ok(())
    }
}
