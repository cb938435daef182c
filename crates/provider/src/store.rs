//! Object storage for workspace archives.
//!
//! The bootstrap publishes one workspace archive per process; each
//! remote job fetches it as its source. [`ArchiveStore`] is the seam;
//! [`S3ArchiveStore`] is the production implementation.

use std::path::Path;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;

/// Key prefix under which workspace archives are published.
pub const ARCHIVE_KEY_PREFIX: &str = "test/source/";

/// How long an uploaded archive stays relevant. Jobs outliving this are
/// long dead.
const ARCHIVE_EXPIRY: Duration = Duration::from_secs(3 * 24 * 60 * 60);

/// Errors from the archive store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Reading the archive file from disk failed.
    #[error("Failed to read archive: {0}")]
    Read(String),

    /// The upload itself failed.
    #[error("Failed to upload archive: {0}")]
    Upload(String),
}

/// Durable object storage the remote provider can fetch sources from.
#[async_trait]
pub trait ArchiveStore: Send + Sync {
    /// Publish the archive at `path` under `key`.
    async fn put_archive(&self, key: &str, path: &Path) -> Result<(), StoreError>;
}

/// Build the storage key for an archive file name.
pub fn archive_key(file_name: &str) -> String {
    format!("{ARCHIVE_KEY_PREFIX}{file_name}")
}

/// S3-backed archive store.
pub struct S3ArchiveStore {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3ArchiveStore {
    /// Create a store from ambient AWS configuration (environment,
    /// profile, instance role).
    pub async fn from_env(bucket: String) -> Self {
        let config = aws_config::load_from_env().await;
        Self {
            client: aws_sdk_s3::Client::new(&config),
            bucket,
        }
    }

    /// Create a store from an existing client (tests, custom endpoints).
    pub fn with_client(client: aws_sdk_s3::Client, bucket: String) -> Self {
        Self { client, bucket }
    }
}

#[async_trait]
impl ArchiveStore for S3ArchiveStore {
    async fn put_archive(&self, key: &str, path: &Path) -> Result<(), StoreError> {
        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| StoreError::Read(e.to_string()))?;

        let expires = aws_smithy_types::DateTime::from(SystemTime::now() + ARCHIVE_EXPIRY);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type("application/zip")
            .expires(expires)
            .body(body)
            .send()
            .await
            .map_err(|e| StoreError::Upload(e.to_string()))?;

        tracing::info!(bucket = %self.bucket, key, "Workspace archive uploaded");
        Ok(())
    }
}
