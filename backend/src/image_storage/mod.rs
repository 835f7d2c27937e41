//! Image storage: streams uploaded files into an object-storage bucket,
//! creating the bucket on first use.
mod error;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;
mod s3;

use std::{fmt::Display, sync::Arc, time::Duration};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, error, info, instrument, warn};

pub use error::{
    BucketCreationError, BucketProbeError, CopyFailure, StorageError, StorageResult, UploadError,
};
pub use s3::{S3ObjectStore, S3ObjectWriter, PART_SIZE_BYTES};

/// Prefix prepended to every uploaded filename
pub const IMAGE_KEY_PREFIX: &str = "test/image/";

/// Bucket used when no override is configured
pub const DEFAULT_BUCKET_NAME: &str = "test2-image-sannon";

/// Storage class of auto-provisioned buckets
pub const DEFAULT_STORAGE_CLASS: &str = "STANDARD";

/// Location of auto-provisioned buckets
pub const DEFAULT_BUCKET_LOCATION: &str = "asia";

/// Deadline for each storage step
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(10);

/// Settings applied when a missing bucket is created
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketSettings {
    /// Project that will own new buckets
    pub project_id: Option<String>,
    /// Storage class, e.g. `STANDARD`
    pub storage_class: String,
    /// Location constraint, e.g. `asia`
    pub location: String,
}

impl BucketSettings {
    /// Default settings for buckets owned by `project_id`
    #[must_use]
    pub fn new(project_id: Option<String>) -> Self {
        Self {
            project_id,
            storage_class: DEFAULT_STORAGE_CLASS.to_string(),
            location: DEFAULT_BUCKET_LOCATION.to_string(),
        }
    }

    /// Overrides the location constraint
    #[must_use]
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }
}

/// Deadlines for the storage steps of an upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageTimeouts {
    /// Bucket existence check
    pub probe: Duration,
    /// Bucket creation
    pub create: Duration,
    /// Copy and finalize, measured together
    pub write: Duration,
}

impl Default for StorageTimeouts {
    fn default() -> Self {
        Self {
            probe: DEFAULT_STEP_TIMEOUT,
            create: DEFAULT_STEP_TIMEOUT,
            write: DEFAULT_STEP_TIMEOUT,
        }
    }
}

/// Backend operations needed to provision a bucket and write an object.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    /// Succeeds when `bucket` exists and is reachable
    async fn probe_bucket(&self, bucket: &str) -> StorageResult<()>;

    /// Creates `bucket` with the given settings
    async fn create_bucket(&self, bucket: &str, settings: &BucketSettings) -> StorageResult<()>;

    /// Opens a sink for `bucket`/`key`. Nothing is sent until the first write or close.
    fn writer(&self, bucket: &str, key: &str) -> Box<dyn ObjectWriter>;
}

/// Writable sink bound to one object
#[async_trait::async_trait]
pub trait ObjectWriter: Send {
    /// Appends `chunk` to the object
    async fn write(&mut self, chunk: Bytes) -> StorageResult<()>;

    /// Finalizes the object. Returns the number of bytes stored.
    async fn close(&mut self) -> StorageResult<u64>;
}

/// Outcome of the bucket provisioning step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketStatus {
    /// The probe succeeded
    Exists,
    /// The probe failed and the bucket was created
    Created,
    /// The probe and the creation both failed
    Unavailable,
}

/// A successfully written object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedObject {
    /// Bucket the object was written to
    pub bucket: String,
    /// Object key
    pub key: String,
    /// Stored size in bytes
    pub size: u64,
}

/// Image storage client shared by all request handlers
pub struct ImageStorage {
    store: Arc<dyn ObjectStore>,
    bucket_name: String,
    bucket_settings: BucketSettings,
    timeouts: StorageTimeouts,
}

impl ImageStorage {
    /// Creates a new image storage client
    ///
    /// # Arguments
    ///
    /// * `store` - Object store backend, built once at start-up
    /// * `bucket_name` - Bucket every image is written to
    /// * `bucket_settings` - Settings used if the bucket has to be created
    #[must_use]
    pub fn new(
        store: Arc<dyn ObjectStore>,
        bucket_name: String,
        bucket_settings: BucketSettings,
    ) -> Self {
        Self {
            store,
            bucket_name,
            bucket_settings,
            timeouts: StorageTimeouts::default(),
        }
    }

    /// Replaces the default step deadlines
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: StorageTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Bucket images are written to
    #[must_use]
    pub fn bucket_name(&self) -> &str {
        &self.bucket_name
    }

    /// Maps an uploaded filename to its object key.
    ///
    /// The filename is used verbatim. Separators and `..` segments are not
    /// sanitized, so clients can choose any key under the prefix.
    #[must_use]
    pub fn object_key(filename: &str) -> String {
        format!("{IMAGE_KEY_PREFIX}{filename}")
    }

    /// Uploads a file into the configured bucket under [`Self::object_key`]
    ///
    /// # Errors
    ///
    /// See [`Self::upload`]
    pub async fn upload_image<S, E>(
        &self,
        filename: &str,
        stream: S,
    ) -> Result<UploadedObject, UploadError>
    where
        S: Stream<Item = Result<Bytes, E>> + Send,
        E: Display + Send,
    {
        let key = Self::object_key(filename);
        self.upload(&self.bucket_name, &key, stream).await
    }

    /// Writes the full contents of `stream` to `bucket`/`key`, creating the
    /// bucket first if it cannot be found.
    ///
    /// Probe and creation failures are logged and never returned; the write
    /// is attempted regardless and fails on its own if the bucket is missing.
    ///
    /// # Errors
    ///
    /// Returns `UploadError::Copy` if reading the stream or writing a chunk fails,
    /// with [`CopyFailure`] telling the two apart
    /// Returns `UploadError::Finalize` if the sink rejects the object on close
    #[instrument(skip(self, stream))]
    pub async fn upload<S, E>(
        &self,
        bucket: &str,
        key: &str,
        stream: S,
    ) -> Result<UploadedObject, UploadError>
    where
        S: Stream<Item = Result<Bytes, E>> + Send,
        E: Display + Send,
    {
        let status = self.ensure_bucket(bucket).await;
        debug!(?status, "Bucket provisioning finished");

        let deadline = Instant::now() + self.timeouts.write;
        let mut writer = self.store.writer(bucket, key);

        let copy_result = timeout_at(deadline, copy(stream, writer.as_mut()))
            .await
            .unwrap_or(Err(CopyFailure::Write(StorageError::Timeout(self.timeouts.write))));

        match copy_result {
            Ok(copied) => debug!(copied, "Copied stream into sink"),
            Err(cause) => {
                return Err(UploadError::Copy {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                    cause,
                })
            }
        }

        let size = timeout_at(deadline, writer.close())
            .await
            .unwrap_or(Err(StorageError::Timeout(self.timeouts.write)))
            .map_err(|source| UploadError::Finalize {
                bucket: bucket.to_string(),
                key: key.to_string(),
                source,
            })?;

        info!(size, "Stored object {bucket}/{key}");

        Ok(UploadedObject {
            bucket: bucket.to_string(),
            key: key.to_string(),
            size,
        })
    }

    /// Probes `bucket` and creates it when the probe fails for any reason.
    pub async fn ensure_bucket(&self, bucket: &str) -> BucketStatus {
        let Err(probe_err) = self.probe_bucket(bucket).await else {
            return BucketStatus::Exists;
        };
        // A transient fault is treated like "not found"
        warn!("{probe_err}");

        match self.create_bucket(bucket).await {
            Ok(()) => BucketStatus::Created,
            Err(BucketCreationError {
                source: StorageError::BucketAlreadyExists(_),
                ..
            }) => {
                debug!("Bucket {bucket} was created concurrently");
                BucketStatus::Exists
            }
            Err(create_err) => {
                error!("{create_err}");
                BucketStatus::Unavailable
            }
        }
    }

    /// Checks whether `bucket` exists, bounded by the probe deadline
    ///
    /// # Errors
    ///
    /// Returns `BucketProbeError` if the bucket is missing, unreachable or the deadline passes
    pub async fn probe_bucket(&self, bucket: &str) -> Result<(), BucketProbeError> {
        timeout(self.timeouts.probe, self.store.probe_bucket(bucket))
            .await
            .unwrap_or(Err(StorageError::Timeout(self.timeouts.probe)))
            .map_err(|source| BucketProbeError {
                bucket: bucket.to_string(),
                source,
            })
    }

    /// Creates `bucket` with the configured settings, bounded by the creation deadline
    ///
    /// # Errors
    ///
    /// Returns `BucketCreationError` with `StorageError::ConfigError` if no project is configured
    /// Returns `BucketCreationError` with the store's error if creation fails or times out
    pub async fn create_bucket(&self, bucket: &str) -> Result<(), BucketCreationError> {
        let creation_failed = |source| BucketCreationError {
            bucket: bucket.to_string(),
            source,
        };

        if self.bucket_settings.project_id.is_none() {
            return Err(creation_failed(StorageError::ConfigError(
                "PROJECT_ID is not set".to_string(),
            )));
        }

        timeout(
            self.timeouts.create,
            self.store.create_bucket(bucket, &self.bucket_settings),
        )
        .await
        .unwrap_or(Err(StorageError::Timeout(self.timeouts.create)))
        .map_err(creation_failed)?;

        info!(
            "Created bucket {bucket} ({}, {})",
            self.bucket_settings.storage_class, self.bucket_settings.location
        );
        Ok(())
    }
}

/// Pumps every chunk of `stream` into `writer`
async fn copy<S, E>(stream: S, writer: &mut dyn ObjectWriter) -> Result<u64, CopyFailure>
where
    S: Stream<Item = Result<Bytes, E>> + Send,
    E: Display + Send,
{
    let mut stream = std::pin::pin!(stream);
    let mut copied = 0u64;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| CopyFailure::Read(e.to_string()))?;
        copied += chunk.len() as u64;
        writer.write(chunk).await.map_err(CopyFailure::Write)?;
    }

    Ok(copied)
}
