//! S3-compatible object store backend

use std::sync::Arc;

use aws_sdk_s3::{
    primitives::ByteStream,
    types::{
        BucketLocationConstraint, CompletedMultipartUpload, CompletedPart,
        CreateBucketConfiguration, StorageClass,
    },
    Client as S3Client,
};
use aws_smithy_types::body::SdkBody;
use bytes::{Bytes, BytesMut};
use tracing::{debug, instrument, warn};

use super::{BucketSettings, ObjectStore, ObjectWriter, StorageError, StorageResult};

/// Buffered bytes at which the writer switches to (or continues) a multipart upload
pub const PART_SIZE_BYTES: usize = 8 * 1024 * 1024;

/// Header carrying the owning project on bucket creation (GCS XML API)
const PROJECT_ID_HEADER: &str = "x-goog-project-id";

/// `CreateBucket` body with the storage class element the GCS XML API reads.
///
/// The SDK's `CreateBucketConfiguration` has no storage class, so this body
/// replaces the serialized one.
fn create_bucket_body(settings: &BucketSettings) -> String {
    format!(
        "<CreateBucketConfiguration>\
         <LocationConstraint>{}</LocationConstraint>\
         <StorageClass>{}</StorageClass>\
         </CreateBucketConfiguration>",
        xml_escape(&settings.location),
        xml_escape(&settings.storage_class),
    )
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Object store backed by an S3-compatible API
pub struct S3ObjectStore {
    s3_client: Arc<S3Client>,
    storage_class: StorageClass,
}

impl S3ObjectStore {
    /// Creates a new store
    ///
    /// # Arguments
    ///
    /// * `s3_client` - Pre-configured S3 client, shared for the process lifetime
    /// * `storage_class` - Storage class applied to written objects, e.g. `STANDARD`
    #[must_use]
    pub fn new(s3_client: Arc<S3Client>, storage_class: &str) -> Self {
        Self {
            s3_client,
            storage_class: StorageClass::from(storage_class),
        }
    }
}

#[async_trait::async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self))]
    async fn probe_bucket(&self, bucket: &str) -> StorageResult<()> {
        self.s3_client
            .head_bucket()
            .bucket(bucket)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| StorageError::from_head_bucket(bucket, e))
    }

    #[instrument(skip(self))]
    async fn create_bucket(&self, bucket: &str, settings: &BucketSettings) -> StorageResult<()> {
        let configuration = CreateBucketConfiguration::builder()
            .location_constraint(BucketLocationConstraint::from(settings.location.as_str()))
            .build();

        let project_id = settings.project_id.clone();
        let body = create_bucket_body(settings);

        self.s3_client
            .create_bucket()
            .bucket(bucket)
            .create_bucket_configuration(configuration)
            .customize()
            .mutate_request(move |request| {
                request
                    .headers_mut()
                    .insert("content-length", body.len().to_string());
                *request.body_mut() = SdkBody::from(body.clone());

                if let Some(project_id) = &project_id {
                    if let Err(e) = request
                        .headers_mut()
                        .try_insert(PROJECT_ID_HEADER, project_id.clone())
                    {
                        warn!("Dropping invalid project id header: {e}");
                    }
                }
            })
            .send()
            .await
            .map_err(|e| StorageError::from_create_bucket(bucket, e))?;

        debug!(
            "Created bucket {bucket} with storage class {}",
            settings.storage_class
        );
        Ok(())
    }

    fn writer(&self, bucket: &str, key: &str) -> Box<dyn ObjectWriter> {
        Box::new(S3ObjectWriter {
            s3_client: self.s3_client.clone(),
            bucket: bucket.to_string(),
            key: key.to_string(),
            storage_class: self.storage_class.clone(),
            buffer: BytesMut::new(),
            upload_id: None,
            parts: Vec::new(),
            size: 0,
        })
    }
}

/// Streaming writer for a single object.
///
/// Objects that fit in one part go out as a single `PutObject` on close.
/// Larger objects start a multipart upload once the buffer reaches
/// [`PART_SIZE_BYTES`]. An abandoned multipart upload is not aborted.
pub struct S3ObjectWriter {
    s3_client: Arc<S3Client>,
    bucket: String,
    key: String,
    storage_class: StorageClass,
    buffer: BytesMut,
    upload_id: Option<String>,
    parts: Vec<CompletedPart>,
    size: u64,
}

impl S3ObjectWriter {
    async fn ensure_multipart_upload(&mut self) -> StorageResult<String> {
        if let Some(upload_id) = &self.upload_id {
            return Ok(upload_id.clone());
        }

        let output = self
            .s3_client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .storage_class(self.storage_class.clone())
            .send()
            .await?;

        let upload_id = output
            .upload_id()
            .ok_or_else(|| StorageError::S3Error("Multipart upload has no id".to_string()))?
            .to_string();

        debug!("Started multipart upload {} for {}", upload_id, self.key);
        self.upload_id = Some(upload_id.clone());
        Ok(upload_id)
    }

    async fn upload_part(&mut self, data: Bytes) -> StorageResult<()> {
        let upload_id = self.ensure_multipart_upload().await?;
        let part_number = i32::try_from(self.parts.len() + 1)
            .map_err(|_| StorageError::S3Error("Too many parts".to_string()))?;

        let output = self
            .s3_client
            .upload_part()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(upload_id)
            .part_number(part_number)
            .content_length(content_length(&data)?)
            .body(ByteStream::from(data))
            .send()
            .await?;

        self.parts.push(
            CompletedPart::builder()
                .part_number(part_number)
                .set_e_tag(output.e_tag().map(ToString::to_string))
                .build(),
        );
        Ok(())
    }
}

fn content_length(data: &Bytes) -> StorageResult<i64> {
    i64::try_from(data.len()).map_err(|_| StorageError::S3Error("Part too large".to_string()))
}

#[async_trait::async_trait]
impl ObjectWriter for S3ObjectWriter {
    async fn write(&mut self, chunk: Bytes) -> StorageResult<()> {
        self.size += chunk.len() as u64;
        self.buffer.extend_from_slice(&chunk);

        while self.buffer.len() >= PART_SIZE_BYTES {
            let part = self.buffer.split_to(PART_SIZE_BYTES).freeze();
            self.upload_part(part).await?;
        }
        Ok(())
    }

    async fn close(&mut self) -> StorageResult<u64> {
        let remaining = self.buffer.split().freeze();

        let Some(upload_id) = self.upload_id.clone() else {
            self.s3_client
                .put_object()
                .bucket(&self.bucket)
                .key(&self.key)
                .storage_class(self.storage_class.clone())
                .content_length(content_length(&remaining)?)
                .body(ByteStream::from(remaining))
                .send()
                .await
                .map_err(|e| StorageError::from_put_object(&self.bucket, e))?;
            return Ok(self.size);
        };

        if !remaining.is_empty() {
            self.upload_part(remaining).await?;
        }

        self.s3_client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(std::mem::take(&mut self.parts)))
                    .build(),
            )
            .send()
            .await?;

        Ok(self.size)
    }
}
