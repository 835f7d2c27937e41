//! Error types for bucket and object operations

use std::time::Duration;

use aws_sdk_s3::{
    error::{ProvideErrorMetadata, SdkError},
    operation::{
        complete_multipart_upload::CompleteMultipartUploadError,
        create_bucket::CreateBucketError, create_multipart_upload::CreateMultipartUploadError,
        head_bucket::HeadBucketError, put_object::PutObjectError, upload_part::UploadPartError,
    },
};
use thiserror::Error;

/// Result type for object store calls
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors reported by an [`ObjectStore`](super::ObjectStore) backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Bucket does not exist (or is not visible to these credentials)
    #[error("Bucket not found: {0}")]
    BucketNotFound(String),

    /// Bucket already exists and is owned by the caller
    #[error("Bucket already exists: {0}")]
    BucketAlreadyExists(String),

    /// S3 service error
    #[error("S3 service error: {0}")]
    S3Error(String),

    /// AWS SDK error (dispatch, timeout, response parsing)
    #[error("AWS SDK error: {0}")]
    AwsError(String),

    /// Upstream service error (5xx from the storage provider)
    #[error("Upstream service error: {0}")]
    UpstreamError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The call did not complete before its deadline
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),
}

/// The bucket existence check failed.
///
/// "Not found" and transient faults are deliberately not told apart by the
/// upload flow: both lead to a creation attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Bucket probe for {bucket} failed: {source}")]
pub struct BucketProbeError {
    /// Bucket that was probed
    pub bucket: String,
    /// Underlying store error
    #[source]
    pub source: StorageError,
}

/// Bucket creation failed. Logged only, the write is attempted anyway.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Bucket creation for {bucket} failed: {source}")]
pub struct BucketCreationError {
    /// Bucket that could not be created
    pub bucket: String,
    /// Underlying store error
    #[source]
    pub source: StorageError,
}

/// Why copying the source stream into the sink stopped
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CopyFailure {
    /// The inbound stream yielded an error, e.g. a request body that broke off
    #[error("failed to read upload stream: {0}")]
    Read(String),

    /// The sink rejected a chunk, or the write deadline passed
    #[error(transparent)]
    Write(StorageError),
}

/// Errors returned by [`ImageStorage::upload`](super::ImageStorage::upload)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UploadError {
    /// Reading the source stream or writing a chunk into the sink failed
    #[error("Copy into {bucket}/{key} failed: {cause}")]
    Copy {
        /// Target bucket
        bucket: String,
        /// Target object key
        key: String,
        /// Which side of the copy failed
        #[source]
        cause: CopyFailure,
    },

    /// The sink rejected the object when it was closed
    #[error("Finalize of {bucket}/{key} failed: {source}")]
    Finalize {
        /// Target bucket
        bucket: String,
        /// Target object key
        key: String,
        /// Underlying store error
        #[source]
        source: StorageError,
    },
}

impl UploadError {
    /// Whether the failure happened while copying bytes (as opposed to closing the sink)
    #[must_use]
    pub const fn is_copy(&self) -> bool {
        matches!(self, Self::Copy { .. })
    }

    /// Whether the inbound stream, not the store, caused the failure
    #[must_use]
    pub const fn is_read_failure(&self) -> bool {
        matches!(
            self,
            Self::Copy {
                cause: CopyFailure::Read(_),
                ..
            }
        )
    }
}

/// Maps an SDK error to a [`StorageError`], keeping 5xx responses apart
fn classify<E>(error: SdkError<E>) -> StorageError
where
    E: std::error::Error + Send + Sync + 'static,
{
    match &error {
        SdkError::ServiceError(service_err) if service_err.raw().status().as_u16() >= 500 => {
            StorageError::UpstreamError(format!("{:?}", service_err.err()))
        }
        SdkError::ServiceError(service_err) => StorageError::S3Error(format!("{:?}", service_err.err())),
        SdkError::TimeoutError(_) => StorageError::AwsError(format!("timeout: {error}")),
        _ => StorageError::AwsError(error.to_string()),
    }
}

impl StorageError {
    /// Classifies a `HeadBucket` failure for `bucket`
    #[must_use]
    pub fn from_head_bucket(bucket: &str, error: SdkError<HeadBucketError>) -> Self {
        let not_found = matches!(
            &error,
            SdkError::ServiceError(service_err)
                if matches!(service_err.err(), HeadBucketError::NotFound(_))
                    || service_err.raw().status().as_u16() == 404
        );

        if not_found {
            return Self::BucketNotFound(bucket.to_string());
        }
        classify(error)
    }

    /// Classifies a `CreateBucket` failure for `bucket`
    #[must_use]
    pub fn from_create_bucket(bucket: &str, error: SdkError<CreateBucketError>) -> Self {
        let already_owned = matches!(
            &error,
            SdkError::ServiceError(service_err)
                if matches!(service_err.err(), CreateBucketError::BucketAlreadyOwnedByYou(_))
        );

        if already_owned {
            return Self::BucketAlreadyExists(bucket.to_string());
        }
        classify(error)
    }

    /// Classifies a `PutObject` failure for `bucket`
    #[must_use]
    pub fn from_put_object(bucket: &str, error: SdkError<PutObjectError>) -> Self {
        let no_such_bucket = matches!(
            &error,
            SdkError::ServiceError(service_err)
                if service_err.err().code() == Some("NoSuchBucket")
        );

        if no_such_bucket {
            return Self::BucketNotFound(bucket.to_string());
        }
        classify(error)
    }
}

impl From<SdkError<CreateMultipartUploadError>> for StorageError {
    fn from(error: SdkError<CreateMultipartUploadError>) -> Self {
        classify(error)
    }
}

impl From<SdkError<UploadPartError>> for StorageError {
    fn from(error: SdkError<UploadPartError>) -> Self {
        classify(error)
    }
}

impl From<SdkError<CompleteMultipartUploadError>> for StorageError {
    fn from(error: SdkError<CompleteMultipartUploadError>) -> Self {
        classify(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_s3::{
        error::ErrorMetadata,
        types::error::{BucketAlreadyOwnedByYou, NotFound},
    };
    use aws_smithy_runtime_api::http::{Response as HttpResponse, StatusCode};
    use aws_smithy_types::body::SdkBody;

    fn response(status: u16) -> HttpResponse {
        HttpResponse::new(StatusCode::try_from(status).unwrap(), SdkBody::empty())
    }

    #[test]
    fn test_head_bucket_not_found() {
        let error = SdkError::service_error(
            HeadBucketError::NotFound(NotFound::builder().build()),
            response(404),
        );

        assert_eq!(
            StorageError::from_head_bucket("images", error),
            StorageError::BucketNotFound("images".to_string())
        );
    }

    #[test]
    fn test_head_bucket_server_error_is_upstream() {
        let error = SdkError::service_error(
            HeadBucketError::generic(ErrorMetadata::builder().code("SlowDown").build()),
            response(503),
        );

        assert!(matches!(
            StorageError::from_head_bucket("images", error),
            StorageError::UpstreamError(_)
        ));
    }

    #[test]
    fn test_head_bucket_forbidden_is_service_error() {
        let error = SdkError::service_error(
            HeadBucketError::generic(ErrorMetadata::builder().code("AccessDenied").build()),
            response(403),
        );

        assert!(matches!(
            StorageError::from_head_bucket("images", error),
            StorageError::S3Error(_)
        ));
    }

    #[test]
    fn test_head_bucket_timeout_is_sdk_error() {
        let error: SdkError<HeadBucketError> = SdkError::timeout_error("deadline exceeded");

        assert!(matches!(
            StorageError::from_head_bucket("images", error),
            StorageError::AwsError(_)
        ));
    }

    #[test]
    fn test_create_bucket_already_owned() {
        let error = SdkError::service_error(
            CreateBucketError::BucketAlreadyOwnedByYou(BucketAlreadyOwnedByYou::builder().build()),
            response(409),
        );

        assert_eq!(
            StorageError::from_create_bucket("images", error),
            StorageError::BucketAlreadyExists("images".to_string())
        );
    }

    #[test]
    fn test_put_object_no_such_bucket() {
        let error = SdkError::service_error(
            PutObjectError::generic(ErrorMetadata::builder().code("NoSuchBucket").build()),
            response(404),
        );

        assert_eq!(
            StorageError::from_put_object("images", error),
            StorageError::BucketNotFound("images".to_string())
        );
    }

    #[test]
    fn test_upload_error_kind() {
        let copy = UploadError::Copy {
            bucket: "images".to_string(),
            key: "test/image/a.png".to_string(),
            cause: CopyFailure::Write(StorageError::AwsError("connection reset".to_string())),
        };
        let read = UploadError::Copy {
            bucket: "images".to_string(),
            key: "test/image/a.png".to_string(),
            cause: CopyFailure::Read("incomplete field data".to_string()),
        };
        let finalize = UploadError::Finalize {
            bucket: "images".to_string(),
            key: "test/image/a.png".to_string(),
            source: StorageError::BucketNotFound("images".to_string()),
        };

        assert!(copy.is_copy());
        assert!(!copy.is_read_failure());
        assert!(read.is_copy());
        assert!(read.is_read_failure());
        assert!(!finalize.is_copy());
        assert_eq!(
            read.to_string(),
            "Copy into images/test/image/a.png failed: failed to read upload stream: incomplete field data"
        );
        assert_eq!(
            finalize.to_string(),
            "Finalize of images/test/image/a.png failed: Bucket not found: images"
        );
    }
}
