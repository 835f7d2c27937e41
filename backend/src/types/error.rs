//! Universal error handling for the API

use axum::{
    extract::multipart::{MultipartError, MultipartRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// API error response envelope
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorResponse {
    /// Whether the client should retry the request
    pub allow_retry: bool,
    /// Error details
    error: ErrorBody,
}

/// Error body containing code and message
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    /// Machine-readable error code
    pub code: &'static str,
    /// Human-readable error message
    pub message: &'static str,
}

/// Application error type that wraps the API error response
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    inner: ApiErrorResponse,
}

impl AppError {
    /// Create a new application error
    #[must_use]
    pub const fn new(
        status: StatusCode,
        code: &'static str,
        msg: &'static str,
        retry: bool,
    ) -> Self {
        Self {
            status,
            inner: ApiErrorResponse {
                allow_retry: retry,
                error: ErrorBody { code, message: msg },
            },
        }
    }

    /// HTTP status of this error
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Log the error based on status code
        match self.status.as_u16() {
            400..=499 => tracing::warn!(
                "Client error: {} - {}",
                self.inner.error.code,
                self.inner.error.message
            ),
            500..=599 => tracing::error!(
                "Server error: {} - {}",
                self.inner.error.code,
                self.inner.error.message
            ),
            _ => {}
        }

        (self.status, Json(self.inner)).into_response()
    }
}

/// The uploaded form does not carry a usable `image` file
#[derive(Error, Debug)]
pub enum FormExtractionError {
    /// The request is not a readable multipart form
    #[error("Request is not a multipart form: {0}")]
    NotMultipart(#[from] MultipartRejection),

    /// The multipart body could not be parsed
    #[error("Malformed multipart body: {0}")]
    Malformed(#[from] MultipartError),

    /// No field with the expected name was sent
    #[error("Missing form field: {0}")]
    MissingField(&'static str),

    /// The field was sent as a plain value instead of a file
    #[error("Form field {0} is not a file")]
    NotAFile(&'static str),
}

/// Convert form extraction errors to application errors
impl From<FormExtractionError> for AppError {
    fn from(err: FormExtractionError) -> Self {
        tracing::warn!("Form extraction failed: {err}");

        match err {
            FormExtractionError::NotMultipart(_) => Self::new(
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "invalid_content_type",
                "Expected a multipart/form-data request",
                false,
            ),
            FormExtractionError::Malformed(_) => Self::new(
                StatusCode::BAD_REQUEST,
                "malformed_form",
                "Multipart body could not be parsed",
                false,
            ),
            FormExtractionError::MissingField(_) | FormExtractionError::NotAFile(_) => Self::new(
                StatusCode::BAD_REQUEST,
                "missing_file",
                "Form field `image` with a file is required",
                false,
            ),
        }
    }
}
