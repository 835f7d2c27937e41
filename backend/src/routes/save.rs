use std::sync::Arc;

use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        Multipart,
    },
    response::Html,
    Extension,
};
use futures::TryStreamExt;
use tracing::{error, info, instrument};

use crate::{
    image_storage::ImageStorage,
    types::{AppError, FormExtractionError},
};

/// Name of the multipart field carrying the file
pub const IMAGE_FIELD: &str = "image";

/// Body returned once the file has been handed to storage
pub const SAVE_RESPONSE_BODY: &str = "OK";

/// Streams the `image` file of a multipart form into the image bucket
///
/// The file is stored at `test/image/<original filename>` in the configured
/// bucket, which is created on the fly if it cannot be found.
///
/// # Returns
///
/// `200 OK` with body `OK` once the file field has been read to its end. The
/// outcome of the storage write is only logged: a failed upload still
/// answers `200`.
///
/// # Errors
///
/// - `FormExtractionError::NotMultipart` - The body is not `multipart/form-data`
/// - `FormExtractionError::Malformed` - The multipart body could not be parsed,
///   including a body that breaks off inside the file
/// - `FormExtractionError::MissingField` - No `image` field was sent
/// - `FormExtractionError::NotAFile` - `image` was sent as a plain value
#[instrument(skip_all)]
pub async fn save_image(
    Extension(image_storage): Extension<Arc<ImageStorage>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Html<&'static str>, AppError> {
    let mut multipart = multipart.map_err(FormExtractionError::from)?;
    let mut saw_plain_value = false;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(FormExtractionError::from)?
    {
        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }

        let Some(filename) = field.file_name().map(ToString::to_string) else {
            saw_plain_value = true;
            continue;
        };

        info!("Received image upload: {filename}");

        // Keep the parse error, the storage layer only sees its message
        let mut read_error: Option<MultipartError> = None;
        let body = field.map_err(|e| {
            let message = e.to_string();
            read_error = Some(e);
            message
        });

        // The field is dropped with this call, whatever the outcome
        let result = image_storage.upload_image(&filename, body).await;

        if let Some(e) = read_error {
            return Err(FormExtractionError::Malformed(e).into());
        }

        match result {
            Ok(object) => info!(
                size = object.size,
                "Uploaded {} to {}",
                object.key,
                object.bucket
            ),
            // Upload failures are not reported to the client
            Err(e) => error!("Upload of {filename} failed: {e}"),
        }

        return Ok(Html(SAVE_RESPONSE_BODY));
    }

    let err = if saw_plain_value {
        FormExtractionError::NotAFile(IMAGE_FIELD)
    } else {
        FormExtractionError::MissingField(IMAGE_FIELD)
    };
    Err(err.into())
}
