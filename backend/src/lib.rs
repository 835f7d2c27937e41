//! Image upload backend: a multipart upload endpoint that streams files into
//! an object-storage bucket, provisioning the bucket on first use.

#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    dead_code
)]

/// Object storage and the upload operation
pub mod image_storage;

/// HTTP routes
pub mod routes;

/// Server start-up and shutdown
pub mod server;

/// Configuration and error types
pub mod types;
