//! Environment configuration for different deployment stages

use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use aws_config::{retry::RetryConfig, timeout::TimeoutConfig, BehaviorVersion};

use crate::image_storage::{BucketSettings, DEFAULT_BUCKET_LOCATION, DEFAULT_BUCKET_NAME};

/// Default port, matching the historical `localhost:1323` binding
const DEFAULT_PORT: u16 = 1323;

/// Default cap on request bodies (32 MiB)
const DEFAULT_MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

/// Application environment configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    /// Production environment
    Production,
    /// Staging environment
    Staging,
    /// Development environment (uses `LocalStack`)
    Development,
}

impl Environment {
    /// Creates an Environment from the `APP_ENV` environment variable
    ///
    /// # Panics
    ///
    /// Panics if `APP_ENV` contains an invalid value
    #[must_use]
    pub fn from_env() -> Self {
        let env = env::var("APP_ENV")
            .unwrap_or_else(|_| "development".to_string())
            .trim()
            .to_lowercase();

        match env.as_str() {
            "production" => Self::Production,
            "staging" => Self::Staging,
            "development" => Self::Development,
            _ => panic!("Invalid environment: {env}"),
        }
    }

    /// Project that owns auto-provisioned buckets
    #[must_use]
    pub fn project_id(&self) -> Option<String> {
        env::var("PROJECT_ID")
            .ok()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
    }

    /// Bucket uploaded images are written to
    #[must_use]
    pub fn bucket_name(&self) -> String {
        env::var("UPLOAD_BUCKET_NAME").unwrap_or_else(|_| DEFAULT_BUCKET_NAME.to_string())
    }

    /// Location constraint for auto-provisioned buckets
    #[must_use]
    pub fn bucket_location(&self) -> String {
        env::var("BUCKET_LOCATION").unwrap_or_else(|_| DEFAULT_BUCKET_LOCATION.to_string())
    }

    /// Settings applied when the upload bucket has to be created
    #[must_use]
    pub fn bucket_settings(&self) -> BucketSettings {
        BucketSettings::new(self.project_id()).with_location(self.bucket_location())
    }

    /// Returns the endpoint URL to use for the storage API
    #[must_use]
    pub fn storage_endpoint_url(&self) -> Option<String> {
        match self {
            // e.g. https://storage.googleapis.com for the GCS interoperability API
            Self::Production | Self::Staging => env::var("STORAGE_ENDPOINT_URL").ok(),
            // LocalStack endpoint for development
            Self::Development => Some(
                env::var("STORAGE_ENDPOINT_URL")
                    .unwrap_or_else(|_| "http://localhost:4566".to_string()),
            ),
        }
    }

    /// Address the HTTP server binds to
    ///
    /// # Errors
    ///
    /// Returns an error if `HOST` or `PORT` cannot be parsed
    pub fn bind_address(&self) -> anyhow::Result<SocketAddr> {
        let host = env::var("HOST").map_or(Ok(IpAddr::V4(Ipv4Addr::LOCALHOST)), |h| h.parse())?;
        let port = env::var("PORT").map_or(Ok(DEFAULT_PORT), |p| p.parse())?;
        Ok(SocketAddr::new(host, port))
    }

    /// Largest request body accepted by the upload route
    #[must_use]
    pub fn max_upload_bytes(&self) -> usize {
        env::var("MAX_UPLOAD_BYTES")
            .ok()
            .and_then(|val| val.parse::<usize>().ok())
            .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES)
    }

    /// Whether logs should be emitted as JSON
    #[must_use]
    pub const fn json_logs(&self) -> bool {
        matches!(self, Self::Production | Self::Staging)
    }

    /// AWS configuration with retry and timeout settings
    pub async fn aws_config(&self) -> aws_config::SdkConfig {
        // Uploads are never retried
        let retry_config = RetryConfig::disabled();

        let timeout_config = TimeoutConfig::builder()
            .connect_timeout(Duration::from_secs(5))
            .operation_timeout(Duration::from_secs(30))
            .build();

        let mut config_builder = aws_config::load_defaults(BehaviorVersion::latest())
            .await
            .to_builder()
            .retry_config(retry_config)
            .timeout_config(timeout_config);

        if let Some(endpoint_url) = self.storage_endpoint_url() {
            config_builder = config_builder.endpoint_url(endpoint_url);
        }

        config_builder.build()
    }

    /// S3-compatible storage service configuration
    pub async fn s3_client_config(&self) -> aws_sdk_s3::Config {
        let aws_config = self.aws_config().await;
        let s3_config: aws_sdk_s3::Config = (&aws_config).into();
        let mut builder = s3_config.to_builder();

        // Path-style addressing for LocalStack and the GCS interoperability API
        if matches!(self, Self::Development) || self.storage_endpoint_url().is_some() {
            builder.set_force_path_style(Some(true));
        }

        builder.build()
    }
}
