use std::sync::Arc;

use aws_sdk_s3::Client as S3Client;

use tracing_subscriber::{fmt, EnvFilter};
use upload_backend::{
    image_storage::{ImageStorage, S3ObjectStore},
    server,
    types::Environment,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A local .env file is optional
    let dotenv_path = dotenvy::dotenv().ok();

    let environment = Environment::from_env();

    // Use JSON format for staging/production, regular format for development
    if environment.json_logs() {
        fmt()
            .json()
            .with_env_filter(EnvFilter::from_default_env())
            .init();
    } else {
        fmt().with_env_filter(EnvFilter::from_default_env()).init();
    }

    if let Some(path) = dotenv_path {
        tracing::debug!("Loaded environment from {}", path.display());
    }

    let bucket_settings = environment.bucket_settings();
    if bucket_settings.project_id.is_none() {
        tracing::warn!("PROJECT_ID is not set, missing buckets cannot be created");
    }

    // One client for the lifetime of the process
    let s3_client = Arc::new(S3Client::from_conf(environment.s3_client_config().await));
    let object_store = Arc::new(S3ObjectStore::new(
        s3_client,
        &bucket_settings.storage_class,
    ));
    let image_storage = Arc::new(ImageStorage::new(
        object_store,
        environment.bucket_name(),
        bucket_settings,
    ));

    tracing::info!(
        "✅ Initialized image storage for bucket {}",
        image_storage.bucket_name()
    );

    server::start(environment, image_storage).await
}
