use std::sync::Arc;

use axum::{body::Body, http::Request, response::Response, Router};
use tower::ServiceExt;
use upload_backend::{
    image_storage::{
        mock::{FaultPlan, InMemoryObjectStore},
        BucketSettings, ImageStorage, DEFAULT_BUCKET_NAME,
    },
    server,
    types::Environment,
};

use super::MultipartBody;

/// Setup test environment variables with all the required configuration
pub fn setup_test_env() {
    // Load test environment variables
    dotenvy::from_path(".env.example").ok();

    // Initialize tracing for tests
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init()
        .ok();
}

/// Router wired to an in-memory object store
pub struct TestSetup {
    pub router: Router,
    pub store: InMemoryObjectStore,
    pub bucket_name: String,
}

impl TestSetup {
    pub fn new() -> Self {
        Self::with_faults(FaultPlan::default())
    }

    pub fn with_faults(faults: FaultPlan) -> Self {
        setup_test_env();

        let store = InMemoryObjectStore::with_faults(faults);
        let bucket_name = DEFAULT_BUCKET_NAME.to_string();

        let image_storage = Arc::new(ImageStorage::new(
            Arc::new(store.clone()),
            bucket_name.clone(),
            BucketSettings::new(Some("test-project".to_string())),
        ));

        let router = server::router(&Environment::Development, image_storage);

        Self {
            router,
            store,
            bucket_name,
        }
    }

    /// Starts with the upload bucket already present
    pub fn with_existing_bucket() -> Self {
        let setup = Self::new();
        setup.store.insert_bucket(&setup.bucket_name);
        setup
    }

    pub async fn send_multipart_request(
        &self,
        route: &str,
        form: MultipartBody,
    ) -> Result<Response, Box<dyn std::error::Error>> {
        let request = Request::builder()
            .uri(route)
            .method("POST")
            .header("Content-Type", form.content_type())
            .body(Body::from(form.into_bytes()))?;

        let response = self.router.clone().oneshot(request).await?;
        Ok(response)
    }

    pub async fn send_post_request(
        &self,
        route: &str,
        content_type: &str,
        body: impl Into<Body>,
    ) -> Result<Response, Box<dyn std::error::Error>> {
        let request = Request::builder()
            .uri(route)
            .method("POST")
            .header("Content-Type", content_type)
            .body(body.into())?;

        let response = self.router.clone().oneshot(request).await?;
        Ok(response)
    }

    pub async fn send_get_request(
        &self,
        route: &str,
    ) -> Result<Response, Box<dyn std::error::Error>> {
        let request = Request::builder()
            .uri(route)
            .method("GET")
            .body(Body::empty())?;
        let response = self.router.clone().oneshot(request).await?;
        Ok(response)
    }
}
