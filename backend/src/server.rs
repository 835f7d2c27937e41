use std::sync::Arc;
use std::time::Duration;

use axum::{extract::DefaultBodyLimit, Extension, Router};
use tokio::net::TcpListener;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::{image_storage::ImageStorage, routes, types::Environment};

/// Upper bound for a whole request, storage round trips included
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Builds the application router with its shared dependencies
#[must_use]
pub fn router(environment: &Environment, image_storage: Arc<ImageStorage>) -> Router {
    routes::handler()
        .layer(Extension(image_storage))
        .layer(DefaultBodyLimit::max(environment.max_upload_bytes()))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
}

/// Starts the server with the given environment and dependencies
///
/// # Errors
///
/// Returns an error if the server fails to start or bind to the port
pub async fn start(environment: Environment, image_storage: Arc<ImageStorage>) -> anyhow::Result<()> {
    let router = router(&environment, image_storage);
    let addr = environment.bind_address()?;

    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("🔄 Upload backend started on http://{addr}");

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(anyhow::Error::from)
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received, draining connections");
}
