mod health;
mod hello;
/// Image upload handler
pub mod save;

use axum::{
    routing::{get, post},
    Router,
};

/// Creates the router with all handler routes
#[must_use]
pub fn handler() -> Router {
    Router::new()
        .route("/", get(hello::handler))
        .route("/health", get(health::handler))
        .route("/save", post(save::save_image))
}
