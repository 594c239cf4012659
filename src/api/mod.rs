//! HTTP surface: webhook endpoint, health and job status

pub mod middleware;
pub mod status;
pub mod webhook;

use axum::{Router, middleware as axum_middleware, routing};

use crate::SharedState;

pub use status::{get_job, root, status};
pub use webhook::{WebhookRejection, handle_webhook};

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", routing::get(root).post(handle_webhook))
        .route("/status", routing::get(status))
        .route("/jobs/{id}", routing::get(get_job))
        .layer(axum_middleware::from_fn(middleware::request_logger))
        .with_state(state)
}
