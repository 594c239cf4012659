use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;
use tracing::{info, warn};

/// Log one line per request: `status method uri - Nms`.
pub async fn request_logger(request: Request, next: Next) -> Response {
    let request_id = uuid::Uuid::now_v7();
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let response = next.run(request).await;

    let status = response.status();
    let elapsed = start.elapsed().as_millis();
    if status.is_client_error() || status.is_server_error() {
        warn!(
            request_id = %request_id,
            "{} {} {} - {}ms",
            status.as_u16(),
            method,
            uri,
            elapsed
        );
    } else {
        info!(
            request_id = %request_id,
            "{} {} {} - {}ms",
            status.as_u16(),
            method,
            uri,
            elapsed
        );
    }

    response
}
