//! Request timing middleware.

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use std::time::{Duration, Instant};

/// Requests slower than this are logged as warnings.
pub const SLOW_REQUEST: Duration = Duration::from_millis(100);

/// Logs method, path, status and duration of every request.
///
/// Slow requests are logged at `warn`, the rest at `debug`.
pub async fn timing_layer(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    let response = next.run(request).await;

    log_request(&method, &path, response.status(), start.elapsed());
    response
}

fn log_request(method: &Method, path: &str, status: StatusCode, elapsed: Duration) {
    let duration_ms = elapsed.as_millis() as u64;
    if elapsed > SLOW_REQUEST {
        tracing::warn!(%method, path, status = status.as_u16(), duration_ms, "Slow request");
    } else {
        tracing::debug!(%method, path, status = status.as_u16(), duration_ms, "Request completed");
    }
}
