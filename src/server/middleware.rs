use std::time::Instant;

use axum::body::Body;
use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use tracing::{error, info, warn};

/// Version of the request/response shapes served by this gateway.
pub const PROTOCOL_VERSION: &str = "1";

/// Adapter a request was routed to. Handlers attach it to the response.
#[derive(Debug, Clone)]
pub struct RequestModel(pub String);

/// Failure class of an error response, see `AdapterError::kind`.
#[derive(Debug, Clone, Copy)]
pub struct ErrorKind(pub &'static str);

/// One log line per request with the routed model and failure class, level
/// by status class. Health probes are not logged.
pub async fn logging_middleware(req: Request<Body>, next: Next) -> Response {
    if req.uri().path() == "/health" {
        return next.run(req).await;
    }

    let method = req.method().to_string();
    let route = req.uri().path().to_string();
    let start = Instant::now();

    let response = next.run(req).await;

    let status = response.status().as_u16();
    let duration_ms = start.elapsed().as_millis() as u64;
    let model = response
        .extensions()
        .get::<RequestModel>()
        .map(|m| m.0.as_str())
        .unwrap_or("-");

    match response.extensions().get::<ErrorKind>() {
        Some(kind) if status >= 500 => {
            error!(method, route, model, status, kind = kind.0, duration_ms, "request failed")
        }
        Some(kind) => {
            warn!(method, route, model, status, kind = kind.0, duration_ms, "request rejected")
        }
        None if status >= 400 => warn!(method, route, status, duration_ms, "request rejected"),
        None => info!(method, route, model, status, duration_ms, "request"),
    }

    response
}

/// X-Protocol-Version response header middleware.
pub async fn protocol_version_middleware(req: Request<Body>, next: Next) -> Response {
    let mut response = next.run(req).await;
    response.headers_mut().insert(
        "X-Protocol-Version",
        HeaderValue::from_static(PROTOCOL_VERSION),
    );
    response
}
