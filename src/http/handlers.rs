//! Request handlers and the admission middleware.

use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::trace;

use crate::admission::Gatekeeper;
use crate::ratelimit::Decision;

/// Body message returned with `429 Too Many Requests`.
pub const TOO_MANY_REQUESTS_MESSAGE: &str = "Too many requests. Please try again later.";

/// Gate a request on its client's window, keyed by source address.
///
/// Every request that reaches this middleware produces exactly one audit
/// record. Blocked requests never reach the inner handler.
pub async fn admission_middleware(
    State(gate): State<Arc<Gatekeeper>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    let key = peer.ip().to_string();
    let endpoint = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    match gate.admit(&key, &endpoint) {
        Decision::Allowed => {
            trace!(key = %key, endpoint = %endpoint, "Request admitted");
            next.run(request).await
        }
        Decision::Blocked => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({ "error": TOO_MANY_REQUESTS_MESSAGE })),
        )
            .into_response(),
    }
}

/// POST /api/action
pub async fn action() -> Json<Value> {
    Json(json!({ "message": "done" }))
}

/// GET /health
pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}
