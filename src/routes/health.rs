//! Health check endpoint
//!
//! `/health` is unauthenticated and always answers 200. The health signal is
//! the `status` field in the body, so load balancers keep getting a parseable
//! response even while the middleware connection is down.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;

use crate::server::AppState;

/// Health response body
#[derive(Serialize)]
pub struct HealthResponse {
    /// "healthy" when the middleware answers the liveness check
    pub status: &'static str,
    /// Current timestamp (RFC 3339, UTC)
    pub timestamp: String,
}

/// Handle the health check (/health)
pub async fn health_check(state: Arc<AppState>) -> Response<Full<Bytes>> {
    let status = if state.supervisor.is_connected().await {
        "healthy"
    } else {
        "unhealthy"
    };

    let health = HealthResponse {
        status,
        timestamp: chrono::Utc::now().to_rfc3339(),
    };

    let body = serde_json::to_string(&health)
        .unwrap_or_else(|_| r#"{"status":"unhealthy"}"#.to_string());

    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}
