//! REST-to-middleware call translation
//!
//! `POST /api/{path}` turns the path into a middleware method name (slashes
//! become dots) and the JSON body into call parameters, then dispatches the
//! call over the shared WebSocket session. Errors come back as
//! `{"detail": "..."}` bodies with the matching HTTP status.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::auth;
use crate::server::AppState;
use crate::types::{BridgeError, Result};

/// Handle `POST /api/{path}`
///
/// The path after `/api/` names the middleware method, with `/` accepted as
/// an alias for `.` so callers can write `pool/dataset/query` or
/// `pool.dataset.query` interchangeably.
pub async fn handle_api_request(
    state: Arc<AppState>,
    path: &str,
    auth_header: Option<&str>,
    body: Bytes,
) -> Response<Full<Bytes>> {
    if let Err(e) = auth::check_basic_auth(&state.args, auth_header) {
        warn!(path = %path, "Rejected unauthenticated request");
        return unauthorized_response(&e);
    }

    let params = match parse_params(&body) {
        Ok(params) => params,
        Err(e) => {
            warn!(path = %path, error = %e, "Rejected malformed request body");
            return error_response(&e);
        }
    };

    let method = path.replace('/', ".");
    info!(
        method = %method,
        params = ?params,
        host = %state.args.truenas_host,
        "Sending request"
    );

    match state.supervisor.dispatch(&method, params).await {
        Ok(result) => json_response(StatusCode::OK, result.to_string()),
        Err(e @ BridgeError::RetryExhausted { .. }) => {
            error!("TrueNAS connection unrecoverable, requesting shutdown");
            state.request_shutdown(&e.to_string());
            error_response(&e)
        }
        Err(e) => error_response(&e),
    }
}

/// Map the request body to middleware call parameters.
///
/// An absent body, JSON `null` and `{}` all mean "no parameters"; any other
/// object becomes the single positional parameter. Non-object bodies are
/// rejected rather than forwarded.
fn parse_params(body: &Bytes) -> Result<Vec<Value>> {
    if body.is_empty() {
        return Ok(Vec::new());
    }

    let data: Value = serde_json::from_slice(body)?;

    match data {
        Value::Null => Ok(Vec::new()),
        Value::Object(map) if map.is_empty() => Ok(Vec::new()),
        Value::Object(map) => Ok(vec![Value::Object(map)]),
        _ => Err(BridgeError::BadRequest(
            "Request body must be a JSON object".to_string(),
        )),
    }
}

/// Build a JSON response with a pre-serialized body
fn json_response(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}

/// Build a `{"detail": ...}` error response from a bridge error
fn error_response(err: &BridgeError) -> Response<Full<Bytes>> {
    let body = serde_json::json!({ "detail": err.to_string() });
    json_response(err.status_code(), body.to_string())
}

/// 401 with the Basic challenge header
fn unauthorized_response(err: &BridgeError) -> Response<Full<Bytes>> {
    let body = serde_json::json!({ "detail": err.to_string() });
    Response::builder()
        .status(StatusCode::UNAUTHORIZED)
        .header("Content-Type", "application/json")
        .header("WWW-Authenticate", "Basic")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}
