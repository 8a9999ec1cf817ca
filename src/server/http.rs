//! HTTP server implementation
//!
//! hyper http1 front end with one task per connection. Every request gets a
//! start/finish log pair carrying the caller address, status and timing.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::config::Args;
use crate::routes;
use crate::supervisor::Supervisor;
use crate::types::Result;

type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

/// Shared application state
pub struct AppState {
    pub args: Args,
    /// Connection supervisor owning the middleware session
    pub supervisor: Arc<Supervisor>,
    /// Fatal-error side channel back to main
    shutdown_tx: mpsc::Sender<String>,
}

impl AppState {
    /// Create the state plus the receiving end of the shutdown channel
    pub fn new(args: Args, supervisor: Arc<Supervisor>) -> (Self, mpsc::Receiver<String>) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        (
            Self {
                args,
                supervisor,
                shutdown_tx,
            },
            shutdown_rx,
        )
    }

    /// Ask the process to stop. Used when the middleware connection is
    /// unrecoverable; calls after the first are no-ops.
    pub fn request_shutdown(&self, reason: &str) {
        let _ = self.shutdown_tx.try_send(reason.to_string());
    }
}

/// Bind the configured address and serve until the process exits
pub async fn run(state: Arc<AppState>) -> Result<()> {
    let listener = TcpListener::bind(state.args.listen).await?;
    info!("HTTP server listening on {}", state.args.listen);
    serve(listener, state).await
}

/// Accept loop over an already-bound listener
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Log wrapper around the route dispatch
async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> std::result::Result<Response<BoxBody>, hyper::Error> {
    let started = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let client = client_ip(&req, addr);

    info!("[{}] {} {}", client, method, path);

    let response = route_request(state, req).await?;

    info!(
        "[{}] {} {} -> {} ({:.3}s)",
        client,
        method,
        path,
        response.status().as_u16(),
        started.elapsed().as_secs_f64()
    );

    Ok(response)
}

/// Route incoming HTTP requests
async fn route_request(
    state: Arc<AppState>,
    req: Request<Incoming>,
) -> std::result::Result<Response<BoxBody>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = match (method, path.as_str()) {
        // Liveness endpoint - always 200, connection state lives in the body
        (Method::GET, "/health") => to_boxed(routes::health_check(state).await),

        // Everything under /api/ is a middleware method call
        (Method::POST, p) if p.starts_with("/api/") && p.len() > "/api/".len() => {
            let api_path = p.strip_prefix("/api/").unwrap_or(p).to_string();
            let auth_header = req
                .headers()
                .get("authorization")
                .and_then(|h| h.to_str().ok())
                .map(|h| h.to_string());
            let body = req.collect().await?.to_bytes();
            to_boxed(
                routes::handle_api_request(state, &api_path, auth_header.as_deref(), body).await,
            )
        }

        (m, p) if p.starts_with("/api/") && m != Method::POST => {
            to_boxed(method_not_allowed_response())
        }

        (_, p) => to_boxed(not_found_response(p)),
    };

    Ok(response)
}

/// Client address for request logs. Honors the first X-Forwarded-For entry
/// when a proxy sits in front, otherwise uses the peer address.
fn client_ip<B>(req: &Request<B>, addr: SocketAddr) -> String {
    req.headers()
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.split(',').next())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
        .unwrap_or_else(|| addr.ip().to_string())
}

/// Convert a Full<Bytes> body to BoxBody
fn to_boxed(response: Response<Full<Bytes>>) -> Response<BoxBody> {
    response.map(|body| body.map_err(|never| match never {}).boxed())
}

/// Not found response
fn not_found_response(path: &str) -> Response<Full<Bytes>> {
    debug!("No route for {}", path);
    let body = serde_json::json!({ "detail": "Not Found" });

    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}

/// 405 for /api/ paths hit with anything but POST
fn method_not_allowed_response() -> Response<Full<Bytes>> {
    let body = serde_json::json!({ "detail": "Method Not Allowed" });

    Response::builder()
        .status(StatusCode::METHOD_NOT_ALLOWED)
        .header("Content-Type", "application/json")
        .header("Allow", "POST")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}
