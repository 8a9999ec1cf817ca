//! WebSocket JSON-RPC client for the TrueNAS middleware
//!
//! Maintains one persistent WebSocket connection. A background task owns the
//! socket: it forwards outbound frames from an mpsc channel, correlates
//! inbound JSON-RPC replies to waiting callers by request id, and keeps the
//! connection alive with periodic WebSocket pings. When the socket drops,
//! every in-flight call fails with the connection-closed condition; the
//! supervisor decides whether to reconnect.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::{http::Request, protocol::Message};
use tokio_tungstenite::{connect_async_tls_with_config, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{Connector, Transport};
use crate::types::{BridgeError, Result};

/// Keep-alive ping interval
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Missed-ping allowance before the connection is declared dead
const PONG_GRACE: u32 = 2;

/// In-flight calls waiting for a reply, keyed by JSON-RPC request id
type Pending = Arc<DashMap<String, oneshot::Sender<Result<Value>>>>;

/// Production [`Connector`]: opens a TLS WebSocket to the middleware URL
pub struct WsConnector {
    uri: String,
}

impl WsConnector {
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>> {
        let transport = WsTransport::connect(&self.uri).await?;
        Ok(Box::new(transport))
    }
}

/// A live WebSocket connection to the middleware
pub struct WsTransport {
    /// Outbound frames to the connection task
    tx: mpsc::Sender<Message>,
    /// In-flight calls awaiting replies
    pending: Pending,
}

impl WsTransport {
    /// Open a WebSocket to `uri` and start the connection task.
    ///
    /// Certificate verification is disabled: TrueNAS systems ship self-signed
    /// certificates by default.
    pub async fn connect(uri: &str) -> Result<Self> {
        let request = Request::builder()
            .uri(uri)
            .header("Host", host_header(uri))
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Sec-WebSocket-Version", "13")
            .header(
                "Sec-WebSocket-Key",
                tokio_tungstenite::tungstenite::handshake::client::generate_key(),
            )
            .body(())
            .map_err(|e| {
                BridgeError::ConnectionClosed(format!("Failed to build request: {}", e))
            })?;

        let tls = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .build()
            .map_err(|e| BridgeError::ConnectionClosed(format!("TLS setup failed: {}", e)))?;

        let (ws, _) = connect_async_tls_with_config(
            request,
            None,
            false,
            Some(tokio_tungstenite::Connector::NativeTls(tls)),
        )
        .await
        .map_err(|e| BridgeError::ConnectionClosed(format!("WebSocket connect failed: {}", e)))?;

        debug!("WebSocket connected to {}", uri);

        let (tx, rx) = mpsc::channel::<Message>(64);
        let pending: Pending = Arc::new(DashMap::new());

        let task_pending = Arc::clone(&pending);
        tokio::spawn(async move {
            connection_task(ws, rx, task_pending).await;
        });

        Ok(Self { tx, pending })
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        let id = Uuid::new_v4().to_string();
        let frame = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.insert(id.clone(), reply_tx);

        if self.tx.send(Message::Text(frame.to_string())).await.is_err() {
            self.pending.remove(&id);
            return Err(BridgeError::ConnectionClosed(
                "Unexpected closure of remote connection".to_string(),
            ));
        }

        match reply_rx.await {
            Ok(result) => result,
            Err(_) => Err(BridgeError::ConnectionClosed(
                "Unexpected closure of remote connection".to_string(),
            )),
        }
    }

    async fn close(&self) {
        let _ = self.tx.send(Message::Close(None)).await;
    }
}

/// Single task owning the socket: writes outbound frames, routes inbound
/// replies, answers server pings and sends keep-alive pings of its own.
async fn connection_task(
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut rx: mpsc::Receiver<Message>,
    pending: Pending,
) {
    let (mut sink, mut stream) = ws.split();
    let mut ping_timer = tokio::time::interval(PING_INTERVAL);
    ping_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut last_pong = Instant::now();

    loop {
        tokio::select! {
            maybe_out = rx.recv() => {
                match maybe_out {
                    Some(msg) => {
                        let closing = matches!(msg, Message::Close(_));
                        if let Err(e) = sink.send(msg).await {
                            debug!("WebSocket send failed: {}", e);
                            break;
                        }
                        if closing {
                            break;
                        }
                    }
                    None => {
                        // All transport handles dropped
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
            maybe_msg = stream.next() => {
                match maybe_msg {
                    Some(Ok(Message::Text(text))) => {
                        dispatch_reply(&pending, &text);
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!("Middleware closed connection: {:?}", frame);
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!("WebSocket error: {}", e);
                        break;
                    }
                    None => {
                        debug!("WebSocket stream ended");
                        break;
                    }
                }
            }
            _ = ping_timer.tick() => {
                if last_pong.elapsed() > PING_INTERVAL * PONG_GRACE {
                    warn!(
                        "No pong from middleware in {:?}, dropping connection",
                        last_pong.elapsed()
                    );
                    break;
                }
                if let Err(e) = sink.send(Message::Ping(Vec::new())).await {
                    debug!("WebSocket ping failed: {}", e);
                    break;
                }
            }
        }
    }

    drain_pending(&pending);
}

/// Route one inbound JSON-RPC frame to the caller waiting on its id
fn dispatch_reply(pending: &Pending, text: &str) {
    let frame: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            warn!("Discarding unparseable middleware frame: {}", e);
            return;
        }
    };

    let id = match frame.get("id").and_then(|id| id.as_str()) {
        Some(id) => id.to_string(),
        None => {
            // Server-initiated notification (collection events etc.)
            let method = frame
                .get("method")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown");
            debug!("Ignoring middleware notification: {}", method);
            return;
        }
    };

    let reply_tx = match pending.remove(&id) {
        Some((_, tx)) => tx,
        None => {
            warn!("Received reply with no pending request (id {})", id);
            return;
        }
    };

    let result = if let Some(error) = frame.get("error") {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| error.to_string());
        Err(BridgeError::Upstream(message))
    } else {
        Ok(frame.get("result").cloned().unwrap_or(Value::Null))
    };

    let _ = reply_tx.send(result);
}

/// Fail every in-flight call once the socket is gone
fn drain_pending(pending: &Pending) {
    let ids: Vec<String> = pending.iter().map(|entry| entry.key().clone()).collect();
    for id in ids {
        if let Some((_, tx)) = pending.remove(&id) {
            let _ = tx.send(Err(BridgeError::ConnectionClosed(
                "Unexpected closure of remote connection".to_string(),
            )));
        }
    }
}

/// Host header value for the upgrade request (host[:port] without scheme or path)
fn host_header(uri: &str) -> String {
    let after_scheme = uri.split("://").nth(1).unwrap_or(uri);
    after_scheme
        .split('/')
        .next()
        .unwrap_or("localhost")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Minimal JSON-RPC responder standing in for the middleware
    async fn spawn_rpc_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                    while let Some(Ok(msg)) = ws.next().await {
                        match msg {
                            Message::Text(text) => {
                                let frame: Value = serde_json::from_str(&text).unwrap();
                                let id = frame["id"].as_str().unwrap();
                                let reply = match frame["method"].as_str().unwrap() {
                                    "core.ping" => json!({
                                        "jsonrpc": "2.0",
                                        "id": id,
                                        "result": "pong",
                                    }),
                                    "echo.params" => json!({
                                        "jsonrpc": "2.0",
                                        "id": id,
                                        "result": frame["params"].clone(),
                                    }),
                                    method => json!({
                                        "jsonrpc": "2.0",
                                        "id": id,
                                        "error": {
                                            "code": -32601,
                                            "message": format!("Method '{}' not found", method),
                                        },
                                    }),
                                };
                                ws.send(Message::Text(reply.to_string())).await.unwrap();
                            }
                            Message::Ping(data) => {
                                ws.send(Message::Pong(data)).await.unwrap();
                            }
                            Message::Close(_) => break,
                            _ => {}
                        }
                    }
                });
            }
        });

        format!("ws://{}", addr)
    }

    #[tokio::test]
    async fn test_call_round_trip() {
        let uri = spawn_rpc_server().await;
        let transport = WsTransport::connect(&uri).await.unwrap();

        let params = vec![json!({"test": "data"})];
        let result = transport.call("echo.params", params.clone()).await.unwrap();

        assert_eq!(result, json!(params));
        transport.close().await;
    }

    #[tokio::test]
    async fn test_ping_returns_pong() {
        let uri = spawn_rpc_server().await;
        let transport = WsTransport::connect(&uri).await.unwrap();

        assert_eq!(transport.ping().await.unwrap(), "pong");
        transport.close().await;
    }

    #[tokio::test]
    async fn test_rpc_error_maps_to_upstream() {
        let uri = spawn_rpc_server().await;
        let transport = WsTransport::connect(&uri).await.unwrap();

        let err = transport.call("no.such.method", Vec::new()).await.unwrap_err();
        match err {
            BridgeError::Upstream(message) => {
                assert_eq!(message, "Method 'no.such.method' not found");
            }
            other => panic!("expected Upstream error, got {:?}", other),
        }
        transport.close().await;
    }

    #[tokio::test]
    async fn test_dropped_server_fails_in_flight_call() {
        // Server accepts the handshake, reads one frame, then drops the socket
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let _ = ws.next().await;
        });

        let transport = WsTransport::connect(&format!("ws://{}", addr)).await.unwrap();
        let err = transport.call("pool.query", Vec::new()).await.unwrap_err();
        assert!(err.is_transient(), "expected connection-closed, got {:?}", err);
    }

    #[tokio::test]
    async fn test_call_after_close_fails() {
        let uri = spawn_rpc_server().await;
        let transport = WsTransport::connect(&uri).await.unwrap();
        transport.close().await;

        // The connection task stops once the close frame is written
        tokio::time::sleep(Duration::from_millis(100)).await;
        let err = transport.call("core.ping", Vec::new()).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn test_host_header() {
        assert_eq!(host_header("wss://truenas.local/api/current"), "truenas.local");
        assert_eq!(host_header("wss://10.0.0.5:8443/api/current"), "10.0.0.5:8443");
        assert_eq!(host_header("ws://127.0.0.1:9000"), "127.0.0.1:9000");
    }
}
