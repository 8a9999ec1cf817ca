//! Transport layer for the middleware connection
//!
//! [`Transport`] is one established wire to the TrueNAS middleware;
//! [`Connector`] knows how to open a fresh one. The connection supervisor
//! only speaks through these traits, so tests can substitute scripted
//! implementations for the real WebSocket client.

use async_trait::async_trait;
use serde_json::Value;

use crate::types::Result;

pub mod ws;

#[cfg(test)]
pub mod mock;

pub use ws::{WsConnector, WsTransport};

/// One established bidirectional connection to the middleware
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue a single method call and wait for its correlated reply
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value>;

    /// Lightweight liveness round-trip, returning the middleware's reply token
    async fn ping(&self) -> Result<String> {
        let reply = self.call("core.ping", Vec::new()).await?;
        Ok(reply.as_str().unwrap_or_default().to_string())
    }

    /// Close the connection; safe to call more than once
    async fn close(&self);
}

/// Opens fresh [`Transport`] connections to the configured endpoint
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Transport>>;
}
