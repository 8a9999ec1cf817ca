//! Connection supervisor
//!
//! Owns the single middleware connection: opens and authenticates it, runs
//! method calls with bounded reconnect-and-retry, and answers liveness
//! checks. All connection state lives behind one `RwLock`; `setup`,
//! `cleanup` and `reset` take the write half, so concurrent dispatches
//! queue behind a reconnect instead of racing a dying connection.

use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::config::Secret;
use crate::transport::{Connector, Transport};
use crate::types::{BridgeError, Result};

/// Bounded exponential backoff between reconnect attempts
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts before a dispatch gives up
    pub max_attempts: u32,
    /// Shortest wait between attempts
    pub floor: Duration,
    /// Longest wait between attempts
    pub ceiling: Duration,
    /// Scales the exponential term
    pub multiplier: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            floor: Duration::from_secs(4),
            ceiling: Duration::from_secs(10),
            multiplier: 1,
        }
    }
}

impl RetryPolicy {
    /// Wait after the given failed attempt (1-based)
    fn delay(&self, attempt: u32) -> Duration {
        let exp = 2u64.saturating_pow(attempt.saturating_sub(1));
        let base = Duration::from_secs(self.multiplier.saturating_mul(exp));
        base.clamp(self.floor, self.ceiling)
    }
}

/// Owns the middleware connection and its lifecycle
pub struct Supervisor {
    connector: Box<dyn Connector>,
    username: String,
    api_key: Secret,
    policy: RetryPolicy,
    handle: RwLock<Option<Box<dyn Transport>>>,
}

impl Supervisor {
    pub fn new(
        connector: Box<dyn Connector>,
        username: impl Into<String>,
        api_key: Secret,
    ) -> Self {
        Self::with_policy(connector, username, api_key, RetryPolicy::default())
    }

    pub fn with_policy(
        connector: Box<dyn Connector>,
        username: impl Into<String>,
        api_key: Secret,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            connector,
            username: username.into(),
            api_key,
            policy,
            handle: RwLock::new(None),
        }
    }

    /// Open and authenticate the connection. No-op when already connected.
    pub async fn setup(&self) -> Result<()> {
        let mut handle = self.handle.write().await;
        self.setup_locked(&mut handle).await
    }

    async fn setup_locked(&self, handle: &mut Option<Box<dyn Transport>>) -> Result<()> {
        if handle.is_some() {
            return Ok(());
        }

        let transport = self.connector.connect().await?;

        info!("Authenticating with TrueNAS as {}", self.username);
        let reply = match transport
            .call(
                "auth.login_ex",
                vec![json!({
                    "mechanism": "API_KEY_PLAIN",
                    "username": self.username,
                    "api_key": self.api_key.expose(),
                })],
            )
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                transport.close().await;
                error!("Authentication handshake failed: {}", e);
                return Err(e);
            }
        };

        let response_type = reply
            .get("response_type")
            .and_then(|t| t.as_str())
            .unwrap_or("UNKNOWN");

        if response_type == "SUCCESS" {
            info!("TrueNAS client initialized and authenticated");
            *handle = Some(transport);
            Ok(())
        } else {
            transport.close().await;
            error!("Authentication failed: {}", response_type);
            Err(BridgeError::Auth(response_type.to_string()))
        }
    }

    /// Close and clear the connection. Safe to call when already clear.
    pub async fn cleanup(&self) {
        let mut handle = self.handle.write().await;
        if let Some(transport) = handle.take() {
            transport.close().await;
            info!("TrueNAS connection closed");
        }
    }

    /// Drop the current connection and establish a fresh one.
    ///
    /// Holds the handle's write lock across the whole cycle, so concurrent
    /// dispatches block on the read lock until the reconnect resolves.
    pub async fn reset(&self) -> Result<()> {
        let mut handle = self.handle.write().await;
        if let Some(transport) = handle.take() {
            transport.close().await;
        }
        self.setup_locked(&mut handle).await
    }

    /// Execute one middleware call with bounded reconnect-and-retry.
    ///
    /// Retry state is local to this invocation: every attempt after the
    /// first starts by reconnecting in place of the connection that died
    /// under the previous one; any non-transient failure surfaces
    /// immediately.
    pub async fn dispatch(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        for attempt in 1..=self.policy.max_attempts {
            // Only transient failures reach a second attempt, so every
            // attempt past the first owes a reconnect.
            if attempt > 1 {
                match self.reset().await {
                    Ok(()) => {}
                    Err(e) if e.is_transient() => {
                        warn!(method = %method, attempt, error = %e, "Reconnect failed");
                        if attempt == self.policy.max_attempts {
                            break;
                        }
                        tokio::time::sleep(self.policy.delay(attempt)).await;
                        continue;
                    }
                    Err(e) => return Err(e),
                }
            }

            let handle = self.handle.read().await;
            let transport = match handle.as_ref() {
                Some(transport) => transport,
                None => return Err(BridgeError::NotConnected),
            };

            match transport.call(method, params.clone()).await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_transient() => {
                    drop(handle);
                    warn!(method = %method, attempt, error = %e, "Connection lost, will reconnect");
                    if attempt == self.policy.max_attempts {
                        break;
                    }
                    tokio::time::sleep(self.policy.delay(attempt)).await;
                }
                Err(e) => {
                    error!(method = %method, error = %e, "Request failed");
                    return Err(e);
                }
            }
        }

        error!(
            method = %method,
            attempts = self.policy.max_attempts,
            "Connection retries exhausted"
        );
        Err(BridgeError::RetryExhausted {
            attempts: self.policy.max_attempts,
        })
    }

    /// Best-effort liveness check; never raises.
    pub async fn is_connected(&self) -> bool {
        let handle = self.handle.read().await;
        match handle.as_ref() {
            Some(transport) => matches!(transport.ping().await.as_deref(), Ok("pong")),
            None => false,
        }
    }
}
