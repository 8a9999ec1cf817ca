//! Scripted transport used across the crate's tests.
//!
//! A [`MockTransport`] replays a fixed sequence of call outcomes, in the
//! order the calls arrive; a [`MockConnector`] hands out pre-built
//! transports one per connect. Tests keep clones to inspect what happened.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{Connector, Transport};
use crate::types::{BridgeError, Result};

/// Reply sent on a successful `auth.login_ex` handshake
pub fn auth_success() -> Result<Value> {
    Ok(json!({"response_type": "SUCCESS"}))
}

/// Reply sent on a rejected `auth.login_ex` handshake
pub fn auth_failure() -> Result<Value> {
    Ok(json!({"response_type": "AUTH_ERR"}))
}

/// A connection-closed outcome, the class the supervisor retries
pub fn closed() -> Result<Value> {
    Err(BridgeError::ConnectionClosed(
        "Unexpected closure of remote connection".to_string(),
    ))
}

#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    script: Mutex<VecDeque<Result<Value>>>,
    calls: Mutex<Vec<(String, Vec<Value>)>>,
    closed: AtomicBool,
}

impl MockTransport {
    pub fn new(script: Vec<Result<Value>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                script: Mutex::new(script.into()),
                calls: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Every call issued so far, in order
    pub fn calls(&self) -> Vec<(String, Vec<Value>)> {
        self.inner.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.inner.calls.lock().unwrap().len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        self.inner
            .calls
            .lock()
            .unwrap()
            .push((method.to_string(), params));

        match self.inner.script.lock().unwrap().pop_front() {
            Some(outcome) => outcome,
            None => panic!("MockTransport script exhausted (call to {})", method),
        }
    }

    async fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
    }
}

/// Hands out scripted transports, one per `connect`. Clones share the
/// transport queue and the connect counter.
#[derive(Clone)]
pub struct MockConnector {
    inner: Arc<ConnectorInner>,
    connect_delay: Option<Duration>,
}

struct ConnectorInner {
    transports: Mutex<VecDeque<Result<MockTransport>>>,
    connects: AtomicUsize,
}

impl MockConnector {
    pub fn new(transports: Vec<Result<MockTransport>>) -> Self {
        Self {
            inner: Arc::new(ConnectorInner {
                transports: Mutex::new(transports.into()),
                connects: AtomicUsize::new(0),
            }),
            connect_delay: None,
        }
    }

    /// Connector whose single transport authenticates and then replays `script`
    pub fn single(script: Vec<Result<Value>>) -> (Self, MockTransport) {
        let mut full_script = vec![auth_success()];
        full_script.extend(script);
        let transport = MockTransport::new(full_script);
        let connector = Self::new(vec![Ok(transport.clone())]);
        (connector, transport)
    }

    /// Stall every `connect` by `delay`, holding callers mid-reconnect
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = Some(delay);
        self
    }

    pub fn connect_count(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>> {
        self.inner.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.connect_delay {
            tokio::time::sleep(delay).await;
        }
        match self.inner.transports.lock().unwrap().pop_front() {
            Some(Ok(transport)) => Ok(Box::new(transport)),
            Some(Err(e)) => Err(e),
            None => Err(BridgeError::ConnectionClosed(
                "No scripted transport left".to_string(),
            )),
        }
    }
}
