//! Configuration for the bridge
//!
//! CLI arguments and environment variable handling using clap.
//! Secrets are wrapped so they never appear in logs or debug output.

use clap::Parser;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use zeroize::Zeroize;

/// truenas-bridge - REST bridge to the TrueNAS middleware WebSocket API
#[derive(Parser, Debug, Clone)]
#[command(name = "truenas-bridge")]
#[command(about = "REST bridge to the TrueNAS middleware WebSocket API")]
pub struct Args {
    /// TrueNAS host to connect to (bare host[:port], no scheme)
    #[arg(long, env = "TRUENAS_HOST")]
    pub truenas_host: String,

    /// TrueNAS API username the key belongs to
    #[arg(long, env = "TRUENAS_API_USER")]
    pub truenas_api_user: String,

    /// TrueNAS API key (never logged)
    #[arg(long, env = "TRUENAS_API_KEY")]
    pub truenas_api_key: Secret,

    /// Username required by the bridge's own Basic auth
    #[arg(long, env = "BRIDGE_AUTH_USER")]
    pub bridge_auth_user: String,

    /// Password required by the bridge's own Basic auth (never logged)
    #[arg(long, env = "BRIDGE_AUTH_PASSWORD")]
    pub bridge_auth_password: Secret,

    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8000")]
    pub listen: SocketAddr,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Args {
    /// Derive the middleware WebSocket URL from the configured host
    pub fn ws_uri(&self) -> String {
        format!("wss://{}/api/current", self.truenas_host)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.truenas_host.is_empty() {
            return Err("TRUENAS_HOST must not be empty".to_string());
        }
        if self.truenas_host.contains("://") || self.truenas_host.contains('/') {
            return Err("TRUENAS_HOST must be a bare host[:port], not a URL".to_string());
        }
        if self.truenas_api_user.is_empty() {
            return Err("TRUENAS_API_USER must not be empty".to_string());
        }
        if self.truenas_api_key.expose().is_empty() {
            return Err("TRUENAS_API_KEY must not be empty".to_string());
        }
        if self.bridge_auth_user.is_empty() {
            return Err("BRIDGE_AUTH_USER must not be empty".to_string());
        }
        if self.bridge_auth_password.expose().is_empty() {
            return Err("BRIDGE_AUTH_PASSWORD must not be empty".to_string());
        }

        Ok(())
    }
}

/// A configuration value that must never be rendered in logs.
///
/// `Debug` and `Display` print a redaction marker; the underlying string is
/// only reachable through [`Secret::expose`] and is zeroized on drop.
#[derive(Clone)]
pub struct Secret(String);

impl Secret {
    /// Access the underlying secret value
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl FromStr for Secret {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

impl From<&str> for Secret {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[redacted]")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[redacted]")
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}
