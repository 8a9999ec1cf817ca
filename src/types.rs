//! Error types for the bridge

use hyper::StatusCode;

/// Main error type for bridge operations
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("TrueNAS authentication failed: {0}")]
    Auth(String),

    #[error("TrueNAS client not initialized")]
    NotConnected,

    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    #[error("Connection retries exhausted after {attempts} attempts")]
    RetryExhausted { attempts: u32 },

    #[error("{0}")]
    Upstream(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::NotConnected => StatusCode::SERVICE_UNAVAILABLE,
            Self::ConnectionClosed(_) => StatusCode::BAD_GATEWAY,
            Self::RetryExhausted { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether a failed middleware call should be retried after a reconnect.
    ///
    /// Only the connection-closed class is transient; everything else is
    /// surfaced to the caller as-is.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ConnectionClosed(_))
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

/// A body that fails to parse is the caller's fault, and the detail says so.
impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        Self::BadRequest(format!("Invalid JSON body: {}", err))
    }
}

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;
