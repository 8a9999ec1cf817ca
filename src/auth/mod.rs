//! HTTP Basic authentication for the bridge's REST surface
//!
//! The bridge protects `/api/*` with a single configured username/password
//! pair. Credential comparison is constant-time; `/health` stays open.

use base64::{engine::general_purpose, Engine as _};

use crate::config::Args;
use crate::types::{BridgeError, Result};

/// Validate an `Authorization` header against the configured bridge credentials.
///
/// A missing or malformed header and a credential mismatch both map to
/// `Unauthorized`; the messages differ so clients can tell which happened.
pub fn check_basic_auth(args: &Args, header: Option<&str>) -> Result<()> {
    let header = header.ok_or_else(not_authenticated)?;
    let encoded = header.strip_prefix("Basic ").ok_or_else(not_authenticated)?;

    let decoded = general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|_| not_authenticated())?;
    let decoded = String::from_utf8(decoded).map_err(|_| not_authenticated())?;

    let (username, password) = decoded.split_once(':').ok_or_else(not_authenticated)?;

    // Evaluate both comparisons so a bad username costs the same as a bad password
    let user_ok = constant_time_compare(username, &args.bridge_auth_user);
    let pass_ok = constant_time_compare(password, args.bridge_auth_password.expose());

    if user_ok & pass_ok {
        Ok(())
    } else {
        Err(BridgeError::Unauthorized(
            "Incorrect username or password".to_string(),
        ))
    }
}

fn not_authenticated() -> BridgeError {
    BridgeError::Unauthorized("Not authenticated".to_string())
}

/// Constant-time string comparison to prevent timing attacks
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}
