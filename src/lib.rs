//! truenas-bridge - REST bridge to the TrueNAS middleware WebSocket API
//!
//! The bridge holds one authenticated WebSocket session open to the TrueNAS
//! middleware and translates plain HTTP requests onto it.
//!
//! ## Pieces
//!
//! - **Supervisor**: owns the connection lifecycle, reconnects with bounded
//!   retries and serializes reconnect attempts across requests
//! - **Transport**: JSON-RPC 2.0 over WebSocket with request correlation
//! - **Server**: hyper HTTP facade with Basic auth and a health endpoint

pub mod auth;
pub mod config;
pub mod routes;
pub mod server;
pub mod supervisor;
pub mod transport;
pub mod types;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{BridgeError, Result};
