//! HTTP server for the bridge

pub mod http;

pub use http::{run, serve, AppState};
