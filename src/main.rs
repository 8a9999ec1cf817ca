//! truenas-bridge - REST bridge to the TrueNAS middleware WebSocket API

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use truenas_bridge::{
    config::Args,
    server::{self, AppState},
    supervisor::Supervisor,
    transport::WsConnector,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    // Parse command line arguments
    let args = Args::parse();

    // Initialize tracing/logging
    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("truenas_bridge={},info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Validate configuration
    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    // Print startup banner
    info!("======================================");
    info!("  truenas-bridge");
    info!("======================================");
    info!("TrueNAS host: {}", args.truenas_host);
    info!("API user: {}", args.truenas_api_user);
    info!("Listen: {}", args.listen);
    info!("======================================");

    // Open and authenticate the middleware connection before taking traffic
    let connector = WsConnector::new(args.ws_uri());
    let supervisor = Arc::new(Supervisor::new(
        Box::new(connector),
        args.truenas_api_user.clone(),
        args.truenas_api_key.clone(),
    ));

    if let Err(e) = supervisor.setup().await {
        error!("Failed to connect to TrueNAS: {}", e);
        std::process::exit(1);
    }

    let (state, mut shutdown_rx) = AppState::new(args, Arc::clone(&supervisor));
    let server_handle = tokio::spawn(server::run(Arc::new(state)));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            supervisor.cleanup().await;
        }
        reason = shutdown_rx.recv() => {
            if let Some(reason) = reason {
                error!("Fatal: {}", reason);
            }
            supervisor.cleanup().await;
            std::process::exit(1);
        }
        result = server_handle => {
            match result {
                Ok(Err(e)) => error!("Server error: {:?}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
            supervisor.cleanup().await;
            std::process::exit(1);
        }
    }

    Ok(())
}
