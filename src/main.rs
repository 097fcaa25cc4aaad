//! guestlink - host-side guest agent bridge.
//!
//! Listens for the guest agent's TCP connection and serves the HTTP API
//! until Ctrl-C.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use guestlink::bridge::{self, Bridge};
use guestlink::config::Config;
use guestlink::http;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "guestlink=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    info!("Starting guestlink v{}", env!("CARGO_PKG_VERSION"));

    let bridge = Arc::new(Bridge::from_config(&config));
    info!("Guest UUID: {}", bridge.identity().guest_uuid());
    info!("Cluster UUID: {}", bridge.identity().cluster_uuid());

    let guest_listener = TcpListener::bind(&config.addr)
        .await
        .with_context(|| format!("Failed to listen on {}", config.addr))?;
    let api_listener = TcpListener::bind(&config.api)
        .await
        .with_context(|| format!("Failed to bind HTTP API on {}", config.api))?;
    info!("HTTP API listening on {}", config.api);

    let api_bridge = Arc::clone(&bridge);
    let api = tokio::spawn(async move {
        let shutdown_bridge = Arc::clone(&api_bridge);
        axum::serve(api_listener, http::router(api_bridge))
            .with_graceful_shutdown(async move { shutdown_bridge.shutdown_requested().await })
            .await
    });

    let signal_bridge = Arc::clone(&bridge);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown requested");
                signal_bridge.shutdown();
            }
            Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    bridge::serve(Arc::clone(&bridge), guest_listener).await;

    api.await
        .context("HTTP API task panicked")?
        .context("HTTP API server failed")?;

    info!("guestlink stopped");
    Ok(())
}
