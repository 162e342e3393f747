// src/server/initialization.rs

//! Handles server initialization: starting the hub, installing signal
//! handlers and binding the listener.

use super::context::{AppState, ServerContext};
use crate::config::Config;
use crate::core::Hub;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Initializes all server components before starting the main loop.
pub async fn setup(config: Config) -> Result<ServerContext> {
    log_startup_info(&config);
    let shutdown = CancellationToken::new();

    let hub = Hub::new(config.hub.clone());
    hub.start(&shutdown).context("Failed to start hub")?;
    info!(
        "Hub started before router initialization, running status: {}",
        hub.is_running()
    );

    let sigint = signal(SignalKind::interrupt()).context("Failed to register SIGINT handler")?;
    let sigterm = signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;

    let listener = TcpListener::bind((config.host.as_str(), config.port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", config.host, config.port))?;
    info!("SpinelHub listening on {}:{}", config.host, config.port);

    Ok(ServerContext {
        state: AppState {
            hub,
            config: Arc::new(config),
            shutdown,
        },
        listener,
        sigint,
        sigterm,
    })
}

/// Logs key configuration parameters at startup.
fn log_startup_info(config: &Config) {
    let hub = &config.hub;
    info!(
        "Hub channels: register={}, unregister={}, broadcast={}; enqueue timeout {:?}, fan-out send timeout {:?}, cleanup every {:?}.",
        hub.register_capacity,
        hub.unregister_capacity,
        hub.broadcast_capacity,
        hub.enqueue_timeout,
        hub.fanout_send_timeout,
        hub.cleanup_interval
    );
    info!(
        "SSE keep-alive every {:?}, inactivity limit {:?}. WebSocket ping every {:?}, pong timeout {:?}.",
        config.sse.keepalive_interval,
        config.sse.inactivity_timeout,
        config.websocket.ping_interval,
        config.websocket.pong_timeout
    );
}
