// src/server/lifecycle.rs

//! Serves HTTP until a termination signal arrives, then shuts down in order:
//! the hub first, then the HTTP server within a bounded deadline.

use super::context::ServerContext;
use super::routes::router;
use anyhow::{Context, Result};
use std::future::IntoFuture;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub async fn run(ctx: ServerContext) -> Result<()> {
    let ServerContext {
        state,
        listener,
        mut sigint,
        mut sigterm,
    } = ctx;

    let app = router(state.clone());
    let draining = CancellationToken::new();

    let shutdown_signal = {
        let state = state.clone();
        let draining = draining.clone();
        async move {
            tokio::select! {
                _ = sigint.recv() => info!("SIGINT received, initiating graceful shutdown."),
                _ = sigterm.recv() => info!("SIGTERM received, initiating graceful shutdown."),
            }

            // Stopping the hub closes every connection, which ends the open
            // SSE bodies and WebSocket sessions the HTTP server waits on.
            if let Err(e) = state.hub.stop().await {
                error!("Failed to stop hub: {}", e);
            }
            state.shutdown.cancel();
            draining.cancel();
        }
    };

    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal);
    let deadline = state.config.shutdown_timeout;

    tokio::select! {
        result = server.into_future() => result.context("HTTP server error")?,
        _ = async {
            draining.cancelled().await;
            tokio::time::sleep(deadline).await;
        } => warn!("Timed out waiting for HTTP connections to drain."),
    }

    info!("Server shutdown complete.");
    Ok(())
}
