// src/server/context.rs

use crate::config::Config;
use crate::core::Hub;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal::unix::Signal;
use tokio_util::sync::CancellationToken;

/// Holds all the initialized state required to run the server's main loop.
pub struct ServerContext {
    pub state: AppState,
    pub listener: TcpListener,
    pub sigint: Signal,
    pub sigterm: Signal,
}

/// Shared state handed to every HTTP handler.
#[derive(Clone)]
pub struct AppState {
    pub hub: Hub,
    pub config: Arc<Config>,
    /// Root of every hub, request and connection token; cancelled on shutdown.
    pub shutdown: CancellationToken,
}
