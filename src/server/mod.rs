// src/server/mod.rs

use crate::config::Config;
use anyhow::Result;

mod context;
pub mod handlers;
mod initialization;
mod lifecycle;
mod routes;

pub use context::AppState;
pub use routes::router;

/// The main server startup function, orchestrating all setup phases.
pub async fn run(config: Config) -> Result<()> {
    // 1. Start the hub, install signal handlers and bind the listener.
    let server_context = initialization::setup(config).await?;

    // 2. Serve until a signal arrives, then stop the hub and drain HTTP.
    lifecycle::run(server_context).await
}
