// src/server/handlers/websocket.rs

//! Accepts `GET /ws` and wraps the upgraded socket as a `WebSocketConnection`.

use super::hub_unavailable;
use crate::connection::{Connection, WebSocketConnection};
use crate::core::message::random_id;
use crate::server::AppState;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::response::Response;
use tracing::{error, info};

pub async fn connect(State(app): State<AppState>, upgrade: WebSocketUpgrade) -> Response {
    info!("New WebSocket connection request");

    if !app.hub.is_running() {
        error!("Hub is not running");
        return hub_unavailable();
    }

    upgrade.on_upgrade(move |socket| async move {
        let conn = WebSocketConnection::new(
            &app.shutdown,
            random_id("ws"),
            socket,
            app.config.websocket.clone(),
        );

        if let Err(e) = app.hub.register_connection(conn.clone()).await {
            error!("Failed to register WebSocket connection: {}", e);
            let _ = conn.close();
            return;
        }
        info!("WebSocket connection {} connected and registered", conn.id());

        conn.context().cancelled().await;
        info!("WebSocket connection {} disconnected", conn.id());
    })
}
