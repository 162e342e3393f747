// src/server/handlers/api.rs

//! Status, inspection and broadcast endpoints.

use super::error_response;
use crate::connection::WEBSOCKET_CONNECTION_TYPE;
use crate::core::message::{Message, random_id};
use crate::core::{HubError, SharedConnection};
use crate::server::AppState;
use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{error, info};

/// Body accepted by the broadcast and send endpoints.
#[derive(Deserialize, Debug)]
pub struct MessageRequest {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

impl MessageRequest {
    fn into_message(self) -> Message {
        Message::new(random_id("msg"), self.kind, self.data)
    }
}

#[derive(Serialize, Debug)]
pub struct ConnectionInfo {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub closed: bool,
}

#[derive(Serialize, Debug)]
pub struct ConnectionsResponse {
    pub total_connections: usize,
    pub connections: Vec<ConnectionInfo>,
    pub hub_running: bool,
}

fn describe(connections: Vec<SharedConnection>, hub_running: bool) -> ConnectionsResponse {
    let connections: Vec<ConnectionInfo> = connections
        .iter()
        .map(|conn| ConnectionInfo {
            id: conn.id().to_string(),
            kind: conn.connection_type().to_string(),
            closed: conn.is_closed(),
        })
        .collect();
    ConnectionsResponse {
        total_connections: connections.len(),
        connections,
        hub_running,
    }
}

pub async fn debug() -> Json<Value> {
    info!("Debug endpoint hit!");
    Json(json!({ "debug": "working" }))
}

pub async fn hub_status(State(app): State<AppState>) -> Json<Value> {
    let running = app.hub.is_running();
    let connections = app.hub.connection_count();
    info!(
        "Hub status check - Running: {}, Connections: {}",
        running, connections
    );
    Json(json!({
        "status": "healthy",
        "hub_running": running,
        "connections": connections,
    }))
}

pub async fn list_connections(State(app): State<AppState>) -> Json<ConnectionsResponse> {
    Json(describe(app.hub.get_connections(), app.hub.is_running()))
}

pub async fn list_websocket_connections(
    State(app): State<AppState>,
) -> Json<ConnectionsResponse> {
    Json(describe(
        app.hub.get_connections_by_type(WEBSOCKET_CONNECTION_TYPE),
        app.hub.is_running(),
    ))
}

pub async fn broadcast(
    State(app): State<AppState>,
    payload: Result<Json<MessageRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(request)) = payload else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid message format");
    };
    let message = request.into_message();
    let message_id = message.id.clone();

    let ctx = app.shutdown.child_token();
    if let Err(e) = app.hub.broadcast(&ctx, message).await {
        error!("Failed to broadcast message: {}", e);
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to broadcast message",
        );
    }

    Json(json!({
        "status": "broadcasted",
        "message_id": message_id,
        "connections": app.hub.connection_count(),
    }))
    .into_response()
}

pub async fn send_to_client(
    State(app): State<AppState>,
    Path(client_id): Path<String>,
    payload: Result<Json<MessageRequest>, JsonRejection>,
) -> Response {
    if client_id.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Client ID is required");
    }
    let Ok(Json(request)) = payload else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid message format");
    };
    let message = request.into_message();
    let message_id = message.id.clone();

    let ctx = app.shutdown.child_token();
    match app.hub.send_to_connection(&ctx, &client_id, message).await {
        Ok(()) => Json(json!({
            "status": "sent",
            "client_id": client_id,
            "message_id": message_id,
        }))
        .into_response(),
        Err(HubError::NotFound(_)) => {
            error!("Failed to send message to client {}: not found", client_id);
            error_response(StatusCode::NOT_FOUND, "Client not found")
        }
        Err(e) => {
            error!("Failed to send message to client {}: {}", client_id, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to send message")
        }
    }
}
