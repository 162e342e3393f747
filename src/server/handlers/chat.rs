// src/server/handlers/chat.rs

//! The chat endpoint: validates a chat post and broadcasts it to every client.

use super::error_response;
use crate::core::message::{Message, generate_message_id};
use crate::server::AppState;
use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info};

/// Message type of broadcast chat posts.
pub const CHAT_MESSAGE_TYPE: &str = "chat_message";

#[derive(Deserialize, Debug)]
pub struct ChatMessageRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[derive(Serialize, Debug)]
pub struct ChatMessage {
    pub id: String,
    pub username: String,
    pub message: String,
    pub timestamp: String,
}

/// Parses an RFC 3339 timestamp, falling back to now when absent or malformed.
pub fn resolve_timestamp(raw: Option<&str>) -> DateTime<Utc> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}

pub async fn send_message(
    State(app): State<AppState>,
    payload: Result<Json<ChatMessageRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) if !request.username.is_empty() && !request.message.is_empty() => {
            request
        }
        Ok(_) => {
            error!("Invalid request format: username and message are required");
            return error_response(StatusCode::BAD_REQUEST, "Invalid message format");
        }
        Err(e) => {
            error!("Invalid request format: {}", e);
            return error_response(StatusCode::BAD_REQUEST, "Invalid message format");
        }
    };

    let timestamp = resolve_timestamp(request.timestamp.as_deref());
    let message_id = generate_message_id();
    let chat = ChatMessage {
        id: message_id.clone(),
        username: request.username,
        message: request.message,
        timestamp: timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
    };

    let message = match Message::builder()
        .with_id(message_id.clone())
        .with_type(CHAT_MESSAGE_TYPE)
        .try_data(&chat)
    {
        Ok(builder) => builder.build(),
        Err(e) => {
            error!("Failed to encode chat message: {}", e);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to send message");
        }
    };

    let ctx = app.shutdown.child_token();
    if let Err(e) = app.hub.broadcast(&ctx, message).await {
        error!("Failed to broadcast message: {}", e);
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to send message");
    }

    let connections = app.hub.connection_count();
    info!(
        "Chat message sent by {} to {} connections",
        chat.username, connections
    );

    Json(json!({
        "status": "sent",
        "message_id": message_id,
        "connections": connections,
    }))
    .into_response()
}
