// src/server/handlers/mod.rs

//! HTTP handlers: the transport adapters that wrap incoming requests as hub
//! connections, and the REST endpoints that feed the hub.

pub mod api;
pub mod chat;
pub mod sse;
pub mod websocket;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// A JSON `{"error": ...}` response.
pub(crate) fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

pub(crate) fn hub_unavailable() -> Response {
    error_response(
        StatusCode::SERVICE_UNAVAILABLE,
        "Service temporarily unavailable",
    )
}
