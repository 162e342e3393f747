// src/server/routes.rs

use super::context::AppState;
use super::handlers::{api, chat, sse, websocket};
use axum::Router;
use axum::http::{Method, header};
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Builds the full route table.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    Router::new()
        .route("/debug", get(api::debug))
        .route("/hub/status", get(api::hub_status))
        .route("/api/messages", post(chat::send_message))
        // Server-Sent Events
        .route("/sse", get(sse::connect))
        .route("/api/v1/sse/connections", get(api::list_connections))
        .route("/api/v1/sse/broadcast", post(api::broadcast))
        .route("/api/v1/sse/send/{client_id}", post(api::send_to_client))
        // WebSocket
        .route("/ws", get(websocket::connect))
        .route("/api/v1/ws/connections", get(api::list_websocket_connections))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
