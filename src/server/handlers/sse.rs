// src/server/handlers/sse.rs

//! Accepts `GET /sse` and wraps the streaming response as an `SseConnection`.

use super::{error_response, hub_unavailable};
use crate::connection::{Connection, SseConnection};
use crate::core::message::{Message, random_id};
use crate::server::AppState;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::{SecondsFormat, Utc};
use futures::{Stream, StreamExt};
use serde_json::json;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio_util::io::ReaderStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{error, info, warn};

/// Bytes buffered between the connection's writer and the response body.
const SSE_PIPE_CAPACITY: usize = 64 * 1024;

/// A response body that cancels a token when the HTTP layer drops it,
/// which is how a client disconnect surfaces.
struct DisconnectAware<S> {
    inner: S,
    _client_gone: DropGuard,
}

impl<S: Stream + Unpin> Stream for DisconnectAware<S> {
    type Item = S::Item;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

pub async fn connect(State(app): State<AppState>) -> Response {
    info!("New SSE connection request");

    if !app.hub.is_running() {
        error!("Hub is not running");
        return hub_unavailable();
    }

    let (writer, reader) = tokio::io::duplex(SSE_PIPE_CAPACITY);
    let request = app.shutdown.child_token();
    let client_gone = CancellationToken::new();

    let mut headers = HeaderMap::new();
    let conn = SseConnection::new(
        &request,
        random_id("conn"),
        &mut headers,
        writer,
        app.config.sse.clone(),
    );

    if let Err(e) = app.hub.register_connection(conn.clone()).await {
        error!("Failed to register connection: {}", e);
        let _ = conn.close();
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to register connection",
        );
    }
    info!("SSE connection {} connected and registered", conn.id());

    let connected = Message::new(
        "",
        "connected",
        json!({
            "connection_id": conn.id(),
            "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        }),
    );
    if let Err(e) = conn.send(&request, Arc::new(connected)).await {
        warn!("Failed to send connected event to {}: {}", conn.id(), e);
    }

    spawn_disconnect_wait(conn.clone(), request, client_gone.clone());

    let body = DisconnectAware {
        inner: ReaderStream::new(reader)
            .take_until(conn.context().cancelled_owned())
            .boxed(),
        _client_gone: client_gone.drop_guard(),
    };

    let mut response = Body::from_stream(body).into_response();
    response.headers_mut().extend(headers);
    response
}

/// Holds the request open until the connection is torn down or the client
/// goes away, then cancels the request token. The token is the parent of
/// the connection's own token, so the hub sees the disconnect.
fn spawn_disconnect_wait<W>(
    conn: Arc<SseConnection<W>>,
    request: CancellationToken,
    client_gone: CancellationToken,
) where
    W: tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let connection_gone = conn.context();
        tokio::select! {
            _ = connection_gone.cancelled() => {
                info!("Client connection context canceled {}", conn.id());
            }
            _ = client_gone.cancelled() => {
                info!("Client disconnected {}", conn.id());
            }
        }
        request.cancel();
    });
}
