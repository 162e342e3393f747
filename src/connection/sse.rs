// src/connection/sse.rs

//! A `Connection` over a one-directional `text/event-stream` response.

use super::{Connection, ConnectionState, SSE_CONNECTION_TYPE};
use crate::config::SseConfig;
use crate::core::HubError;
use crate::core::message::{Message, MessageType};
use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderName, HeaderValue, header};
use bytes::Bytes;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, oneshot};
use tokio::time::{Instant, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, error, info, info_span, warn};

/// Response headers required for event-stream semantics.
pub const SSE_HEADERS: [(HeaderName, &str); 6] = [
    (header::CONTENT_TYPE, "text/event-stream"),
    (header::CACHE_CONTROL, "no-cache"),
    (header::CONNECTION, "keep-alive"),
    (HeaderName::from_static("x-accel-buffering"), "no"),
    (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
    (header::ACCESS_CONTROL_ALLOW_HEADERS, "Cache-Control"),
];

pub fn apply_sse_headers(headers: &mut HeaderMap) {
    for (name, value) in SSE_HEADERS {
        headers.insert(name, HeaderValue::from_static(value));
    }
}

/// A Server-Sent Events client.
///
/// `W` is the raw response body writer handed over by the HTTP layer.
pub struct SseConnection<W> {
    id: String,
    writer: Arc<Mutex<W>>,
    token: CancellationToken,
    state: ConnectionState,
    config: SseConfig,
    span: Span,
}

impl<W> SseConnection<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Wraps `writer`, writes the event-stream headers into `headers` and
    /// starts the keep-alive task.
    ///
    /// The connection's token is a child of `parent`, so cancelling the
    /// request tears the connection down.
    pub fn new(
        parent: &CancellationToken,
        id: impl Into<String>,
        headers: &mut HeaderMap,
        writer: W,
        config: SseConfig,
    ) -> Arc<Self> {
        let id = id.into();
        apply_sse_headers(headers);

        let span = info_span!("connection", connection_id = %id, connection_type = SSE_CONNECTION_TYPE);
        let conn = Arc::new(Self {
            id,
            writer: Arc::new(Mutex::new(writer)),
            token: parent.child_token(),
            state: ConnectionState::new(),
            config,
            span,
        });

        let keep_alive = conn.clone();
        tokio::spawn(keep_alive.keep_alive().instrument(conn.span.clone()));
        conn
    }

    async fn send_message(
        &self,
        ctx: &CancellationToken,
        message: Arc<Message>,
    ) -> Result<(), HubError> {
        if self.is_closed() {
            return Err(HubError::ConnectionClosed);
        }

        let frame = format_sse_message(&message)?;

        // The write runs on its own task so a stuck writer can be abandoned.
        let (done_tx, done_rx) = oneshot::channel();
        let writer = self.writer.clone();
        tokio::spawn(async move {
            let mut writer = writer.lock().await;
            let result = async {
                writer.write_all(&frame).await?;
                writer.flush().await
            }
            .await;
            let _ = done_tx.send(result);
        });

        tokio::select! {
            result = done_rx => match result {
                Ok(Ok(())) => {
                    self.state.touch();
                    Ok(())
                }
                Ok(Err(e)) => {
                    error!(parent: &self.span, "Failed to write message: {}", e);
                    let _ = self.close();
                    Err(e.into())
                }
                Err(_) => {
                    let _ = self.close();
                    Err(HubError::Write("writer task dropped".into()))
                }
            },
            _ = ctx.cancelled() => {
                warn!(parent: &self.span, "Send operation cancelled");
                Err(HubError::Cancelled)
            }
            _ = tokio::time::sleep(self.config.send_timeout) => {
                warn!(parent: &self.span, "Send operation timed out");
                let _ = self.close();
                Err(HubError::SendTimeout)
            }
        }
    }

    async fn keep_alive(self: Arc<Self>) {
        let period = self.config.keepalive_interval;
        let mut ticker = interval_at(Instant::now() + period, period);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.is_closed() {
                        return;
                    }

                    if self.state.idle_for() > self.config.inactivity_timeout {
                        info!("Connection inactive for too long, closing connection");
                        let _ = self.close();
                        return;
                    }

                    let background = CancellationToken::new();
                    if let Err(e) = self.send_message(&background, Arc::new(keepalive_message())).await {
                        error!("Failed to send keep-alive: {}", e);
                        let _ = self.close();
                        return;
                    }
                }
                _ = self.token.cancelled() => return,
            }
        }
    }
}

#[async_trait]
impl<W> Connection for SseConnection<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    fn id(&self) -> &str {
        &self.id
    }

    fn connection_type(&self) -> &str {
        SSE_CONNECTION_TYPE
    }

    async fn send(&self, ctx: &CancellationToken, message: Arc<Message>) -> Result<(), HubError> {
        self.send_message(ctx, message).await
    }

    fn close(&self) -> Result<(), HubError> {
        if !self.state.mark_closed() {
            return Ok(());
        }
        self.token.cancel();
        info!(parent: &self.span, "SSE connection closed");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    fn context(&self) -> CancellationToken {
        self.token.clone()
    }
}

fn keepalive_message() -> Message {
    let now = chrono::Utc::now().timestamp();
    Message::new(
        format!("keepalive-{now}"),
        MessageType::KeepAlive.as_str(),
        json!({ "timestamp": now, "message": "connection alive" }),
    )
}

/// Encodes a message as one SSE event.
///
/// `id:` and `event:` lines are emitted only when non-empty. String payloads
/// are written verbatim, anything else as JSON, one `data:` line per
/// payload line, and the event is terminated by a blank line.
pub fn format_sse_message(message: &Message) -> Result<Bytes, HubError> {
    let mut out = String::new();

    if !message.id.is_empty() {
        out.push_str("id: ");
        out.push_str(&message.id);
        out.push('\n');
    }
    if !message.kind.is_empty() {
        out.push_str("event: ");
        out.push_str(&message.kind);
        out.push('\n');
    }

    let data = match &message.data {
        Value::String(s) => s.clone(),
        other => serde_json::to_string(other)?,
    };
    for line in split_lines(&data) {
        out.push_str("data: ");
        out.push_str(line);
        out.push('\n');
    }

    out.push('\n');
    Ok(Bytes::from(out))
}

/// Splits a payload on `\n` and `\r` for `data:` framing.
///
/// An empty input yields a single empty line; a trailing break does not add one.
pub fn split_lines(s: &str) -> Vec<&str> {
    if s.is_empty() {
        return vec![""];
    }

    let mut lines: Vec<&str> = s.split(['\n', '\r']).collect();
    if lines.len() > 1 && lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines
}
