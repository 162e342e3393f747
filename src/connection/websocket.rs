// src/connection/websocket.rs

//! A `Connection` over a full-duplex WebSocket.
//!
//! All outbound frames go through a bounded queue drained by the write pump;
//! the read pump handles inbound frames and liveness. Either pump ending
//! closes the connection.

use super::{Connection, ConnectionState, WEBSOCKET_CONNECTION_TYPE};
use crate::config::WebSocketConfig;
use crate::core::HubError;
use crate::core::message::Message;
use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message as WsMessage, close_code};
use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use parking_lot::Mutex;
use serde_json::json;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, interval_at, timeout, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, error, info, info_span, warn};

/// Close codes a peer may legitimately end the session with.
const EXPECTED_CLOSE_CODES: [u16; 3] = [close_code::NORMAL, close_code::AWAY, close_code::ABNORMAL];

/// Bound on enqueueing an echo reply from the read pump.
const ECHO_SEND_TIMEOUT: Duration = Duration::from_secs(5);

pub struct WebSocketConnection {
    id: String,
    token: CancellationToken,
    state: ConnectionState,
    /// Taken (and thereby closed) by `close`.
    outbound: Mutex<Option<mpsc::Sender<Arc<Message>>>>,
    config: WebSocketConfig,
    span: Span,
}

impl WebSocketConnection {
    /// Wraps an upgraded socket and starts its read and write pumps.
    ///
    /// `socket` is any duplex frame stream, typically `axum::extract::ws::WebSocket`.
    pub fn new<S, E>(
        parent: &CancellationToken,
        id: impl Into<String>,
        socket: S,
        config: WebSocketConfig,
    ) -> Arc<Self>
    where
        S: Stream<Item = Result<WsMessage, E>> + Sink<WsMessage, Error = E> + Send + 'static,
        E: Display + Send + 'static,
    {
        let id = id.into();
        let (tx, rx) = mpsc::channel(config.outbound_capacity);
        let span =
            info_span!("connection", connection_id = %id, connection_type = WEBSOCKET_CONNECTION_TYPE);

        let conn = Arc::new(Self {
            id,
            token: parent.child_token(),
            state: ConnectionState::new(),
            outbound: Mutex::new(Some(tx)),
            config,
            span,
        });

        let (sink, stream) = socket.split();
        tokio::spawn(conn.clone().write_pump(sink, rx).instrument(conn.span.clone()));
        tokio::spawn(conn.clone().read_pump(stream).instrument(conn.span.clone()));
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
        let Some(tx) = self.outbound.lock().clone() else {
            return Err(HubError::ConnectionClosed);
        };

        tokio::select! {
            result = tx.send(message) => result.map_err(|_| HubError::ConnectionClosed),
            _ = ctx.cancelled() => Err(HubError::Cancelled),
            _ = self.token.cancelled() => Err(HubError::ConnectionClosed),
            _ = tokio::time::sleep(self.config.enqueue_timeout) => Err(HubError::SendTimeout),
        }
    }

    async fn write_pump<K>(self: Arc<Self>, mut sink: K, mut rx: mpsc::Receiver<Arc<Message>>)
    where
        K: Sink<WsMessage> + Unpin,
        K::Error: Display,
    {
        let write_timeout = self.config.write_timeout;
        let period = self.config.ping_interval;
        let mut ping = interval_at(Instant::now() + period, period);

        let send_close_frame = loop {
            tokio::select! {
                maybe_message = rx.recv() => {
                    let Some(message) = maybe_message else {
                        break true;
                    };
                    let text = match serde_json::to_string(&*message) {
                        Ok(text) => text,
                        Err(e) => {
                            error!("Failed to encode message {}: {}", message.id, e);
                            break false;
                        }
                    };
                    match timeout(write_timeout, sink.send(WsMessage::Text(text.into()))).await {
                        Ok(Ok(())) => self.state.touch(),
                        Ok(Err(e)) => {
                            error!("Failed to write message: {}", e);
                            break false;
                        }
                        Err(_) => {
                            error!("Write deadline exceeded");
                            break false;
                        }
                    }
                }
                _ = ping.tick() => {
                    match timeout(write_timeout, sink.send(WsMessage::Ping(Bytes::new()))).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            error!("Failed to send ping: {}", e);
                            break false;
                        }
                        Err(_) => {
                            error!("Ping write deadline exceeded");
                            break false;
                        }
                    }
                }
                _ = self.token.cancelled() => break true,
            }
        };

        if send_close_frame {
            let frame = WsMessage::Close(Some(CloseFrame {
                code: close_code::NORMAL,
                reason: "".into(),
            }));
            match timeout(write_timeout, sink.send(frame)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!("Failed to write close frame: {}", e),
                Err(_) => debug!("Close frame write timed out"),
            }
        }
        let _ = timeout(write_timeout, sink.close()).await;
        let _ = self.close();
    }

    async fn read_pump<R, E>(self: Arc<Self>, mut stream: R)
    where
        R: Stream<Item = Result<WsMessage, E>> + Unpin,
        E: Display,
    {
        let pong_timeout = self.config.pong_timeout;
        let mut read_deadline = Instant::now() + pong_timeout;

        loop {
            let next = tokio::select! {
                _ = self.token.cancelled() => break,
                next = timeout_at(read_deadline, stream.next()) => next,
            };

            let frame = match next {
                Err(_) => {
                    warn!("No pong received within {:?}, closing", pong_timeout);
                    break;
                }
                Ok(None) => break,
                Ok(Some(Err(e))) => {
                    debug!("WebSocket read error: {}", e);
                    break;
                }
                Ok(Some(Ok(frame))) => frame,
            };

            self.state.touch();

            match frame {
                WsMessage::Text(text) => {
                    debug!("Received text message: {}", text.as_str());
                    if self.config.echo_text_frames {
                        self.echo(text.as_str()).await;
                    }
                }
                WsMessage::Binary(data) => {
                    debug!("Received binary message of length: {}", data.len());
                }
                WsMessage::Pong(_) => {
                    read_deadline = Instant::now() + pong_timeout;
                }
                WsMessage::Ping(_) => {}
                WsMessage::Close(frame) => {
                    match frame.map(|f| f.code) {
                        Some(code) if !EXPECTED_CLOSE_CODES.contains(&code) => {
                            error!("WebSocket closed with unexpected code {}", code);
                        }
                        _ => info!("Received close message from client"),
                    }
                    break;
                }
            }
        }

        let _ = self.close();
    }

    async fn echo(&self, original: &str) {
        let now = chrono::Utc::now().timestamp();
        let response = Message::new(
            format!("echo-{now}"),
            "echo",
            json!({ "original": original, "timestamp": now }),
        );

        let ctx = CancellationToken::new();
        let result = timeout(ECHO_SEND_TIMEOUT, self.send_message(&ctx, Arc::new(response))).await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Failed to send echo response: {}", e),
            Err(_) => error!("Failed to send echo response: {}", HubError::SendTimeout),
        }
    }
}

#[async_trait]
impl Connection for WebSocketConnection {
    fn id(&self) -> &str {
        &self.id
    }

    fn connection_type(&self) -> &str {
        WEBSOCKET_CONNECTION_TYPE
    }

    async fn send(&self, ctx: &CancellationToken, message: Arc<Message>) -> Result<(), HubError> {
        self.send_message(ctx, message).await
    }

    fn close(&self) -> Result<(), HubError> {
        if !self.state.mark_closed() {
            return Ok(());
        }
        self.token.cancel();
        // Dropping the sender closes the outbound queue; the write pump then
        // sends the close frame under its own deadline and closes the socket.
        self.outbound.lock().take();
        info!(parent: &self.span, "WebSocket connection closed");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    fn context(&self) -> CancellationToken {
        self.token.clone()
    }
}
