// src/connection/mod.rs

//! The `Connection` capability shared by every transport the hub can fan out to,
//! plus the two concrete transports: Server-Sent Events and WebSocket.

mod sse;
mod websocket;

pub use sse::{SSE_HEADERS, SseConnection, apply_sse_headers, format_sse_message, split_lines};
pub use websocket::WebSocketConnection;

use crate::core::HubError;
use crate::core::message::Message;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Transport discriminator reported by `SseConnection`.
pub const SSE_CONNECTION_TYPE: &str = "sse";
/// Transport discriminator reported by `WebSocketConnection`.
pub const WEBSOCKET_CONNECTION_TYPE: &str = "websocket";

/// A handle to one connected client over one transport.
///
/// Any adapter that implements this trait can be registered with the hub.
/// The hub only holds a shared reference; the connection owns its transport
/// and its background tasks.
#[async_trait]
pub trait Connection: Send + Sync {
    fn id(&self) -> &str;

    /// The transport discriminator, e.g. `"sse"` or `"websocket"`.
    fn connection_type(&self) -> &str;

    /// Delivers one message. Fails immediately if the connection is closed.
    /// `ctx` is the caller's cancellation; firing it aborts the wait but
    /// leaves the connection open.
    async fn send(&self, ctx: &CancellationToken, message: Arc<Message>) -> Result<(), HubError>;

    /// Closes the connection. Calling it more than once is a no-op.
    fn close(&self) -> Result<(), HubError>;

    fn is_closed(&self) -> bool;

    /// The token whose cancellation means "this connection is gone".
    fn context(&self) -> CancellationToken;
}

/// Connection-local mutable state: the closed flag and the last-activity
/// timestamp, each behind its own lock.
#[derive(Debug)]
pub struct ConnectionState {
    closed: RwLock<bool>,
    last_activity: Mutex<Instant>,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionState {
    pub fn new() -> Self {
        Self {
            closed: RwLock::new(false),
            last_activity: Mutex::new(Instant::now()),
        }
    }

    /// Flips the closed flag. Returns `true` only for the call that performed the flip.
    pub fn mark_closed(&self) -> bool {
        let mut closed = self.closed.write();
        if *closed {
            return false;
        }
        *closed = true;
        true
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.read()
    }

    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }
}
