// src/core/hub/event_loop.rs

//! The single task that owns every mutation of the hub registry.

use super::{BroadcastTarget, Dispatch, Hub, SharedConnection};
use crate::core::HubError;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{Instant, interval_at, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, warn};

pub(super) struct EventLoop {
    pub(super) hub: Hub,
    pub(super) token: CancellationToken,
    pub(super) register_rx: mpsc::Receiver<SharedConnection>,
    pub(super) unregister_rx: mpsc::Receiver<String>,
    pub(super) broadcast_rx: mpsc::Receiver<Dispatch>,
}

impl EventLoop {
    pub(super) async fn run(mut self) {
        let period = self.hub.config().cleanup_interval;
        let mut cleanup = interval_at(Instant::now() + period, period);

        loop {
            tokio::select! {
                Some(conn) = self.register_rx.recv() => self.handle_register(conn),
                Some(id) = self.unregister_rx.recv() => self.handle_unregister(&id),
                Some(dispatch) = self.broadcast_rx.recv() => self.handle_broadcast(dispatch),
                _ = cleanup.tick() => self.cleanup_closed_connections(),
                _ = self.token.cancelled() => {
                    self.reject_pending_registrations();
                    info!("Hub run loop stopped");
                    return;
                }
            }
        }
    }

    /// Closes connections that were admitted to the register channel but
    /// never reached the registry.
    fn reject_pending_registrations(&mut self) {
        self.register_rx.close();
        while let Ok(conn) = self.register_rx.try_recv() {
            if let Err(e) = conn.close() {
                error!("Failed to close pending connection {}: {}", conn.id(), e);
            }
            debug!("Pending registration of {} closed on shutdown", conn.id());
        }
    }

    fn handle_register(&self, conn: SharedConnection) {
        let id = conn.id().to_string();

        // Duplicate ids are refused; the first registration keeps the slot.
        if let Some(existing) = self.hub.registry().read().get(&id) {
            if !Arc::ptr_eq(existing, &conn) {
                warn!("Connection {} is already registered, rejecting duplicate", id);
                if let Err(e) = conn.close() {
                    error!("Failed to close duplicate connection {}: {}", id, e);
                }
            }
            return;
        }

        // Watch the connection's token and turn its cancellation into an unregister.
        let disconnected = conn.context();
        info!("Connection {} registered (type: {})", id, conn.connection_type());
        self.hub.registry().write().insert(id.clone(), conn);

        let hub = self.hub.clone();
        tokio::spawn(
            async move {
                disconnected.cancelled().await;
                if let Err(e) = hub.unregister_connection(&id).await {
                    debug!("Disconnect of {} not forwarded to hub: {}", id, e);
                }
            }
            .in_current_span(),
        );
    }

    fn handle_unregister(&self, id: &str) {
        let Some(conn) = self.hub.registry().write().remove(id) else {
            return;
        };
        if let Err(e) = conn.close() {
            error!("Failed to close connection {}: {}", id, e);
        }
        info!("Connection {} unregistered", id);
    }

    /// Fans a message out to its targets, one task per connection. The tasks
    /// are not joined; a failed send unregisters that connection only.
    fn handle_broadcast(&self, dispatch: Dispatch) {
        let targets = match &dispatch.target {
            BroadcastTarget::All => self.hub.get_connections(),
            BroadcastTarget::Type(connection_type) => self.hub.get_connections_by_type(connection_type),
        };
        let send_timeout = self.hub.config().fanout_send_timeout;

        for conn in &targets {
            let conn = conn.clone();
            let hub = self.hub.clone();
            let message = dispatch.message.clone();
            let ctx = self.token.child_token();
            tokio::spawn(
                async move {
                    let result = match timeout(send_timeout, conn.send(&ctx, message)).await {
                        Ok(result) => result,
                        Err(_) => Err(HubError::SendTimeout),
                    };
                    if let Err(e) = result {
                        error!("Failed to send broadcast to connection {}: {}", conn.id(), e);
                        let _ = hub.unregister_connection(conn.id()).await;
                    }
                }
                .in_current_span(),
            );
        }

        match &dispatch.target {
            BroadcastTarget::All => info!(
                "Broadcasted message {} to {} connections",
                dispatch.message.id,
                targets.len()
            ),
            BroadcastTarget::Type(connection_type) => info!(
                "Broadcasted message {} to {} connections of type {}",
                dispatch.message.id,
                targets.len(),
                connection_type
            ),
        }
    }

    /// Evicts entries whose connection reports itself closed without having
    /// been unregistered.
    fn cleanup_closed_connections(&self) {
        self.hub.registry().write().retain(|id, conn| {
            if conn.is_closed() {
                info!("Cleaned up closed connection {}", id);
                false
            } else {
                true
            }
        });
    }
}
