// src/core/hub/mod.rs

//! The hub: the registry of live connections and the admission API in front
//! of its event loop.
//!
//! Mutations (register, unregister, broadcast) are funnelled through bounded
//! channels into a single event-loop task. Reads go straight to the registry
//! under a reader-writer lock and never wait on the loop.

mod event_loop;

use crate::config::HubConfig;
use crate::connection::Connection;
use crate::core::HubError;
use crate::core::message::Message;
use event_loop::EventLoop;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, error, info, info_span};

/// A shared, non-owning handle to a registered connection.
pub type SharedConnection = Arc<dyn Connection>;

/// Which registry members a broadcast is delivered to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BroadcastTarget {
    All,
    Type(String),
}

/// A broadcast request travelling through the broadcast channel.
#[derive(Debug, Clone)]
pub(crate) struct Dispatch {
    pub(crate) message: Arc<Message>,
    pub(crate) target: BroadcastTarget,
}

/// The sending halves of the event loop's channels, valid for one Running period.
#[derive(Clone)]
struct HubChannels {
    token: CancellationToken,
    register_tx: mpsc::Sender<SharedConnection>,
    unregister_tx: mpsc::Sender<String>,
    broadcast_tx: mpsc::Sender<Dispatch>,
}

struct RunningHub {
    channels: HubChannels,
    event_loop: JoinHandle<()>,
}

struct HubInner {
    registry: RwLock<HashMap<String, SharedConnection>>,
    running: RwLock<Option<RunningHub>>,
    config: HubConfig,
    span: Span,
}

/// The registry and dispatcher for all live connections.
///
/// Cloning a `Hub` is cheap; all clones share the same registry and loop.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}

impl Hub {
    pub fn new(config: HubConfig) -> Self {
        Self {
            inner: Arc::new(HubInner {
                registry: RwLock::new(HashMap::new()),
                running: RwLock::new(None),
                config,
                span: info_span!("hub"),
            }),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    /// Starts the event loop. Its token is a child of `parent`, so cancelling
    /// `parent` also stops the loop.
    pub fn start(&self, parent: &CancellationToken) -> Result<(), HubError> {
        let mut running = self.inner.running.write();
        if running.is_some() {
            return Err(HubError::AlreadyRunning);
        }

        let config = &self.inner.config;
        let (register_tx, register_rx) = mpsc::channel(config.register_capacity);
        let (unregister_tx, unregister_rx) = mpsc::channel(config.unregister_capacity);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(config.broadcast_capacity);
        let token = parent.child_token();

        let event_loop = EventLoop {
            hub: self.clone(),
            token: token.clone(),
            register_rx,
            unregister_rx,
            broadcast_rx,
        };
        let handle = tokio::spawn(event_loop.run().instrument(self.inner.span.clone()));

        *running = Some(RunningHub {
            channels: HubChannels {
                token,
                register_tx,
                unregister_tx,
                broadcast_tx,
            },
            event_loop: handle,
        });

        info!(parent: &self.inner.span, "Hub started successfully");
        Ok(())
    }

    /// Stops the event loop, closes every registered connection and clears
    /// the registry. A no-op when the hub is not running.
    pub async fn stop(&self) -> Result<(), HubError> {
        let Some(running) = self.inner.running.write().take() else {
            return Ok(());
        };

        running.channels.token.cancel();
        if let Err(e) = running.event_loop.await {
            error!(parent: &self.inner.span, "Hub event loop panicked: {e:?}");
        }

        let drained: Vec<SharedConnection> = self
            .inner
            .registry
            .write()
            .drain()
            .map(|(_, conn)| conn)
            .collect();
        for conn in drained {
            if let Err(e) = conn.close() {
                error!(parent: &self.inner.span, "Failed to close connection {}: {}", conn.id(), e);
            }
        }

        info!(parent: &self.inner.span, "Hub stopped successfully");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.read().is_some()
    }

    /// Hands a connection to the event loop for admission into the registry.
    pub async fn register_connection(&self, conn: SharedConnection) -> Result<(), HubError> {
        let channels = self.channels()?;
        self.enqueue(
            &channels.register_tx,
            conn,
            &channels.token,
            None,
            "registering connection",
        )
        .await
    }

    /// Asks the event loop to remove and close a connection. Unknown ids are
    /// accepted and ignored by the loop.
    pub async fn unregister_connection(&self, id: &str) -> Result<(), HubError> {
        let channels = self.channels()?;
        self.enqueue(
            &channels.unregister_tx,
            id.to_string(),
            &channels.token,
            None,
            "unregistering connection",
        )
        .await
    }

    pub fn get_connection(&self, id: &str) -> Option<SharedConnection> {
        self.inner.registry.read().get(id).cloned()
    }

    pub fn get_connections(&self) -> Vec<SharedConnection> {
        self.inner.registry.read().values().cloned().collect()
    }

    pub fn get_connections_by_type(&self, connection_type: &str) -> Vec<SharedConnection> {
        self.inner
            .registry
            .read()
            .values()
            .filter(|conn| conn.connection_type() == connection_type)
            .cloned()
            .collect()
    }

    pub fn connection_count(&self) -> usize {
        self.inner.registry.read().len()
    }

    /// Queues `message` for delivery to every registered connection.
    ///
    /// Only the enqueue can fail; per-connection delivery failures are handled
    /// by the loop and never reach the caller.
    pub async fn broadcast(
        &self,
        ctx: &CancellationToken,
        message: impl Into<Arc<Message>>,
    ) -> Result<(), HubError> {
        self.dispatch(ctx, message.into(), BroadcastTarget::All).await
    }

    /// Like `broadcast`, restricted to connections of `connection_type`.
    pub async fn broadcast_to_type(
        &self,
        ctx: &CancellationToken,
        connection_type: &str,
        message: impl Into<Arc<Message>>,
    ) -> Result<(), HubError> {
        self.dispatch(
            ctx,
            message.into(),
            BroadcastTarget::Type(connection_type.to_string()),
        )
        .await
    }

    /// Sends directly to one connection and surfaces the delivery error.
    /// A connection that fails the send is unregistered.
    pub async fn send_to_connection(
        &self,
        ctx: &CancellationToken,
        id: &str,
        message: impl Into<Arc<Message>>,
    ) -> Result<(), HubError> {
        if !self.is_running() {
            return Err(HubError::NotRunning);
        }
        let conn = self
            .get_connection(id)
            .ok_or_else(|| HubError::NotFound(id.to_string()))?;

        if let Err(e) = conn.send(ctx, message.into()).await {
            error!(parent: &self.inner.span, "Failed to send message to connection {}: {}", id, e);
            let _ = self.unregister_connection(id).await;
            return Err(e);
        }
        Ok(())
    }

    async fn dispatch(
        &self,
        ctx: &CancellationToken,
        message: Arc<Message>,
        target: BroadcastTarget,
    ) -> Result<(), HubError> {
        let channels = self.channels()?;
        self.enqueue(
            &channels.broadcast_tx,
            Dispatch { message, target },
            &channels.token,
            Some(ctx),
            "broadcasting message",
        )
        .await
    }

    fn channels(&self) -> Result<HubChannels, HubError> {
        self.inner
            .running
            .read()
            .as_ref()
            .map(|running| running.channels.clone())
            .ok_or(HubError::NotRunning)
    }

    /// Pushes `item` onto a loop channel, bounded by the hub's shutdown, the
    /// caller's cancellation and the enqueue timeout.
    async fn enqueue<T>(
        &self,
        tx: &mpsc::Sender<T>,
        item: T,
        hub_token: &CancellationToken,
        caller: Option<&CancellationToken>,
        operation: &'static str,
    ) -> Result<(), HubError> {
        let caller_cancelled = async {
            match caller {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            _ = hub_token.cancelled() => Err(HubError::ShuttingDown),
            _ = caller_cancelled => Err(HubError::Cancelled),
            result = tx.send(item) => result.map_err(|_| HubError::ShuttingDown),
            _ = tokio::time::sleep(self.inner.config.enqueue_timeout) => Err(HubError::Timeout(operation)),
        }
    }

    fn registry(&self) -> &RwLock<HashMap<String, SharedConnection>> {
        &self.inner.registry
    }
}
