// src/core/errors.rs

//! Defines the primary error type for the hub and its connections.

use thiserror::Error;

/// The main error enum, representing every failure the hub core can report.
///
/// The variants fall into four groups:
/// - admission: `NotRunning`, `AlreadyRunning`, `ShuttingDown`, `Timeout`
/// - delivery: `ConnectionClosed`, `SendTimeout`, `Write`, `Encode`, `Cancelled`
/// - lookup: `NotFound`
/// - validation: `Validation`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HubError {
    #[error("hub is not running")]
    NotRunning,

    #[error("hub is already running")]
    AlreadyRunning,

    #[error("hub is shutting down")]
    ShuttingDown,

    /// An enqueue onto one of the hub's channels did not complete in time.
    /// The payload names the operation (e.g. "registering connection").
    #[error("timeout {0}")]
    Timeout(&'static str),

    /// The caller's cancellation token fired before the operation completed.
    #[error("context cancelled")]
    Cancelled,

    #[error("connection {0} not found")]
    NotFound(String),

    #[error("connection is closed")]
    ConnectionClosed,

    #[error("send timeout")]
    SendTimeout,

    #[error("write failed: {0}")]
    Write(String),

    #[error("failed to encode message: {0}")]
    Encode(String),

    #[error("invalid message: {0}")]
    Validation(String),
}

impl HubError {
    /// Returns true for errors raised while handing an operation to the hub loop.
    pub fn is_admission(&self) -> bool {
        matches!(
            self,
            HubError::NotRunning
                | HubError::AlreadyRunning
                | HubError::ShuttingDown
                | HubError::Timeout(_)
        )
    }

    /// Returns true for errors raised while delivering to a single connection.
    pub fn is_delivery(&self) -> bool {
        matches!(
            self,
            HubError::ConnectionClosed
                | HubError::SendTimeout
                | HubError::Write(_)
                | HubError::Encode(_)
                | HubError::Cancelled
        )
    }
}

impl From<std::io::Error> for HubError {
    fn from(e: std::io::Error) -> Self {
        HubError::Write(e.to_string())
    }
}

impl From<serde_json::Error> for HubError {
    fn from(e: serde_json::Error) -> Self {
        HubError::Encode(e.to_string())
    }
}
