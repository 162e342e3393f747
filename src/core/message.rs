// src/core/message.rs

//! The transport-agnostic message envelope handed to the hub for delivery,
//! together with its fluent builder, the common factories and the validator.

use crate::core::HubError;
use chrono::{Local, SecondsFormat, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::fmt;

/// Header carrying the message priority.
pub const PRIORITY_HEADER: &str = "priority";
/// Header carrying the RFC 3339 build timestamp.
pub const TIMESTAMP_HEADER: &str = "timestamp";

/// A unit of data delivered to zero or more connections.
///
/// Messages are value objects: once built they are shared behind an `Arc` and
/// never mutated.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Message {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
}

impl Message {
    /// Creates a message with the given id, type and payload and no headers.
    pub fn new(id: impl Into<String>, kind: impl Into<String>, data: Value) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            data,
            headers: HashMap::new(),
        }
    }

    pub fn builder() -> MessageBuilder {
        MessageBuilder::new()
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    /// Shorthand for `MessageValidator::validate(Some(self))`.
    pub fn validate(&self) -> Result<(), HubError> {
        MessageValidator::new().validate(Some(self))
    }
}

/// The well-known message categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Connection,
    Notification,
    KeepAlive,
    Error,
    Alert,
    Update,
    System,
    Broadcast,
}

impl MessageType {
    pub const ALL: [MessageType; 8] = [
        MessageType::Connection,
        MessageType::Notification,
        MessageType::KeepAlive,
        MessageType::Error,
        MessageType::Alert,
        MessageType::Update,
        MessageType::System,
        MessageType::Broadcast,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Connection => "connection",
            MessageType::Notification => "notification",
            MessageType::KeepAlive => "keepalive",
            MessageType::Error => "error",
            MessageType::Alert => "alert",
            MessageType::Update => "update",
            MessageType::System => "system",
            MessageType::Broadcast => "broadcast",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Checks whether `kind` names one of the well-known message categories.
pub fn is_valid_message_type(kind: &str) -> bool {
    MessageType::ALL.iter().any(|t| t.as_str() == kind)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MessagePriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl MessagePriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessagePriority::Low => "low",
            MessagePriority::Normal => "normal",
            MessagePriority::High => "high",
            MessagePriority::Critical => "critical",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(MessagePriority::Low),
            "normal" => Some(MessagePriority::Normal),
            "high" => Some(MessagePriority::High),
            "critical" => Some(MessagePriority::Critical),
            _ => None,
        }
    }
}

/// Reads the priority header, falling back to `Normal` when it is missing or unknown.
pub fn message_priority(message: &Message) -> MessagePriority {
    message
        .header(PRIORITY_HEADER)
        .and_then(MessagePriority::parse)
        .unwrap_or_default()
}

/// Fluent construction of a `Message`.
#[derive(Debug, Default)]
pub struct MessageBuilder {
    id: String,
    kind: String,
    data: Value,
    headers: HashMap<String, String>,
}

impl MessageBuilder {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_type(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    /// Serializes an arbitrary payload into the message.
    ///
    /// Fails with `HubError::Validation` if the value cannot be represented as JSON.
    pub fn try_data<T: Serialize + ?Sized>(mut self, data: &T) -> Result<Self, HubError> {
        self.data = serde_json::to_value(data).map_err(|e| {
            HubError::Validation(format!("message data must be JSON serializable: {e}"))
        })?;
        Ok(self)
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_priority(self, priority: MessagePriority) -> Self {
        self.with_header(PRIORITY_HEADER, priority.as_str())
    }

    pub fn with_timestamp(self) -> Self {
        self.with_header(
            TIMESTAMP_HEADER,
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        )
    }

    /// Finishes the message, assigning an id and a timestamp header when absent.
    pub fn build(mut self) -> Message {
        if self.id.is_empty() {
            self.id = generate_message_id();
        }
        if !self.headers.contains_key(TIMESTAMP_HEADER) {
            self = self.with_timestamp();
        }
        Message {
            id: self.id,
            kind: self.kind,
            data: self.data,
            headers: self.headers,
        }
    }
}

pub fn notification_message(title: &str, body: &str) -> Message {
    MessageBuilder::new()
        .with_type(MessageType::Notification.as_str())
        .with_data(json!({ "title": title, "body": body }))
        .with_priority(MessagePriority::Normal)
        .build()
}

pub fn alert_message(level: &str, message: &str) -> Message {
    MessageBuilder::new()
        .with_type(MessageType::Alert.as_str())
        .with_data(json!({ "level": level, "message": message }))
        .with_priority(MessagePriority::High)
        .build()
}

pub fn system_message(action: &str, data: Value) -> Message {
    MessageBuilder::new()
        .with_type(MessageType::System.as_str())
        .with_data(json!({ "action": action, "data": data }))
        .with_priority(MessagePriority::Normal)
        .build()
}

pub fn update_message(resource: &str, data: Value) -> Message {
    MessageBuilder::new()
        .with_type(MessageType::Update.as_str())
        .with_data(json!({ "resource": resource, "data": data }))
        .with_priority(MessagePriority::Normal)
        .build()
}

pub fn broadcast_message(data: Value) -> Message {
    MessageBuilder::new()
        .with_type(MessageType::Broadcast.as_str())
        .with_data(data)
        .with_priority(MessagePriority::Normal)
        .build()
}

pub fn error_message(code: &str, message: &str, details: Value) -> Message {
    MessageBuilder::new()
        .with_type(MessageType::Error.as_str())
        .with_data(json!({ "code": code, "message": message, "details": details }))
        .with_priority(MessagePriority::High)
        .build()
}

/// Generates a message id of the form `YYYYMMDDhhmmss-<8 alphanumerics>`.
pub fn generate_message_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    format!("{}-{}", Local::now().format("%Y%m%d%H%M%S"), suffix)
}

/// Generates an opaque id of the form `<prefix>-<16 hex digits>`, used for
/// connection ids (`conn-`, `ws-`) and API-issued message ids (`msg-`).
pub fn random_id(prefix: &str) -> String {
    format!("{prefix}-{}", hex::encode(rand::random::<[u8; 8]>()))
}

/// Rejects malformed messages before they are handed to the hub.
/// The hub itself never re-validates.
#[derive(Debug, Default, Clone, Copy)]
pub struct MessageValidator;

impl MessageValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate(&self, message: Option<&Message>) -> Result<(), HubError> {
        let message =
            message.ok_or_else(|| HubError::Validation("message is missing".into()))?;

        if message.id.is_empty() {
            return Err(HubError::Validation("message ID cannot be empty".into()));
        }
        if message.kind.is_empty() {
            return Err(HubError::Validation("message type cannot be empty".into()));
        }
        if !message.data.is_null() {
            serde_json::to_vec(&message.data).map_err(|e| {
                HubError::Validation(format!("message data must be JSON serializable: {e}"))
            })?;
        }
        Ok(())
    }
}
