// src/core/mod.rs

//! The central module containing the hub, the message model and the error type.

pub mod errors;
pub mod hub;
pub mod message;

pub use errors::HubError;
pub use hub::{BroadcastTarget, Hub, SharedConnection};
pub use message::{Message, MessageBuilder, MessagePriority, MessageType, MessageValidator};
