//! Core value types shared by every broker provider.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::errors::MessagingResult;
use super::message::QueueMessage;

/// Connection lifecycle as observed by callers.
///
/// `Connected -> Disconnected` happens on any transport error or explicit
/// close and is always followed by a scheduled return to `Connecting` until
/// the client is shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
        }
    }
}

/// How a subscription's queue is declared.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueueBinding {
    /// Server-named, exclusive, auto-delete, non-durable. Messages published
    /// while no consumer is connected are lost.
    Ephemeral,
    /// Named and durable, shared by competing consumers. Unacked messages are
    /// redelivered after a consumer crash.
    Durable(String),
}

impl QueueBinding {
    pub fn durable(name: impl Into<String>) -> Self {
        Self::Durable(name.into())
    }

    pub fn is_durable(&self) -> bool {
        matches!(self, Self::Durable(_))
    }
}

/// Build a binding from a configured queue name, treating empty as ephemeral.
impl From<&str> for QueueBinding {
    fn from(name: &str) -> Self {
        if name.trim().is_empty() {
            Self::Ephemeral
        } else {
            Self::Durable(name.to_string())
        }
    }
}

/// What the consumer loop does with a message once its handler returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerOutcome {
    /// Processing finished (possibly with logged per-item failures).
    Ack,
    /// Negative-acknowledge and put the message back on the queue.
    Requeue,
    /// Negative-acknowledge without requeue (poison message).
    Reject,
}

/// A message handed to a [`super::MessageHandler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub exchange: String,
    pub routing_key: String,
    pub queue: String,
    pub payload: Vec<u8>,
    /// Set by the broker when this message was delivered before and not acked.
    pub redelivered: bool,
    pub delivery_tag: u64,
}

impl Delivery {
    pub fn decode<T: QueueMessage>(&self) -> MessagingResult<T> {
        T::from_bytes(&self.payload)
    }
}
