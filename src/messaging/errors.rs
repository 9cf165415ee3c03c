//! # Messaging Error Types
//!
//! Structured errors for the broker client. Connection-level failures are
//! mostly absorbed by the connection manager (it schedules a reconnect); the
//! variants here are what reaches callers of `publish`/`subscribe`.

use thiserror::Error;

use super::types::ConnectionState;

#[derive(Error, Debug)]
pub enum MessagingError {
    #[error("Broker connection error: {message}")]
    Connection { message: String },

    #[error("Broker not connected (state: {state})")]
    NotConnected { state: ConnectionState },

    #[error("Channel error on {channel}: {message}")]
    Channel { channel: String, message: String },

    #[error("Topology declaration failed for {entity}: {message}")]
    Topology { entity: String, message: String },

    #[error("Publish to {exchange}/{routing_key} failed: {message}")]
    Publish {
        exchange: String,
        routing_key: String,
        message: String,
    },

    #[error("Consume from queue {queue} failed: {message}")]
    Consume { queue: String, message: String },

    #[error("Acknowledgement of delivery {delivery_tag} on {queue} failed: {message}")]
    Acknowledgement {
        queue: String,
        delivery_tag: u64,
        message: String,
    },

    #[error("Message serialization error: {message}")]
    MessageSerialization { message: String },

    #[error("Message deserialization error: {message}")]
    MessageDeserialization { message: String },

    #[error("Operation {operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Configuration error: {component}: {message}")]
    Configuration { component: String, message: String },

    #[error("Broker client has been shut down")]
    Shutdown,
}

impl MessagingError {
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    pub fn not_connected(state: ConnectionState) -> Self {
        Self::NotConnected { state }
    }

    pub fn channel(channel: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Channel {
            channel: channel.into(),
            message: message.into(),
        }
    }

    pub fn topology(entity: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Topology {
            entity: entity.into(),
            message: message.into(),
        }
    }

    pub fn publish(
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Publish {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            message: message.into(),
        }
    }

    pub fn consume(queue: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Consume {
            queue: queue.into(),
            message: message.into(),
        }
    }

    pub fn acknowledgement(
        queue: impl Into<String>,
        delivery_tag: u64,
        message: impl Into<String>,
    ) -> Self {
        Self::Acknowledgement {
            queue: queue.into(),
            delivery_tag,
            message: message.into(),
        }
    }

    pub fn message_serialization(message: impl Into<String>) -> Self {
        Self::MessageSerialization {
            message: message.into(),
        }
    }

    pub fn message_deserialization(message: impl Into<String>) -> Self {
        Self::MessageDeserialization {
            message: message.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    pub fn configuration(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Whether retrying later (after a reconnect) could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::NotConnected { .. }
                | Self::Channel { .. }
                | Self::Publish { .. }
                | Self::Consume { .. }
                | Self::Timeout { .. }
        )
    }
}

impl From<serde_json::Error> for MessagingError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_syntax() || err.is_data() || err.is_eof() {
            MessagingError::message_deserialization(err.to_string())
        } else {
            MessagingError::message_serialization(err.to_string())
        }
    }
}

impl From<lapin::Error> for MessagingError {
    fn from(err: lapin::Error) -> Self {
        MessagingError::connection(err.to_string())
    }
}

pub type MessagingResult<T> = Result<T, MessagingError>;
