//! # Broker Provider Enum
//!
//! Enum dispatch over the broker clients. `MessageBroker::publish` is generic,
//! so the trait is not object safe; services hold a `BrokerProvider` instead
//! of an `Arc<dyn MessageBroker>`.

use std::sync::Arc;

use tracing::info;

use super::errors::MessagingResult;
use super::handler::MessageHandler;
use super::message::QueueMessage;
use super::providers::{InMemoryBroker, InMemoryBrokerServer, RabbitMqBroker};
use super::subscription::SubscriptionHandle;
use super::traits::MessageBroker;
use super::types::{ConnectionState, QueueBinding};
use crate::config::{BrokerConfig, BrokerProviderKind};

/// A broker client. Cheap to clone; clones share one connection.
///
/// # Example
///
/// ```ignore
/// let broker = BrokerProvider::from_config(&config.broker);
/// broker.connect().await?;
/// broker.publish("post-service", "post.deleted", &event).await?;
/// ```
#[derive(Debug, Clone)]
pub enum BrokerProvider {
    RabbitMq(RabbitMqBroker),
    InMemory(InMemoryBroker),
}

impl BrokerProvider {
    /// Build the configured client. Does not connect.
    pub fn from_config(config: &BrokerConfig) -> Self {
        let provider = match config.provider {
            BrokerProviderKind::RabbitMq => Self::RabbitMq(RabbitMqBroker::new(config)),
            BrokerProviderKind::InMemory => Self::InMemory(InMemoryBroker::standalone(config)),
        };
        info!(provider = provider.provider_name(), "Broker client created");
        provider
    }

    /// In-memory client attached to a shared server.
    pub fn in_memory(server: &InMemoryBrokerServer, config: &BrokerConfig) -> Self {
        Self::InMemory(InMemoryBroker::new(server.clone(), config))
    }

    pub fn provider_name(&self) -> &'static str {
        match self {
            Self::RabbitMq(b) => b.provider_name(),
            Self::InMemory(b) => b.provider_name(),
        }
    }

    pub async fn connect(&self) -> MessagingResult<()> {
        match self {
            Self::RabbitMq(b) => b.connect().await,
            Self::InMemory(b) => b.connect().await,
        }
    }

    pub async fn ensure_exchange(&self, exchange: &str) -> MessagingResult<()> {
        match self {
            Self::RabbitMq(b) => b.ensure_exchange(exchange).await,
            Self::InMemory(b) => b.ensure_exchange(exchange).await,
        }
    }

    pub async fn publish<T: QueueMessage>(
        &self,
        exchange: &str,
        routing_key: &str,
        message: &T,
    ) -> MessagingResult<()> {
        match self {
            Self::RabbitMq(b) => b.publish(exchange, routing_key, message).await,
            Self::InMemory(b) => b.publish(exchange, routing_key, message).await,
        }
    }

    pub async fn subscribe(
        &self,
        exchange: &str,
        routing_key: &str,
        binding: QueueBinding,
        handler: Arc<dyn MessageHandler>,
    ) -> MessagingResult<SubscriptionHandle> {
        match self {
            Self::RabbitMq(b) => b.subscribe(exchange, routing_key, binding, handler).await,
            Self::InMemory(b) => b.subscribe(exchange, routing_key, binding, handler).await,
        }
    }

    pub fn state(&self) -> ConnectionState {
        match self {
            Self::RabbitMq(b) => b.state(),
            Self::InMemory(b) => b.state(),
        }
    }

    pub async fn health_check(&self) -> MessagingResult<bool> {
        match self {
            Self::RabbitMq(b) => b.health_check().await,
            Self::InMemory(b) => b.health_check().await,
        }
    }

    pub async fn shutdown(&self) {
        match self {
            Self::RabbitMq(b) => b.shutdown().await,
            Self::InMemory(b) => b.shutdown().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_configured_provider() {
        let mut config = BrokerConfig::default();
        assert_eq!(BrokerProvider::from_config(&config).provider_name(), "rabbitmq");

        config.provider = BrokerProviderKind::InMemory;
        let provider = BrokerProvider::from_config(&config);
        assert_eq!(provider.provider_name(), "in_memory");
        assert_eq!(provider.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn in_memory_clients_share_a_server() {
        let server = InMemoryBrokerServer::new();
        let config = BrokerConfig::default();
        let a = BrokerProvider::in_memory(&server, &config);
        let b = BrokerProvider::in_memory(&server, &config);

        a.connect().await.unwrap();
        b.connect().await.unwrap();
        assert_eq!(server.connection_count(), 2);
        assert!(a.health_check().await.unwrap());

        a.shutdown().await;
        assert_eq!(server.connection_count(), 1);
        assert!(!a.health_check().await.unwrap());
    }
}
