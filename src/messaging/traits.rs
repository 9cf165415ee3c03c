//! # Broker Client Trait
//!
//! Provider-agnostic operations of a topic-broker client. Implemented by the
//! RabbitMQ client and the in-memory client and dispatched through
//! [`super::BrokerProvider`].

use std::sync::Arc;

use async_trait::async_trait;

use super::errors::MessagingResult;
use super::handler::MessageHandler;
use super::message::QueueMessage;
use super::subscription::SubscriptionHandle;
use super::types::{ConnectionState, QueueBinding};

#[async_trait]
pub trait MessageBroker: Send + Sync + 'static {
    /// Establish the connection if idle. Idempotent while connected.
    async fn connect(&self) -> MessagingResult<()>;

    /// Declare the durable topic exchange `exchange` (memoized per connection).
    async fn ensure_exchange(&self, exchange: &str) -> MessagingResult<()>;

    /// JSON-encode `message` and publish it persistently.
    async fn publish<T: QueueMessage>(
        &self,
        exchange: &str,
        routing_key: &str,
        message: &T,
    ) -> MessagingResult<()>;

    /// Declare and bind a queue, then consume it on a background task.
    ///
    /// Topology is declared before this returns, so a subscription made
    /// before publishing will see the published messages.
    async fn subscribe(
        &self,
        exchange: &str,
        routing_key: &str,
        binding: QueueBinding,
        handler: Arc<dyn MessageHandler>,
    ) -> MessagingResult<SubscriptionHandle>;

    fn state(&self) -> ConnectionState;

    async fn health_check(&self) -> MessagingResult<bool>;

    async fn shutdown(&self);

    fn provider_name(&self) -> &'static str;
}
