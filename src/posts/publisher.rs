//! Publishes post events on the post service's topic exchange.

use std::sync::Arc;
use std::time::Duration;

use tracing::error;

use crate::config::BrokerConfig;
use crate::events::PostEvent;
use crate::logging::log_event_operation;
use crate::messaging::{BrokerProvider, MessagingError, MessagingResult};

#[derive(Debug, Clone)]
pub struct PostEventPublisher {
    broker: Arc<BrokerProvider>,
    exchange: String,
    timeout: Duration,
}

impl PostEventPublisher {
    pub fn new(broker: Arc<BrokerProvider>, config: &BrokerConfig) -> Self {
        Self {
            broker,
            exchange: config.exchange.clone(),
            timeout: config.publish_timeout(),
        }
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub fn broker(&self) -> &Arc<BrokerProvider> {
        &self.broker
    }

    /// Publish under the configured deadline. The caller decides what a
    /// failure means; nothing is retried here.
    pub async fn publish(&self, event: &PostEvent) -> MessagingResult<()> {
        let routing_key = event.routing_key();
        let post_id = event.post_id().to_string();

        let send = async {
            match event {
                PostEvent::Deleted(body) => {
                    self.broker.publish(&self.exchange, routing_key, body).await
                }
            }
        };

        let result = match tokio::time::timeout(self.timeout, send).await {
            Ok(result) => result,
            Err(_) => Err(MessagingError::timeout(
                format!("publish {routing_key}"),
                u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            )),
        };

        match &result {
            Ok(()) => log_event_operation("publish", routing_key, Some(&post_id), "SUCCESS", None),
            Err(e) => {
                error!(
                    exchange = %self.exchange,
                    routing_key,
                    post_id = %post_id,
                    error = %e,
                    "Failed to publish post event"
                );
                log_event_operation(
                    "publish",
                    routing_key,
                    Some(&post_id),
                    "FAILED",
                    Some(&e.to_string()),
                );
            }
        }
        result
    }
}
