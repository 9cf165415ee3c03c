//! # RabbitMQ Broker Client
//!
//! `lapin`-backed implementation of [`MessageBroker`].
//!
//! ## Topology
//!
//! - one durable topic exchange per producing service (`post-service`)
//! - one channel per exchange, memoized and tagged with the connection
//!   generation; a reconnect invalidates every cached channel
//! - channels run in publisher-confirm mode with `basic_qos(prefetch_count)`
//! - subscriptions declare either an exclusive auto-delete queue or a named
//!   durable queue, bind it by routing key and consume it on a spawned task
//!   that redeclares everything after a reconnect

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer, ExchangeKind};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{redact_url, BrokerConfig};
use crate::messaging::backoff::ReconnectBackoff;
use crate::messaging::channel_cache::ChannelCache;
use crate::messaging::connection::{wait_until_connected, ConnectionManager, Connector, Established};
use crate::messaging::errors::{MessagingError, MessagingResult};
use crate::messaging::handler::{dispatch, MessageHandler};
use crate::messaging::message::QueueMessage;
use crate::messaging::subscription::{cancelled, SubscriptionHandle};
use crate::messaging::traits::MessageBroker;
use crate::messaging::types::{ConnectionState, Delivery, HandlerOutcome, QueueBinding};

/// Opens AMQP connections and turns `on_error` into the loss signal.
#[derive(Debug, Clone)]
pub struct LapinConnector {
    url: String,
    connection_name: String,
}

impl LapinConnector {
    pub fn new(url: impl Into<String>, connection_name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connection_name: connection_name.into(),
        }
    }
}

#[async_trait]
impl Connector for LapinConnector {
    type Connection = Arc<Connection>;

    async fn open(&self) -> MessagingResult<Established<Arc<Connection>>> {
        let connection = Connection::connect(
            &self.url,
            ConnectionProperties::default().with_connection_name(self.connection_name.clone().into()),
        )
        .await
        .map_err(|e| {
            MessagingError::connection(format!(
                "RabbitMQ connection to {} failed: {e}",
                redact_url(&self.url)
            ))
        })?;

        let (lost_tx, lost_rx) = oneshot::channel();
        let lost_tx = Mutex::new(Some(lost_tx));
        connection.on_error(move |err| {
            if let Some(tx) = lost_tx.lock().take() {
                let _ = tx.send(err.to_string());
            }
        });

        Ok(Established {
            connection: Arc::new(connection),
            lost: lost_rx,
        })
    }

    async fn close(&self, connection: Arc<Connection>) {
        if let Err(err) = connection.close(200, "client shutdown").await {
            debug!(error = %err, "RabbitMQ connection close returned an error");
        }
    }

    fn name(&self) -> &'static str {
        "rabbitmq"
    }
}

struct ActiveConsumer {
    queue: String,
    consumer: Consumer,
    generation: u64,
}

struct RabbitMqInner {
    manager: Arc<ConnectionManager<LapinConnector>>,
    channels: ChannelCache<Channel>,
    prefetch_count: u16,
    connection_name: String,
}

/// RabbitMQ client. Cheap to clone; clones share the connection and channels.
#[derive(Clone)]
pub struct RabbitMqBroker {
    inner: Arc<RabbitMqInner>,
}

impl std::fmt::Debug for RabbitMqBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RabbitMqBroker")
            .field("manager", &self.inner.manager)
            .field("channels", &self.inner.channels.len())
            .field("prefetch_count", &self.inner.prefetch_count)
            .finish()
    }
}

impl RabbitMqBroker {
    /// Build a client. No connection is opened until first use.
    pub fn new(config: &BrokerConfig) -> Self {
        let connector = LapinConnector::new(&config.url, &config.connection_name);
        let manager = ConnectionManager::new(connector, ReconnectBackoff::from(&config.reconnect));
        Self {
            inner: Arc::new(RabbitMqInner {
                manager,
                channels: ChannelCache::new(),
                prefetch_count: config.prefetch_count,
                connection_name: config.connection_name.clone(),
            }),
        }
    }

    pub fn prefetch_count(&self) -> u16 {
        self.inner.prefetch_count
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.manager.watch_state()
    }

    /// Memoized channel for `exchange`, creating it (and declaring the
    /// exchange) on the current connection when missing or stale.
    async fn channel(&self, exchange: &str) -> MessagingResult<(Channel, u64)> {
        let (connection, generation) = self.inner.manager.connect().await?;
        if let Some(channel) = self.cached_channel(exchange, generation) {
            return Ok((channel, generation));
        }

        let channel = connection.create_channel().await.map_err(|e| {
            self.check_connection(&connection, generation);
            MessagingError::channel(exchange, format!("channel creation failed: {e}"))
        })?;
        channel
            .basic_qos(self.inner.prefetch_count, BasicQosOptions::default())
            .await
            .map_err(|e| MessagingError::channel(exchange, format!("failed to set QoS: {e}")))?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| MessagingError::channel(exchange, format!("confirm mode failed: {e}")))?;
        channel
            .exchange_declare(
                exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| MessagingError::topology(format!("exchange {exchange}"), e.to_string()))?;

        debug!(exchange, generation, "Declared exchange and opened channel");
        let (channel, displaced) = self
            .inner
            .channels
            .memoize(exchange, generation, channel, |c| c.status().connected());
        if let Some(displaced) = displaced.filter(|c| c.status().connected()) {
            if let Err(err) = displaced.close(200, "superseded").await {
                debug!(exchange, error = %err, "Failed to close superseded channel");
            }
        }
        Ok((channel, generation))
    }

    fn cached_channel(&self, exchange: &str, generation: u64) -> Option<Channel> {
        self.inner
            .channels
            .get(exchange, generation, |c| c.status().connected())
    }

    fn evict_channel(&self, exchange: &str, generation: u64) {
        self.inner.channels.evict(exchange, generation);
    }

    /// Report the connection as lost when lapin already knows it is gone but
    /// the error callback has not fired yet.
    fn check_connection(&self, connection: &Connection, generation: u64) {
        if !connection.status().connected() {
            self.inner
                .manager
                .report_lost(generation, "connection closed during operation");
        }
    }

    async fn start_consumer(
        &self,
        exchange: &str,
        routing_key: &str,
        binding: &QueueBinding,
    ) -> MessagingResult<ActiveConsumer> {
        let (channel, generation) = self.channel(exchange).await?;

        let (declare_name, options) = match binding {
            QueueBinding::Ephemeral => (
                "",
                QueueDeclareOptions {
                    exclusive: true,
                    auto_delete: true,
                    durable: false,
                    ..Default::default()
                },
            ),
            QueueBinding::Durable(name) => (
                name.as_str(),
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
            ),
        };

        let queue = channel
            .queue_declare(declare_name, options, FieldTable::default())
            .await
            .map_err(|e| {
                self.evict_channel(exchange, generation);
                MessagingError::topology(format!("queue {declare_name:?}"), e.to_string())
            })?;
        let queue_name = queue.name().as_str().to_string();

        channel
            .queue_bind(
                &queue_name,
                exchange,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                self.evict_channel(exchange, generation);
                MessagingError::topology(format!("binding {queue_name} <- {routing_key}"), e.to_string())
            })?;

        let consumer_tag = format!("{}-{}", self.inner.connection_name, Uuid::new_v4());
        let consumer = channel
            .basic_consume(
                &queue_name,
                &consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                self.evict_channel(exchange, generation);
                MessagingError::consume(&queue_name, e.to_string())
            })?;

        info!(
            exchange,
            routing_key,
            queue = %queue_name,
            durable = binding.is_durable(),
            "Subscribed to queue"
        );
        Ok(ActiveConsumer {
            queue: queue_name,
            consumer,
            generation,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn consume_loop(
        self,
        exchange: String,
        routing_key: String,
        binding: QueueBinding,
        handler: Arc<dyn MessageHandler>,
        initial: ActiveConsumer,
        queue_name: Arc<RwLock<String>>,
        mut cancel_rx: watch::Receiver<bool>,
    ) {
        let mut state_rx = self.inner.manager.watch_state();
        let mut shutdown_rx = self.inner.manager.watch_shutdown();
        let retry_delay = self.inner.manager.backoff().initial_delay();
        let mut next = Some(initial);

        loop {
            let active = match next.take() {
                Some(active) => active,
                None => {
                    tokio::select! {
                        connected = wait_until_connected(&mut state_rx, &mut shutdown_rx) => {
                            if !connected {
                                return;
                            }
                        }
                        _ = cancelled(&mut cancel_rx) => return,
                    }
                    match self.start_consumer(&exchange, &routing_key, &binding).await {
                        Ok(active) => {
                            *queue_name.write() = active.queue.clone();
                            active
                        }
                        Err(err) => {
                            warn!(
                                exchange = %exchange,
                                routing_key = %routing_key,
                                error = %err,
                                "Resubscribe failed; retrying"
                            );
                            tokio::select! {
                                _ = tokio::time::sleep(retry_delay) => {}
                                _ = cancelled(&mut cancel_rx) => return,
                            }
                            continue;
                        }
                    }
                }
            };

            let ActiveConsumer {
                queue,
                mut consumer,
                generation,
            } = active;

            loop {
                let item = tokio::select! {
                    item = consumer.next() => item,
                    _ = cancelled(&mut cancel_rx) => return,
                };
                match item {
                    Some(Ok(delivery)) => {
                        self.settle(&exchange, &queue, handler.as_ref(), delivery)
                            .await;
                    }
                    Some(Err(err)) => {
                        warn!(queue = %queue, error = %err, "Consumer stream failed");
                        break;
                    }
                    None => break,
                }
            }

            self.evict_channel(&exchange, generation);
            warn!(
                queue = %queue,
                generation,
                "Consumer stopped; waiting for connection to resubscribe"
            );
            // A channel-level failure leaves the connection up; avoid a hot loop.
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(100)) => {}
                _ = cancelled(&mut cancel_rx) => return,
            }
        }
    }

    async fn settle(
        &self,
        exchange: &str,
        queue: &str,
        handler: &dyn MessageHandler,
        delivery: lapin::message::Delivery,
    ) {
        let message = Delivery {
            exchange: exchange.to_string(),
            routing_key: delivery.routing_key.as_str().to_string(),
            queue: queue.to_string(),
            payload: delivery.data.clone(),
            redelivered: delivery.redelivered,
            delivery_tag: delivery.delivery_tag,
        };

        let outcome = dispatch(handler, &message).await;
        let result = match outcome {
            HandlerOutcome::Ack => delivery.acker.ack(BasicAckOptions::default()).await,
            HandlerOutcome::Requeue => {
                delivery
                    .acker
                    .nack(BasicNackOptions {
                        requeue: true,
                        ..Default::default()
                    })
                    .await
            }
            HandlerOutcome::Reject => {
                delivery
                    .acker
                    .nack(BasicNackOptions {
                        requeue: false,
                        ..Default::default()
                    })
                    .await
            }
        };

        match result {
            Ok(()) => debug!(
                queue,
                delivery_tag = message.delivery_tag,
                outcome = ?outcome,
                "Settled delivery"
            ),
            Err(err) => error!(
                queue,
                delivery_tag = message.delivery_tag,
                outcome = ?outcome,
                error = %err,
                "Failed to settle delivery; broker will redeliver it"
            ),
        }
    }
}

#[async_trait]
impl MessageBroker for RabbitMqBroker {
    async fn connect(&self) -> MessagingResult<()> {
        self.inner.manager.connect().await.map(|_| ())
    }

    async fn ensure_exchange(&self, exchange: &str) -> MessagingResult<()> {
        self.channel(exchange).await.map(|_| ())
    }

    async fn publish<T: QueueMessage>(
        &self,
        exchange: &str,
        routing_key: &str,
        message: &T,
    ) -> MessagingResult<()> {
        let payload = message.to_bytes()?;
        let (channel, generation) = self.channel(exchange).await?;

        let confirm = channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default()
                    .with_delivery_mode(2)
                    .with_content_type("application/json".into()),
            )
            .await
            .map_err(|e| {
                self.evict_channel(exchange, generation);
                if let Some((connection, current)) = self.inner.manager.current() {
                    self.check_connection(&connection, current);
                }
                MessagingError::publish(exchange, routing_key, e.to_string())
            })?;

        let confirmation = confirm.await.map_err(|e| {
            self.evict_channel(exchange, generation);
            MessagingError::publish(exchange, routing_key, format!("confirm failed: {e}"))
        })?;
        if confirmation.is_nack() {
            return Err(MessagingError::publish(
                exchange,
                routing_key,
                "broker rejected the message",
            ));
        }

        debug!(exchange, routing_key, bytes = payload.len(), "Published message");
        Ok(())
    }

    async fn subscribe(
        &self,
        exchange: &str,
        routing_key: &str,
        binding: QueueBinding,
        handler: Arc<dyn MessageHandler>,
    ) -> MessagingResult<SubscriptionHandle> {
        let active = self.start_consumer(exchange, routing_key, &binding).await?;
        let queue_name = Arc::new(RwLock::new(active.queue.clone()));
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let task = tokio::spawn(self.clone().consume_loop(
            exchange.to_string(),
            routing_key.to_string(),
            binding,
            handler,
            active,
            queue_name.clone(),
            cancel_rx,
        ));
        Ok(SubscriptionHandle::new(queue_name, routing_key, cancel_tx, task))
    }

    fn state(&self) -> ConnectionState {
        self.inner.manager.state()
    }

    async fn health_check(&self) -> MessagingResult<bool> {
        Ok(self
            .inner
            .manager
            .current()
            .is_some_and(|(connection, _)| connection.status().connected()))
    }

    async fn shutdown(&self) {
        self.inner.channels.clear();
        self.inner.manager.shutdown().await;
    }

    fn provider_name(&self) -> &'static str {
        "rabbitmq"
    }
}
