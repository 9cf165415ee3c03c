//! # Messaging Module
//!
//! Topic-broker client used to carry domain events between services.
//!
//! ## Architecture
//!
//! ```text
//!  BrokerProvider (enum dispatch)
//!     ├── RabbitMqBroker ──┐
//!     └── InMemoryBroker ──┤
//!                          ▼
//!            ConnectionManager<C: Connector>
//!              state: Disconnected → Connecting → Connected
//!              reconnect: jittered exponential backoff, until shutdown
//! ```
//!
//! Publishing JSON-encodes the payload and sends it persistent. Subscribing
//! declares and binds a queue ([`QueueBinding::Ephemeral`] or
//! [`QueueBinding::Durable`]) and consumes it on a background task that
//! settles each message with the [`HandlerOutcome`] its handler returns.

pub mod backoff;
pub mod channel_cache;
pub mod connection;
pub mod errors;
pub mod handler;
pub mod message;
pub mod provider;
pub mod providers;
pub mod subscription;
pub mod topic;
pub mod traits;
pub mod types;

pub use backoff::ReconnectBackoff;
pub use channel_cache::ChannelCache;
pub use connection::{ConnectionManager, Connector, Established};
pub use errors::{MessagingError, MessagingResult};
pub use handler::{dispatch, handler_fn, FnHandler, MessageHandler};
pub use message::QueueMessage;
pub use provider::BrokerProvider;
pub use providers::{BrokerStats, InMemoryBroker, InMemoryBrokerServer, RabbitMqBroker};
pub use subscription::SubscriptionHandle;
pub use topic::topic_matches;
pub use traits::MessageBroker;
pub use types::{ConnectionState, Delivery, HandlerOutcome, QueueBinding};
