//! Broker client implementations.

pub mod in_memory;
pub mod rabbitmq;

pub use in_memory::{BrokerStats, InMemoryBroker, InMemoryBrokerServer, InMemoryConnection};
pub use rabbitmq::{LapinConnector, RabbitMqBroker};
