#![allow(clippy::doc_markdown)] // Allow technical terms like RabbitMQ, PostgreSQL in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Coherence Core
//!
//! Asynchronous cache coherence and cross-service cleanup for a post service
//! and a media service that share no database transaction.
//!
//! ## Overview
//!
//! When a post is deleted the post service removes it from its store,
//! synchronously invalidates the cached detail and list views, and publishes
//! a `post.deleted` event. The media service consumes the event and deletes
//! the referenced media from its object store and record store, idempotently.
//!
//! ```text
//!  PostService::delete_post
//!     ├─ PostStore::delete_by_id           (must commit first)
//!     ├─ CacheLayer: post:{id}, posts:*    (best effort, reported)
//!     └─ BrokerProvider::publish           post-service / post.deleted
//!                 │
//!                 ▼
//!  MediaCleanupWorker ─► PostDeletedHandler ─► MediaCleanup
//!                                               ├─ ObjectStore::delete
//!                                               └─ MediaStore::delete_by_id
//! ```
//!
//! ## Module Organization
//!
//! - [`messaging`] - Topic-broker client (RabbitMQ, in-memory) with reconnect
//! - [`cache`] - Read-through cache (Redis, in-memory, no-op) and key scheme
//! - [`posts`] - Producer: post records, invalidation, event emission
//! - [`media`] - Consumer: media records, object stores, idempotent cleanup
//! - [`events`] - Domain event payloads
//! - [`config`] - Layered configuration
//! - [`database`] - PostgreSQL pool and migrations
//! - [`logging`] - Structured logging setup
//! - [`error`] - Crate-level error taxonomy
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use coherence_core::cache::{CacheLayer, CacheProvider};
//! use coherence_core::config::ConfigManager;
//! use coherence_core::messaging::BrokerProvider;
//! use coherence_core::posts::{InMemoryPostStore, PostEventPublisher, PostService};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let config = manager.config();
//!
//! let broker = Arc::new(BrokerProvider::from_config(&config.broker));
//! let cache = Arc::new(CacheProvider::from_config(&config.cache).await);
//! let posts = PostService::new(
//!     Arc::new(InMemoryPostStore::new()),
//!     CacheLayer::new(cache, &config.cache),
//!     PostEventPublisher::new(broker, &config.broker),
//! );
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod database;
pub mod error;
pub mod events;
pub mod ids;
pub mod logging;
pub mod media;
pub mod messaging;
pub mod pagination;
pub mod posts;

pub use config::{CoherenceConfig, ConfigManager};
pub use error::{CoherenceError, ErrorKind, Result};
pub use events::{PostDeletedEvent, PostEvent, POST_DELETED_ROUTING_KEY};
pub use ids::{CallerIdentity, MediaId, PostId, UserId};
