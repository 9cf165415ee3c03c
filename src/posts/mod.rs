//! # Posts
//!
//! The producer side: owns post records, keeps the read-through cache
//! coherent with them and announces deletions on the broker.

pub mod errors;
pub mod model;
pub mod postgres;
pub mod publisher;
pub mod service;
pub mod store;

pub use errors::{PostError, PostResult};
pub use model::{NewPost, Post, PostFilter, PostListQuery, PostPage, PostSortField, SortOrder};
pub use postgres::PgPostStore;
pub use publisher::PostEventPublisher;
pub use service::{DeletionReport, InvalidationReport, PostService, StepStatus};
pub use store::{InMemoryPostStore, PostStore};
