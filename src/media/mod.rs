//! # Media
//!
//! The consumer side: owns media records and their remote objects, and
//! reclaims them when the post that referenced them is deleted.
//!
//! ## Architecture
//!
//! ```text
//!  broker ── post.deleted ──► PostDeletedHandler ──► MediaCleanup
//!                                   │                    ├── MediaStore    find_by_ids / delete_by_id
//!                                   ▼                    └── ObjectStore   delete → Deleted | NotFound
//!                         Ack / Requeue / Reject
//! ```

pub mod cleanup;
pub mod errors;
pub mod handler;
pub mod model;
pub mod object_store;
pub mod postgres;
pub mod service;
pub mod store;
pub mod worker;

pub use cleanup::{CleanupFailure, CleanupReport, CleanupStage, MediaCleanup};
pub use errors::{MediaError, MediaResult, ObjectStoreError, ObjectStoreResult};
pub use handler::PostDeletedHandler;
pub use model::{Media, MediaListQuery, MediaPage, NewMedia};
pub use object_store::{InMemoryObjectStore, LocalObjectStore, ObjectStore, RemoteDeletion};
pub use postgres::PgMediaStore;
pub use service::MediaService;
pub use store::{InMemoryMediaStore, MediaStore};
pub use worker::MediaCleanupWorker;
