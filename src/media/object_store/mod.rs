//! # Object Store
//!
//! Remote storage of uploaded media bytes, addressed by `public_id`.
//! Deleting an absent object is reported as [`RemoteDeletion::NotFound`],
//! which cleanup treats as success.

pub mod local;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;

use super::errors::ObjectStoreResult;
use crate::config::{ObjectStoreConfig, ObjectStoreKind};

pub use local::LocalObjectStore;
pub use memory::InMemoryObjectStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteDeletion {
    Deleted,
    NotFound,
}

#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    async fn put(&self, public_id: &str, bytes: Vec<u8>) -> ObjectStoreResult<()>;

    async fn delete(&self, public_id: &str) -> ObjectStoreResult<RemoteDeletion>;

    async fn exists(&self, public_id: &str) -> ObjectStoreResult<bool>;

    fn name(&self) -> &'static str;
}

pub fn from_config(config: &ObjectStoreConfig) -> Arc<dyn ObjectStore> {
    match config.provider {
        ObjectStoreKind::Local => Arc::new(LocalObjectStore::new(config.root.clone())),
        ObjectStoreKind::Memory => Arc::new(InMemoryObjectStore::new()),
    }
}
