use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};

use super::{ObjectStore, RemoteDeletion};
use crate::media::errors::{ObjectStoreError, ObjectStoreResult};

/// Process-local object store with per-object failure injection.
#[derive(Debug, Clone, Default)]
pub struct InMemoryObjectStore {
    objects: Arc<DashMap<String, Vec<u8>>>,
    failing: Arc<DashSet<String>>,
    delete_calls: Arc<AtomicU64>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make deletes of `public_id` fail until [`Self::clear_failures`].
    pub fn fail_deletes_for(&self, public_id: impl Into<String>) {
        self.failing.insert(public_id.into());
    }

    pub fn clear_failures(&self) {
        self.failing.clear();
    }

    pub fn contains(&self, public_id: &str) -> bool {
        self.objects.contains_key(public_id)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Delete attempts so far, successful or not.
    pub fn delete_calls(&self) -> u64 {
        self.delete_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put(&self, public_id: &str, bytes: Vec<u8>) -> ObjectStoreResult<()> {
        self.objects.insert(public_id.to_string(), bytes);
        Ok(())
    }

    async fn delete(&self, public_id: &str) -> ObjectStoreResult<RemoteDeletion> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(public_id) {
            return Err(ObjectStoreError::unavailable(format!(
                "delete of '{public_id}' failed (injected)"
            )));
        }
        Ok(match self.objects.remove(public_id) {
            Some(_) => RemoteDeletion::Deleted,
            None => RemoteDeletion::NotFound,
        })
    }

    async fn exists(&self, public_id: &str) -> ObjectStoreResult<bool> {
        Ok(self.objects.contains_key(public_id))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
