//! Media record store contract and the in-memory implementation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::model::{Media, MediaListQuery};
use crate::database::{StoreError, StoreResult};
use crate::ids::MediaId;
use crate::pagination::offset;

#[async_trait]
pub trait MediaStore: Send + Sync + 'static {
    async fn insert(&self, media: Media) -> StoreResult<Media>;

    /// Records for the given ids that exist; absent ids are skipped.
    async fn find_by_ids(&self, ids: &[MediaId]) -> StoreResult<Vec<Media>>;

    /// `true` if a row was removed. Deleting an absent record returns `false`.
    async fn delete_by_id(&self, id: &MediaId) -> StoreResult<bool>;

    /// Newest first, plus the total count.
    async fn list(&self, query: MediaListQuery) -> StoreResult<(Vec<Media>, u64)>;
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryMediaStore {
    media: Arc<RwLock<HashMap<MediaId, Media>>>,
    failing_lookups: Arc<AtomicBool>,
    failing_deletes: Arc<AtomicBool>,
}

impl InMemoryMediaStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail `find_by_ids` (and `list`) until reset.
    pub fn set_failing_lookups(&self, failing: bool) {
        self.failing_lookups.store(failing, Ordering::SeqCst);
    }

    /// Fail `delete_by_id` until reset.
    pub fn set_failing_deletes(&self, failing: bool) {
        self.failing_deletes.store(failing, Ordering::SeqCst);
    }

    pub fn contains(&self, id: &MediaId) -> bool {
        self.media.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.media.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.media.read().is_empty()
    }
}

fn injected(flag: &AtomicBool, operation: &str) -> StoreResult<()> {
    if flag.load(Ordering::SeqCst) {
        return Err(StoreError::unavailable(format!(
            "in-memory media store {operation} (injected)"
        )));
    }
    Ok(())
}

#[async_trait]
impl MediaStore for InMemoryMediaStore {
    async fn insert(&self, media: Media) -> StoreResult<Media> {
        self.media.write().insert(media.id.clone(), media.clone());
        Ok(media)
    }

    async fn find_by_ids(&self, ids: &[MediaId]) -> StoreResult<Vec<Media>> {
        injected(&self.failing_lookups, "lookup")?;
        let media = self.media.read();
        Ok(ids.iter().filter_map(|id| media.get(id).cloned()).collect())
    }

    async fn delete_by_id(&self, id: &MediaId) -> StoreResult<bool> {
        injected(&self.failing_deletes, "delete")?;
        Ok(self.media.write().remove(id).is_some())
    }

    async fn list(&self, query: MediaListQuery) -> StoreResult<(Vec<Media>, u64)> {
        injected(&self.failing_lookups, "list")?;
        let query = query.normalized();
        let mut all: Vec<Media> = self.media.read().values().cloned().collect();
        all.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });

        let total = all.len() as u64;
        let skip = usize::try_from(offset(query.page, query.limit)).unwrap_or(usize::MAX);
        Ok((
            all.into_iter()
                .skip(skip)
                .take(query.limit as usize)
                .collect(),
            total,
        ))
    }
}
