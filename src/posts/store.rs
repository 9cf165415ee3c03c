//! Post record store contract and the in-memory implementation.

use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::model::{Post, PostFilter, PostListQuery, PostSortField, SortOrder};
use crate::database::{StoreError, StoreResult};
use crate::ids::PostId;
use crate::pagination::offset;

/// System of record for posts.
#[async_trait]
pub trait PostStore: Send + Sync + 'static {
    async fn insert(&self, post: Post) -> StoreResult<Post>;

    async fn find_by_id(&self, id: &PostId) -> StoreResult<Option<Post>>;

    /// `true` if a row was removed. Deleting an absent post returns `false`.
    async fn delete_by_id(&self, id: &PostId) -> StoreResult<bool>;

    /// One page of posts matching `filter`, plus the total match count.
    async fn find(&self, filter: PostFilter, query: PostListQuery)
        -> StoreResult<(Vec<Post>, u64)>;
}

/// Process-local store for tests and development.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPostStore {
    posts: Arc<RwLock<HashMap<PostId, Post>>>,
    failing: Arc<AtomicBool>,
}

impl InMemoryPostStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail with [`StoreError::Unavailable`] until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.posts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.posts.read().is_empty()
    }

    fn check(&self) -> StoreResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("in-memory post store (injected)"));
        }
        Ok(())
    }
}

fn compare(a: &Post, b: &Post, field: PostSortField) -> CmpOrdering {
    let primary = match field {
        PostSortField::CreatedAt => a.created_at.cmp(&b.created_at),
        PostSortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
        PostSortField::Title => a.title.cmp(&b.title),
    };
    primary.then_with(|| a.id.cmp(&b.id))
}

#[async_trait]
impl PostStore for InMemoryPostStore {
    async fn insert(&self, post: Post) -> StoreResult<Post> {
        self.check()?;
        self.posts.write().insert(post.id.clone(), post.clone());
        Ok(post)
    }

    async fn find_by_id(&self, id: &PostId) -> StoreResult<Option<Post>> {
        self.check()?;
        Ok(self.posts.read().get(id).cloned())
    }

    async fn delete_by_id(&self, id: &PostId) -> StoreResult<bool> {
        self.check()?;
        Ok(self.posts.write().remove(id).is_some())
    }

    async fn find(
        &self,
        filter: PostFilter,
        query: PostListQuery,
    ) -> StoreResult<(Vec<Post>, u64)> {
        self.check()?;
        let query = query.normalized();
        let mut matching: Vec<Post> = self
            .posts
            .read()
            .values()
            .filter(|post| filter.matches(post))
            .cloned()
            .collect();

        matching.sort_by(|a, b| {
            let ordering = compare(a, b, query.sort_by);
            match query.sort_order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            }
        });

        let total = matching.len() as u64;
        let skip = usize::try_from(offset(query.page, query.limit)).unwrap_or(usize::MAX);
        let page = matching
            .into_iter()
            .skip(skip)
            .take(query.limit as usize)
            .collect();
        Ok((page, total))
    }
}
