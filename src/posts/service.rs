//! Post service: record mutations with synchronous cache invalidation and
//! event emission.
//!
//! ## Deletion protocol
//!
//! ```text
//!  find_by_id ── absent / not owner ──► NotFound (nothing else happens)
//!      │
//!  delete_by_id ── false ──► NotFound (lost a race with another delete)
//!      │
//!  invalidate post:{id}   ┐ both attempted, failures logged and reported
//!  invalidate posts:*     ┘
//!      │
//!  publish post.deleted { postId, userId, mediaIds }
//!      │
//!  DeletionReport (publish failure is data, not an error)
//! ```

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use super::errors::{PostError, PostResult};
use super::model::{NewPost, Post, PostFilter, PostListQuery, PostPage};
use super::publisher::PostEventPublisher;
use super::store::PostStore;
use crate::cache::{detail_key, list_key, list_prefix, CacheLayer};
use crate::events::{PostDeletedEvent, PostEvent};
use crate::ids::{CallerIdentity, MediaId, PostId};
use crate::pagination::Pagination;

const RESOURCE: &str = "post";

/// Outcome of one best-effort step after the store mutation committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    Failed { error: String },
}

impl StepStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    fn from_result<T, E: std::fmt::Display>(result: &Result<T, E>) -> Self {
        match result {
            Ok(_) => Self::Succeeded,
            Err(e) => Self::Failed {
                error: e.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvalidationReport {
    pub detail: StepStatus,
    pub lists: StepStatus,
    pub list_keys_removed: u64,
}

impl InvalidationReport {
    pub fn is_complete(&self) -> bool {
        self.detail.is_success() && self.lists.is_success()
    }
}

/// What happened after a post was deleted from the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeletionReport {
    pub post_id: PostId,
    /// Media the consumer was asked to reclaim
    pub media_ids: Vec<MediaId>,
    pub invalidation: InvalidationReport,
    pub publish: StepStatus,
}

impl DeletionReport {
    /// Caches invalidated and event published.
    pub fn is_fully_propagated(&self) -> bool {
        self.invalidation.is_complete() && self.publish.is_success()
    }
}

#[derive(Clone)]
pub struct PostService {
    store: Arc<dyn PostStore>,
    cache: CacheLayer,
    publisher: PostEventPublisher,
}

impl std::fmt::Debug for PostService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostService")
            .field("cache", &self.cache.provider().provider_name())
            .field("exchange", &self.publisher.exchange())
            .finish()
    }
}

impl PostService {
    pub fn new(store: Arc<dyn PostStore>, cache: CacheLayer, publisher: PostEventPublisher) -> Self {
        Self {
            store,
            cache,
            publisher,
        }
    }

    /// Store a new post owned by the caller and drop every cached listing.
    pub async fn create_post(&self, caller: &CallerIdentity, new_post: NewPost) -> PostResult<Post> {
        let post = self.store.insert(new_post.into_post(caller.user_id.clone())).await?;
        info!(post_id = %post.id, user_id = %caller.user_id, "Post created");

        if let Err(e) = self.cache.invalidate_prefix(&list_prefix(RESOURCE)).await {
            warn!(post_id = %post.id, error = %e, "List invalidation after create failed");
        }
        Ok(post)
    }

    /// Read-through on the detail key.
    pub async fn get_post(&self, post_id: &PostId) -> PostResult<Post> {
        let key = detail_key(RESOURCE, post_id);
        if let Some(post) = self.cache.read::<Post>(&key).await {
            return Ok(post);
        }

        let post = self
            .store
            .find_by_id(post_id)
            .await?
            .ok_or_else(|| PostError::not_found(post_id))?;
        self.cache.write(&key, &post, self.cache.detail_ttl()).await;
        Ok(post)
    }

    /// Read-through on the list key for the normalized query.
    pub async fn list_posts(&self, query: PostListQuery) -> PostResult<PostPage> {
        let query = query.normalized();
        let key = list_key(
            RESOURCE,
            query.page,
            query.limit,
            query.sort_by,
            query.sort_order,
        );
        self.cache
            .get_or_load(&key, self.cache.list_ttl(), || {
                self.load_page(PostFilter::all(), query)
            })
            .await
    }

    /// The caller's own posts, always from the store.
    pub async fn list_posts_by_user(
        &self,
        caller: &CallerIdentity,
        query: PostListQuery,
    ) -> PostResult<PostPage> {
        self.load_page(PostFilter::owned_by(caller.user_id.clone()), query.normalized())
            .await
    }

    async fn load_page(&self, filter: PostFilter, query: PostListQuery) -> PostResult<PostPage> {
        let (posts, total) = self.store.find(filter, query).await?;
        Ok(PostPage {
            posts,
            pagination: Pagination::new(query.page, query.limit, total),
        })
    }

    /// Delete a post owned by the caller, invalidate its cache entries and
    /// announce the deletion so its media get reclaimed.
    ///
    /// Errors only if nothing was deleted. Once the store delete commits,
    /// invalidation and publish failures are reported in the
    /// [`DeletionReport`] and never roll the deletion back.
    pub async fn delete_post(
        &self,
        caller: &CallerIdentity,
        post_id: &PostId,
    ) -> PostResult<DeletionReport> {
        let existing = match self.store.find_by_id(post_id).await? {
            Some(post) if post.user_id == caller.user_id => post,
            _ => {
                warn!(
                    post_id = %post_id,
                    user_id = %caller.user_id,
                    "Post not found or caller not authorized to delete it"
                );
                return Err(PostError::not_found(post_id));
            }
        };

        if !self.store.delete_by_id(post_id).await? {
            warn!(post_id = %post_id, "Post vanished before delete; skipping propagation");
            return Err(PostError::not_found(post_id));
        }

        let invalidation = self.invalidate(post_id).await;

        let event = PostEvent::Deleted(PostDeletedEvent {
            post_id: post_id.clone(),
            user_id: caller.user_id.clone(),
            media_ids: existing.media_ids.clone(),
        });
        let publish = StepStatus::from_result(&self.publisher.publish(&event).await);

        let report = DeletionReport {
            post_id: post_id.clone(),
            media_ids: existing.media_ids,
            invalidation,
            publish,
        };
        info!(
            post_id = %post_id,
            media_count = report.media_ids.len(),
            caches_invalidated = report.invalidation.is_complete(),
            event_published = report.publish.is_success(),
            "Post deleted"
        );
        Ok(report)
    }

    async fn invalidate(&self, post_id: &PostId) -> InvalidationReport {
        let detail = self.cache.invalidate(&detail_key(RESOURCE, post_id)).await;
        let lists = self.cache.invalidate_prefix(&list_prefix(RESOURCE)).await;
        InvalidationReport {
            detail: StepStatus::from_result(&detail),
            list_keys_removed: *lists.as_ref().unwrap_or(&0),
            lists: StepStatus::from_result(&lists),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheProvider, InMemoryCacheService};
    use crate::config::{BrokerConfig, CacheConfig};
    use crate::ids::UserId;
    use crate::messaging::{BrokerProvider, InMemoryBrokerServer};
    use crate::posts::store::InMemoryPostStore;

    struct Fixture {
        service: PostService,
        store: InMemoryPostStore,
        cache: InMemoryCacheService,
        server: InMemoryBrokerServer,
    }

    fn fixture() -> Fixture {
        let store = InMemoryPostStore::new();
        let cache = InMemoryCacheService::new();
        let server = InMemoryBrokerServer::new();
        let config = BrokerConfig::default();
        let broker = Arc::new(BrokerProvider::in_memory(&server, &config));
        let service = PostService::new(
            Arc::new(store.clone()),
            CacheLayer::new(
                Arc::new(CacheProvider::memory(cache.clone())),
                &CacheConfig::default(),
            ),
            PostEventPublisher::new(broker, &config),
        );
        Fixture {
            service,
            store,
            cache,
            server,
        }
    }

    fn new_post(title: &str) -> NewPost {
        NewPost {
            title: title.to_string(),
            content: "content".to_string(),
            media_ids: vec![MediaId::new()],
        }
    }

    #[tokio::test]
    async fn get_post_populates_detail_key() {
        let f = fixture();
        let caller = CallerIdentity::new(UserId::new());
        let post = f.service.create_post(&caller, new_post("a")).await.unwrap();

        assert_eq!(f.service.get_post(&post.id).await.unwrap(), post);
        assert_eq!(f.cache.keys(), vec![format!("post:{}", post.id)]);

        // Served from cache even once the store is unavailable
        f.store.set_failing(true);
        assert_eq!(f.service.get_post(&post.id).await.unwrap(), post);
    }

    #[tokio::test]
    async fn missing_post_is_not_cached() {
        let f = fixture();
        let err = f.service.get_post(&PostId::new()).await.unwrap_err();
        assert!(matches!(err, PostError::NotFound { .. }));
        assert!(f.cache.is_empty());
    }

    #[tokio::test]
    async fn create_drops_cached_listings() {
        let f = fixture();
        let caller = CallerIdentity::new(UserId::new());
        f.service.create_post(&caller, new_post("a")).await.unwrap();

        let page = f.service.list_posts(PostListQuery::default()).await.unwrap();
        assert_eq!(page.pagination.total, 1);
        assert_eq!(f.cache.keys(), vec!["posts:1:10:createdAt:desc".to_string()]);

        f.service.create_post(&caller, new_post("b")).await.unwrap();
        assert!(f.cache.is_empty());
        let page = f.service.list_posts(PostListQuery::default()).await.unwrap();
        assert_eq!(page.pagination.total, 2);
    }

    #[tokio::test]
    async fn per_user_listing_is_uncached_and_scoped() {
        let f = fixture();
        let alice = CallerIdentity::new(UserId::new());
        let bob = CallerIdentity::new(UserId::new());
        f.service.create_post(&alice, new_post("a")).await.unwrap();
        f.service.create_post(&bob, new_post("b")).await.unwrap();

        let page = f
            .service
            .list_posts_by_user(&alice, PostListQuery::default())
            .await
            .unwrap();
        assert_eq!(page.posts.len(), 1);
        assert_eq!(page.posts[0].user_id, alice.user_id);
        assert!(f.cache.is_empty());
    }

    #[tokio::test]
    async fn delete_by_non_owner_is_not_found_and_has_no_effects() {
        let f = fixture();
        let owner = CallerIdentity::new(UserId::new());
        let post = f.service.create_post(&owner, new_post("a")).await.unwrap();
        f.service.get_post(&post.id).await.unwrap();

        let stranger = CallerIdentity::new(UserId::new());
        let err = f.service.delete_post(&stranger, &post.id).await.unwrap_err();
        assert!(matches!(err, PostError::NotFound { .. }));
        assert_eq!(f.store.len(), 1);
        assert_eq!(f.cache.len(), 1);
        assert_eq!(f.server.stats().published, 0);
    }

    #[tokio::test]
    async fn store_failure_aborts_before_invalidation() {
        let f = fixture();
        let owner = CallerIdentity::new(UserId::new());
        let post = f.service.create_post(&owner, new_post("a")).await.unwrap();
        f.service.get_post(&post.id).await.unwrap();

        f.store.set_failing(true);
        let err = f.service.delete_post(&owner, &post.id).await.unwrap_err();
        assert!(matches!(err, PostError::Store(_)));
        assert_eq!(f.cache.len(), 1);
        assert_eq!(f.server.stats().published, 0);
    }

    #[tokio::test]
    async fn delete_invalidates_and_publishes() {
        let f = fixture();
        let owner = CallerIdentity::new(UserId::new());
        let post = f.service.create_post(&owner, new_post("a")).await.unwrap();
        f.service.get_post(&post.id).await.unwrap();
        f.service.list_posts(PostListQuery::default()).await.unwrap();
        f.service
            .list_posts(PostListQuery {
                page: 2,
                ..PostListQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(f.cache.len(), 3);

        let report = f.service.delete_post(&owner, &post.id).await.unwrap();
        assert!(report.is_fully_propagated());
        assert_eq!(report.invalidation.list_keys_removed, 2);
        assert_eq!(report.media_ids, post.media_ids);
        assert!(f.cache.is_empty());
        assert!(f.store.is_empty());
        assert_eq!(f.server.stats().published, 1);
    }

    #[tokio::test]
    async fn cache_failure_still_publishes() {
        let f = fixture();
        let owner = CallerIdentity::new(UserId::new());
        let post = f.service.create_post(&owner, new_post("a")).await.unwrap();

        f.cache.set_failing(true);
        let report = f.service.delete_post(&owner, &post.id).await.unwrap();
        assert!(!report.invalidation.detail.is_success());
        assert!(!report.invalidation.lists.is_success());
        assert!(report.publish.is_success());
        assert_eq!(f.server.stats().published, 1);
    }

    #[tokio::test]
    async fn publish_failure_is_reported_not_raised() {
        let f = fixture();
        let owner = CallerIdentity::new(UserId::new());
        let post = f.service.create_post(&owner, new_post("a")).await.unwrap();

        f.server.set_available(false);
        let report = f.service.delete_post(&owner, &post.id).await.unwrap();
        assert!(report.invalidation.is_complete());
        assert!(matches!(report.publish, StepStatus::Failed { .. }));
        assert!(f.store.is_empty());
    }
}
