//! Shared wiring for integration tests: one in-memory broker server, a post
//! service producing onto it and a media worker consuming from it.

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use coherence_core::cache::{CacheLayer, CacheProvider, InMemoryCacheService};
use coherence_core::config::{BrokerConfig, CacheConfig, MediaWorkerConfig};
use coherence_core::media::{
    InMemoryMediaStore, InMemoryObjectStore, Media, MediaCleanup, MediaCleanupWorker, MediaService,
    NewMedia,
};
use coherence_core::messaging::{
    BrokerProvider, InMemoryBroker, InMemoryBrokerServer, ReconnectBackoff,
};
use coherence_core::posts::{InMemoryPostStore, NewPost, Post, PostEventPublisher, PostService};
use coherence_core::{CallerIdentity, MediaId, UserId};

pub const RECONNECT_DELAY: Duration = Duration::from_millis(20);

pub struct Harness {
    pub server: InMemoryBrokerServer,
    pub broker_config: BrokerConfig,
    pub posts: PostService,
    pub post_store: InMemoryPostStore,
    pub cache: InMemoryCacheService,
    pub media: MediaService,
    pub media_store: InMemoryMediaStore,
    pub objects: InMemoryObjectStore,
    pub owner: CallerIdentity,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_cache_config(CacheConfig::default())
    }

    pub fn with_cache_config(cache_config: CacheConfig) -> Self {
        let server = InMemoryBrokerServer::new();
        let broker_config = BrokerConfig::default();

        let post_store = InMemoryPostStore::new();
        let cache = InMemoryCacheService::new();
        let posts = PostService::new(
            Arc::new(post_store.clone()),
            CacheLayer::new(
                Arc::new(CacheProvider::memory(cache.clone())),
                &cache_config,
            ),
            PostEventPublisher::new(client(&server), &broker_config),
        );

        let media_store = InMemoryMediaStore::new();
        let objects = InMemoryObjectStore::new();
        let media = MediaService::new(Arc::new(media_store.clone()), Arc::new(objects.clone()));

        Self {
            server,
            broker_config,
            posts,
            post_store,
            cache,
            media,
            media_store,
            objects,
            owner: CallerIdentity::new(UserId::new()),
        }
    }

    /// A media worker on its own broker client, sharing this harness' stores.
    pub fn worker(&self) -> (MediaCleanupWorker, Arc<BrokerProvider>) {
        self.worker_with(MediaWorkerConfig::default())
    }

    pub fn worker_with(&self, config: MediaWorkerConfig) -> (MediaCleanupWorker, Arc<BrokerProvider>) {
        let broker = client(&self.server);
        let cleanup = MediaCleanup::new(
            Arc::new(self.media_store.clone()),
            Arc::new(self.objects.clone()),
        );
        let worker = MediaCleanupWorker::new(
            broker.clone(),
            cleanup,
            &config,
            ReconnectBackoff::fixed(RECONNECT_DELAY),
        );
        (worker, broker)
    }

    pub async fn upload(&self, public_id: &str) -> Media {
        self.media
            .register(
                &self.owner,
                NewMedia {
                    public_id: public_id.to_string(),
                    original_name: format!("{public_id}.jpg"),
                    mime_type: "jpg".to_string(),
                    url: format!("memory://{public_id}"),
                },
                public_id.as_bytes().to_vec(),
            )
            .await
            .unwrap()
    }

    pub async fn post_with(&self, title: &str, media_ids: Vec<MediaId>) -> Post {
        self.posts
            .create_post(
                &self.owner,
                NewPost {
                    title: title.to_string(),
                    content: format!("{title} content"),
                    media_ids,
                },
            )
            .await
            .unwrap()
    }
}

/// An in-memory broker client on `server` with a short fixed reconnect delay.
pub fn client(server: &InMemoryBrokerServer) -> Arc<BrokerProvider> {
    Arc::new(BrokerProvider::InMemory(InMemoryBroker::with_backoff(
        server.clone(),
        ReconnectBackoff::fixed(RECONNECT_DELAY),
    )))
}

/// Poll `condition` until it holds, failing the test after five seconds.
pub async fn eventually<F>(what: &str, mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Like [`eventually`] for async checks.
pub async fn eventually_async<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
