//! Read-through cache over a [`CacheProvider`].
//!
//! The cache is an optimization only: read and write failures are logged and
//! the caller proceeds against the record store. Invalidation results are
//! returned because the producer reports them.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use super::errors::CacheResult;
use super::provider::CacheProvider;
use crate::config::CacheConfig;
use crate::logging::log_cache_invalidation;

#[derive(Debug, Clone)]
pub struct CacheLayer {
    provider: Arc<CacheProvider>,
    detail_ttl: Duration,
    list_ttl: Duration,
}

impl CacheLayer {
    pub fn new(provider: Arc<CacheProvider>, config: &CacheConfig) -> Self {
        Self {
            provider,
            detail_ttl: config.detail_ttl(),
            list_ttl: config.list_ttl(),
        }
    }

    pub fn provider(&self) -> &Arc<CacheProvider> {
        &self.provider
    }

    pub fn detail_ttl(&self) -> Duration {
        self.detail_ttl
    }

    pub fn list_ttl(&self) -> Duration {
        self.list_ttl
    }

    /// Cached value for `key`. Misses, backend errors and entries that no
    /// longer decode as `T` all come back as `None`.
    pub async fn read<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.provider.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(key, error = %e, "Cache read failed, falling back to store");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => {
                debug!(key, "Serving from cache");
                Some(value)
            }
            Err(e) => {
                warn!(key, error = %e, "Discarding undecodable cache entry");
                None
            }
        }
    }

    /// Store `value` under `key`. Failures are logged and swallowed.
    pub async fn write<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let encoded = match serde_json::to_string(value) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(key, error = %e, "Skipping cache write, value did not serialize");
                return;
            }
        };
        if let Err(e) = self.provider.set(key, &encoded, ttl).await {
            warn!(key, error = %e, "Cache write failed");
        }
    }

    /// Serve `key` from the cache, or run `load` and populate the cache with
    /// its result. Loader errors are returned untouched and never cached.
    pub async fn get_or_load<T, E, F, Fut>(&self, key: &str, ttl: Duration, load: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(cached) = self.read(key).await {
            return Ok(cached);
        }
        let value = load().await?;
        self.write(key, &value, ttl).await;
        Ok(value)
    }

    /// Delete one key.
    pub async fn invalidate(&self, key: &str) -> CacheResult<()> {
        let result = self.provider.delete(key).await;
        match &result {
            Ok(()) => log_cache_invalidation("delete", key, "SUCCESS", None),
            Err(e) => log_cache_invalidation("delete", key, "FAILED", Some(&e.to_string())),
        }
        result
    }

    /// Delete every key under `prefix`, returning how many were removed.
    pub async fn invalidate_prefix(&self, prefix: &str) -> CacheResult<u64> {
        let result = self.provider.delete_prefix(prefix).await;
        match &result {
            Ok(count) => log_cache_invalidation(
                "delete_prefix",
                prefix,
                "SUCCESS",
                Some(&format!("{count} keys removed")),
            ),
            Err(e) => {
                log_cache_invalidation("delete_prefix", prefix, "FAILED", Some(&e.to_string()))
            }
        }
        result
    }
}
