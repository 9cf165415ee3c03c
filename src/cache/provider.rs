//! Cache provider with enum dispatch.
//!
//! Mirrors `BrokerProvider`: one concrete type callers hold, static dispatch
//! to the configured backend. Construction never fails: an unreachable Redis
//! degrades to the no-op backend, and every read then falls through to the
//! record store.

use std::time::Duration;

use tracing::{info, warn};

use super::errors::CacheResult;
use super::providers::{InMemoryCacheService, NoOpCacheService, RedisCacheService};
use super::traits::CacheService;
use crate::config::{redact_url, CacheConfig, CacheProviderKind};

#[derive(Debug, Clone)]
enum CacheBackend {
    /// Boxed to keep the enum small
    Redis(Box<RedisCacheService>),
    Memory(InMemoryCacheService),
    NoOp(NoOpCacheService),
}

impl CacheBackend {
    fn provider_name(&self) -> &'static str {
        match self {
            Self::Redis(s) => s.provider_name(),
            Self::Memory(s) => s.provider_name(),
            Self::NoOp(s) => s.provider_name(),
        }
    }

    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        match self {
            Self::Redis(s) => s.get(key).await,
            Self::Memory(s) => s.get(key).await,
            Self::NoOp(s) => s.get(key).await,
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        match self {
            Self::Redis(s) => s.set(key, value, ttl).await,
            Self::Memory(s) => s.set(key, value, ttl).await,
            Self::NoOp(s) => s.set(key, value, ttl).await,
        }
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        match self {
            Self::Redis(s) => s.delete(key).await,
            Self::Memory(s) => s.delete(key).await,
            Self::NoOp(s) => s.delete(key).await,
        }
    }

    async fn delete_prefix(&self, prefix: &str) -> CacheResult<u64> {
        match self {
            Self::Redis(s) => s.delete_prefix(prefix).await,
            Self::Memory(s) => s.delete_prefix(prefix).await,
            Self::NoOp(s) => s.delete_prefix(prefix).await,
        }
    }

    async fn health_check(&self) -> CacheResult<bool> {
        match self {
            Self::Redis(s) => s.health_check().await,
            Self::Memory(s) => s.health_check().await,
            Self::NoOp(s) => s.health_check().await,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheProvider {
    backend: CacheBackend,
}

impl CacheProvider {
    /// Build the configured backend, falling back to no-op if Redis cannot be
    /// reached. The process never fails to start because of the cache.
    pub async fn from_config(config: &CacheConfig) -> Self {
        let backend = match config.provider {
            CacheProviderKind::Redis => match RedisCacheService::from_config(config).await {
                Ok(service) => {
                    info!(
                        backend = "redis",
                        url = %redact_url(&config.url),
                        "Cache provider initialized"
                    );
                    CacheBackend::Redis(Box::new(service))
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        url = %redact_url(&config.url),
                        "Failed to connect to Redis, falling back to NoOp cache"
                    );
                    CacheBackend::NoOp(NoOpCacheService::new())
                }
            },
            CacheProviderKind::Memory => {
                info!(backend = "memory", "Cache provider initialized");
                CacheBackend::Memory(InMemoryCacheService::new())
            }
            CacheProviderKind::Noop => {
                info!("Cache disabled by configuration");
                CacheBackend::NoOp(NoOpCacheService::new())
            }
        };
        Self { backend }
    }

    /// Wrap an existing in-memory cache; tests keep the handle to inspect it.
    pub fn memory(service: InMemoryCacheService) -> Self {
        Self {
            backend: CacheBackend::Memory(service),
        }
    }

    pub fn noop() -> Self {
        Self {
            backend: CacheBackend::NoOp(NoOpCacheService::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self.backend, CacheBackend::NoOp(_))
    }

    pub fn provider_name(&self) -> &'static str {
        self.backend.provider_name()
    }

    pub async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        self.backend.get(key).await
    }

    pub async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        self.backend.set(key, value, ttl).await
    }

    pub async fn delete(&self, key: &str) -> CacheResult<()> {
        self.backend.delete(key).await
    }

    pub async fn delete_prefix(&self, prefix: &str) -> CacheResult<u64> {
        self.backend.delete_prefix(prefix).await
    }

    pub async fn health_check(&self) -> CacheResult<bool> {
        self.backend.health_check().await
    }
}
