//! Cache service trait definition.

use std::future::Future;
use std::time::Duration;

use super::errors::CacheResult;

/// Key-value store with per-key expiry, used as a read-through cache.
///
/// Absence is always a valid answer: callers fall back to the system of
/// record on a miss or on any error.
pub trait CacheService: Send + Sync {
    /// `Ok(Some(value))` on hit, `Ok(None)` on miss or expiry.
    fn get(&self, key: &str) -> impl Future<Output = CacheResult<Option<String>>> + Send;

    /// Unconditional overwrite with a time-to-live.
    fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> impl Future<Output = CacheResult<()>> + Send;

    /// Delete one key. Deleting an absent key succeeds.
    fn delete(&self, key: &str) -> impl Future<Output = CacheResult<()>> + Send;

    /// Delete every key starting with `prefix` in one batch. Returns the
    /// number of keys removed.
    fn delete_prefix(&self, prefix: &str) -> impl Future<Output = CacheResult<u64>> + Send;

    fn health_check(&self) -> impl Future<Output = CacheResult<bool>> + Send;

    fn provider_name(&self) -> &'static str;
}
