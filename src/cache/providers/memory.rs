//! In-process cache provider.
//!
//! Per-entry expiry on the tokio clock, so paused-time tests can advance past
//! a TTL deterministically. Expired entries are dropped when read, and every
//! [`SWEEP_INTERVAL`] writes a sweep removes the rest, so keys that are never
//! read again do not pile up. Not shared between processes; intended for
//! tests and single-instance development setups.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::debug;

use crate::cache::errors::{CacheError, CacheResult};
use crate::cache::traits::CacheService;

/// Writes between sweeps of expired entries.
pub const SWEEP_INTERVAL: u64 = 64;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Cheap to clone; clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCacheService {
    entries: Arc<DashMap<String, Entry>>,
    writes: Arc<AtomicU64>,
    failing: Arc<AtomicBool>,
}

impl InMemoryCacheService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail with a backend error until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| e.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries held, including expired ones not yet swept.
    pub fn stored_len(&self) -> usize {
        self.entries.len()
    }

    /// Remove every expired entry; returns how many went.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live(now));
        let swept = before.saturating_sub(self.entries.len());
        if swept > 0 {
            debug!(swept, "Swept expired cache entries (memory)");
        }
        swept
    }

    /// Live keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.is_live(now))
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        keys
    }

    fn check(&self, operation: &str) -> CacheResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CacheError::Backend(format!(
                "in-memory cache {operation} failed (injected)"
            )));
        }
        Ok(())
    }
}

impl CacheService for InMemoryCacheService {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        self.check("GET")?;
        let now = Instant::now();
        let value = match self.entries.get(key) {
            Some(entry) if entry.is_live(now) => Some(entry.value.clone()),
            Some(_) => None,
            None => return Ok(None),
        };
        if value.is_none() {
            self.entries.remove_if(key, |_, entry| !entry.is_live(now));
        }
        debug!(key, hit = value.is_some(), "Cache GET (memory)");
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        self.check("SET")?;
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        if (self.writes.fetch_add(1, Ordering::Relaxed) + 1) % SWEEP_INTERVAL == 0 {
            self.sweep_expired();
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.check("DEL")?;
        self.entries.remove(key);
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> CacheResult<u64> {
        self.check("DEL prefix")?;
        let now = Instant::now();
        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| e.key().clone())
            .collect();

        let mut deleted = 0;
        for key in keys {
            if let Some((_, entry)) = self.entries.remove(&key) {
                if entry.is_live(now) {
                    deleted += 1;
                }
            }
        }
        debug!(prefix, deleted, "Cache prefix DEL (memory)");
        Ok(deleted)
    }

    async fn health_check(&self) -> CacheResult<bool> {
        Ok(!self.failing.load(Ordering::SeqCst))
    }

    fn provider_name(&self) -> &'static str {
        "memory"
    }
}
