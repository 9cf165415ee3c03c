//! Per-exchange channel memoization keyed by connection generation.
//!
//! Two callers that miss the cache at the same time both open a channel; only
//! one is kept. The loser is handed back so the caller can close it instead of
//! leaking it until the connection drops.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

#[derive(Debug)]
pub struct ChannelCache<T> {
    channels: DashMap<String, (u64, T)>,
}

impl<T> Default for ChannelCache<T> {
    fn default() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }
}

impl<T: Clone> ChannelCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached channel for `exchange` if it belongs to `generation` and
    /// `is_live` still holds.
    pub fn get(&self, exchange: &str, generation: u64, is_live: impl Fn(&T) -> bool) -> Option<T> {
        let entry = self.channels.get(exchange)?;
        let (cached_generation, channel) = entry.value();
        (*cached_generation == generation && is_live(channel)).then(|| channel.clone())
    }

    /// Cache `fresh` unless a live channel of the same generation got there
    /// first. Returns the channel to use and the one to close, if any.
    pub fn memoize(
        &self,
        exchange: &str,
        generation: u64,
        fresh: T,
        is_live: impl Fn(&T) -> bool,
    ) -> (T, Option<T>) {
        match self.channels.entry(exchange.to_string()) {
            Entry::Occupied(mut entry) => {
                let winner = {
                    let (cached_generation, cached) = entry.get();
                    (*cached_generation == generation && is_live(cached)).then(|| cached.clone())
                };
                match winner {
                    Some(winner) => (winner, Some(fresh)),
                    None => {
                        let (_, stale) = entry.insert((generation, fresh.clone()));
                        (fresh, Some(stale))
                    }
                }
            }
            Entry::Vacant(entry) => {
                entry.insert((generation, fresh.clone()));
                (fresh, None)
            }
        }
    }

    /// Drop the entry for `exchange` if it still belongs to `generation`.
    pub fn evict(&self, exchange: &str, generation: u64) {
        self.channels
            .remove_if(exchange, |_, (cached, _)| *cached == generation);
    }

    pub fn clear(&self) {
        self.channels.clear();
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
