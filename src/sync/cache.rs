//! Short-lived read cache keyed by opaque strings.
//!
//! An entry is visible while `now - captured_at <= ttl`. Expired entries are
//! logically absent even before a sweep removes them.
//!
//! Prefix invalidations and clears advance an epoch. A reader that fetched
//! outside the cache lock stores its result with [`ReadCache::set_if_current`]
//! so rows fetched before an invalidation are never cached after it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::core::{TimeSource, WallClock};

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_millis(300_000);

#[derive(Clone, Debug)]
struct CacheEntry<V> {
    value: V,
    captured_at: WallClock,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: WallClock, ttl: Duration) -> bool {
        now.since(self.captured_at) > ttl
    }
}

/// Hit/miss counters since construction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    /// Entries dropped for age, by `get` or `sweep`.
    pub expired: u64,
}

impl CacheMetrics {
    /// Hit rate in `0.0..=1.0`; zero before the first lookup.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

pub struct ReadCache<V> {
    ttl: Duration,
    clock: Arc<dyn TimeSource>,
    entries: HashMap<String, CacheEntry<V>>,
    metrics: CacheMetrics,
    epochs: HashMap<String, u64>,
    clears: u64,
}

impl<V: Clone> ReadCache<V> {
    pub fn new(ttl: Duration, clock: Arc<dyn TimeSource>) -> Self {
        Self {
            ttl,
            clock,
            entries: HashMap::new(),
            metrics: CacheMetrics::default(),
            epochs: HashMap::new(),
            clears: 0,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Stores `value` captured now, replacing any entry under `key`.
    pub fn set(&mut self, key: impl Into<String>, value: V) {
        let captured_at = self.clock.now();
        self.entries
            .insert(key.into(), CacheEntry { value, captured_at });
    }

    /// Stores `value` only if nothing under `prefix` was invalidated since
    /// `epoch` was read. Returns whether it was stored.
    pub fn set_if_current(
        &mut self,
        key: impl Into<String>,
        value: V,
        prefix: &str,
        epoch: u64,
    ) -> bool {
        if self.epoch(prefix) != epoch {
            return false;
        }
        self.set(key, value);
        true
    }

    /// Invalidation epoch for keys under `prefix`.
    pub fn epoch(&self, prefix: &str) -> u64 {
        self.clears + self.epochs.get(prefix).copied().unwrap_or(0)
    }

    /// Returns the value under `key` if it is still within the TTL. An
    /// expired entry is removed on the way out.
    pub fn get(&mut self, key: &str) -> Option<V> {
        let now = self.clock.now();
        let expired = match self.entries.get(key) {
            None => {
                self.metrics.misses += 1;
                return None;
            }
            Some(entry) => entry.is_expired(now, self.ttl),
        };
        if expired {
            self.entries.remove(key);
            self.metrics.misses += 1;
            self.metrics.expired += 1;
            return None;
        }
        self.metrics.hits += 1;
        self.entries.get(key).map(|entry| entry.value.clone())
    }

    pub fn invalidate(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Drops every entry whose key starts with `prefix`; returns how many.
    pub fn invalidate_prefix(&mut self, prefix: &str) -> usize {
        *self.epochs.entry(prefix.to_string()).or_default() += 1;
        let before = self.entries.len();
        self.entries.retain(|key, _| !key.starts_with(prefix));
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.clears += 1;
        self.entries.clear();
    }

    /// Removes every entry `get` would report absent; returns how many.
    pub fn sweep(&mut self) -> usize {
        let now = self.clock.now();
        let ttl = self.ttl;
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now, ttl));
        let evicted = before - self.entries.len();
        self.metrics.expired += evicted as u64;
        if evicted > 0 {
            tracing::debug!(evicted, remaining = self.entries.len(), "cache swept");
        }
        evicted
    }

    /// Physically stored entries, expired or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn metrics(&self) -> CacheMetrics {
        self.metrics
    }
}
