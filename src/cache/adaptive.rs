// Adaptive cache - hybrid LRU/LFU eviction with optional TTL
// Author: kelexine (https://github.com/kelexine)

use crate::cache::models::{CacheConfig, CacheStats};
use parking_lot::Mutex;
use std::borrow::Borrow;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Eviction score blending frequency (LFU) and recency (LRU).
///
/// Lower scores are evicted first.
pub fn eviction_score(hit_count: u64, age_minutes: f64, frequency_weight: f64, time_weight: f64) -> f64 {
    (hit_count as f64 * frequency_weight) / (1.0 + age_minutes.max(0.0) * time_weight)
}

struct CacheEntry<V> {
    value: V,
    last_access: Instant,
    hit_count: u64,
    /// Insertion sequence, used to keep eviction order stable on equal scores.
    seq: u64,
}

struct CacheState<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    next_seq: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// Key/value store bounded by `max_size` with score-based bulk cleanup.
///
/// All operations take `&self`; the map lives behind a short critical
/// section that is never held across an `.await`.
pub struct AdaptiveCache<K, V> {
    name: &'static str,
    config: CacheConfig,
    state: Mutex<CacheState<K, V>>,
}

impl<K, V> AdaptiveCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create a cache; `name` labels its log lines and metrics.
    pub fn new(name: &'static str, config: CacheConfig) -> Self {
        Self {
            name,
            config: config.normalized(),
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                next_seq: 0,
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn ttl(&self) -> Option<Duration> {
        self.config.ttl_seconds.map(Duration::from_secs)
    }

    fn is_expired(&self, entry: &CacheEntry<V>, now: Instant) -> bool {
        self.ttl()
            .map(|ttl| now.saturating_duration_since(entry.last_access) > ttl)
            .unwrap_or(false)
    }

    /// Look up a value, refreshing its recency and frequency.
    ///
    /// Expired entries are removed and reported as absent.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = Instant::now();
        let mut state = self.state.lock();

        let expired = state
            .entries
            .get(key)
            .map(|entry| self.is_expired(entry, now));
        let Some(expired) = expired else {
            state.misses += 1;
            drop(state);
            crate::metrics::record_cache_operation(self.name, "miss");
            return None;
        };

        if expired {
            state.entries.remove(key);
            state.misses += 1;
            state.evictions += 1;
            drop(state);
            debug!(cache = self.name, "Entry expired on access");
            crate::metrics::record_cache_operation(self.name, "expired");
            return None;
        }

        state.hits += 1;
        let value = state.entries.get_mut(key).map(|entry| {
            entry.last_access = now;
            entry.hit_count += 1;
            entry.value.clone()
        });
        drop(state);
        crate::metrics::record_cache_operation(self.name, "hit");
        value
    }

    /// Insert or replace a value.
    ///
    /// A cleanup pass runs before inserting a new key when the cache is at or
    /// above its threshold. Updating an existing key never triggers cleanup.
    pub fn set(&self, key: K, value: V) {
        let now = Instant::now();
        let mut state = self.state.lock();

        if let Some(entry) = state.entries.get_mut(&key) {
            entry.value = value;
            entry.last_access = now;
            return;
        }

        let threshold = self.config.max_size as f64 * self.config.cleanup_threshold;
        if state.entries.len() as f64 >= threshold {
            self.cleanup(&mut state, now);
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        state.entries.insert(
            key,
            CacheEntry {
                value,
                last_access: now,
                hit_count: 1,
                seq,
            },
        );
    }

    /// Whether a live (non-expired) entry exists. Does not count as an access.
    pub fn has<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = Instant::now();
        let mut state = self.state.lock();
        let expired = state
            .entries
            .get(key)
            .map(|entry| self.is_expired(entry, now));
        match expired {
            Some(true) => {
                state.entries.remove(key);
                state.evictions += 1;
                false
            }
            Some(false) => true,
            None => false,
        }
    }

    /// Read a live value without touching recency, frequency or hit counters.
    pub fn peek<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = Instant::now();
        let state = self.state.lock();
        state
            .entries
            .get(key)
            .filter(|entry| !self.is_expired(entry, now))
            .map(|entry| entry.value.clone())
    }

    pub fn delete<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.state.lock().entries.remove(key).is_some()
    }

    pub fn clear(&self) {
        self.state.lock().entries.clear();
        debug!(cache = self.name, "Cache cleared");
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        let lookups = state.hits + state.misses;
        CacheStats {
            size: state.entries.len(),
            max_size: self.config.max_size,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                state.hits as f64 / lookups as f64
            },
            total_hits: state.entries.values().map(|e| e.hit_count).sum(),
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
        }
    }

    /// Drop expired entries, then the lowest-scoring `ceil(len * cleanup_ratio)`.
    fn cleanup(&self, state: &mut CacheState<K, V>, now: Instant) {
        let before = state.entries.len();
        if let Some(ttl) = self.ttl() {
            state
                .entries
                .retain(|_, entry| now.saturating_duration_since(entry.last_access) <= ttl);
        }

        let threshold = self.config.max_size as f64 * self.config.cleanup_threshold;
        let len = state.entries.len();
        if len > 0 && len as f64 >= threshold {
            let count = ((len as f64 * self.config.cleanup_ratio).ceil() as usize).clamp(1, len);
            for key in self.eviction_order(state, now).into_iter().take(count) {
                state.entries.remove(&key);
            }
        }

        let removed = before - state.entries.len();
        state.evictions += removed as u64;
        debug!(
            cache = self.name,
            removed,
            remaining = state.entries.len(),
            "Cache cleanup complete"
        );
        crate::metrics::record_cache_evictions(self.name, removed);
    }

    /// Keys sorted ascending by score; equal scores keep insertion order.
    fn eviction_order(&self, state: &CacheState<K, V>, now: Instant) -> Vec<K> {
        let mut scored: Vec<(f64, u64, &K)> = state
            .entries
            .iter()
            .map(|(key, entry)| {
                let age_minutes = now.saturating_duration_since(entry.last_access).as_secs_f64() / 60.0;
                let score = eviction_score(
                    entry.hit_count,
                    age_minutes,
                    self.config.frequency_weight,
                    self.config.time_weight,
                );
                (score, entry.seq, key)
            })
            .collect();

        scored.sort_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(Ordering::Equal)
                .then(a.1.cmp(&b.1))
        });
        scored.into_iter().map(|(_, _, key)| key.clone()).collect()
    }
}
