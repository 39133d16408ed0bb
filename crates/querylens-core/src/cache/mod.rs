//! Generic TTL + LRU result cache.
//!
//! Entries live in an `IndexMap` ordered by last access: a hit moves the
//! entry to the back, and a new key inserted at capacity evicts the front.
//! Expiry is checked lazily on `get` and eagerly by a periodic sweep task;
//! both only remove entries whose deadline has passed, under the map lock.

mod invalidate;

pub use invalidate::InvalidationGraph;

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use indexmap::IndexMap;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::config::CacheConfig;
use crate::util::{lock, pct};

struct CacheEntry<V> {
    value: V,
    expires: Instant,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now > self.expires
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub max_entries: usize,
    pub evictions: u64,
    pub expirations: u64,
    pub invalidations: u64,
}

impl CacheStats {
    pub fn lookups(&self) -> u64 {
        self.hits + self.misses
    }

    pub fn hit_rate_pct(&self) -> f64 {
        pct(self.hits, self.lookups())
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    invalidations: AtomicU64,
}

pub struct ResultCache<V> {
    map: Mutex<IndexMap<String, CacheEntry<V>>>,
    config: CacheConfig,
    graph: InvalidationGraph,
    counters: Counters,
}

impl<V> ResultCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Cache with the sports namespace graph for cascades.
    pub fn new(config: CacheConfig) -> Self {
        Self::with_graph(config, InvalidationGraph::sports())
    }

    pub fn with_graph(config: CacheConfig, graph: InvalidationGraph) -> Self {
        Self {
            map: Mutex::new(IndexMap::with_capacity(config.max_entries.min(1024))),
            config,
            graph,
            counters: Counters::default(),
        }
    }

    /// Fresh value for `key`, refreshing its LRU position.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut map = lock(&self.map);
        let Some((idx, _, entry)) = map.get_full(key) else {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };
        if entry.is_expired(now) {
            map.shift_remove_index(idx);
            self.counters.expirations.fetch_add(1, Ordering::Relaxed);
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        let value = entry.value.clone();
        let last = map.len() - 1;
        map.move_index(idx, last);
        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        Some(value)
    }

    /// Insert with the default TTL.
    pub fn set(&self, key: impl Into<String>, value: V) {
        self.set_with_ttl(key, value, self.config.default_ttl());
    }

    /// Insert or replace `key`. Replacing resets its deadline; inserting a
    /// new key at capacity evicts the least recently used entry.
    pub fn set_with_ttl(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let key = key.into();
        let entry = CacheEntry {
            value,
            expires: Instant::now() + ttl,
        };
        let mut map = lock(&self.map);
        if let Some(idx) = map.get_index_of(&key) {
            map[idx] = entry;
            let last = map.len() - 1;
            map.move_index(idx, last);
            return;
        }
        if map.len() >= self.config.max_entries
            && let Some((evicted, _)) = map.shift_remove_index(0)
        {
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
            trace!(key = %evicted, "cache entry evicted");
        }
        map.insert(key, entry);
    }

    pub fn delete(&self, key: &str) -> bool {
        lock(&self.map).shift_remove(key).is_some()
    }

    pub fn clear(&self) {
        let mut map = lock(&self.map);
        let removed = map.len();
        map.clear();
        debug!(removed, "cache cleared");
    }

    /// True when `key` holds a fresh value. Does not touch LRU order or counters.
    pub fn has(&self, key: &str) -> bool {
        let now = Instant::now();
        lock(&self.map)
            .get(key)
            .is_some_and(|e| !e.is_expired(now))
    }

    /// Remove keys equal to (`exact`) or containing `pattern`.
    pub fn invalidate_by_pattern(&self, pattern: &str, exact: bool) -> usize {
        let mut map = lock(&self.map);
        let before = map.len();
        map.retain(|k, _| {
            if exact {
                k != pattern
            } else {
                !k.contains(pattern)
            }
        });
        let removed = before - map.len();
        drop(map);
        self.counters
            .invalidations
            .fetch_add(removed as u64, Ordering::Relaxed);
        debug!(pattern, exact, removed, "cache invalidated by pattern");
        removed
    }

    /// Invalidate `namespace` and every namespace that depends on it.
    pub fn invalidate_cascade(&self, namespace: &str) -> usize {
        self.graph
            .cascade(namespace)
            .iter()
            .map(|ns| self.invalidate_by_pattern(ns, false))
            .sum()
    }

    pub fn invalidate_games(&self) -> usize {
        self.invalidate_cascade("games")
    }

    pub fn invalidate_teams(&self) -> usize {
        self.invalidate_cascade("teams")
    }

    pub fn invalidate_leagues(&self) -> usize {
        self.invalidate_cascade("leagues")
    }

    pub fn invalidate_players(&self) -> usize {
        self.invalidate_cascade("players")
    }

    /// Memoize `producer` under a key built from the namespace and the
    /// serialized filters and options. Errors are returned unchanged and
    /// never cached; inputs that fail to serialize bypass the cache.
    pub async fn cache_query<F, Fut, E, Q, O>(
        &self,
        namespace: &str,
        filters: &Q,
        options: &O,
        ttl: Option<Duration>,
        producer: F,
    ) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
        Q: Serialize + ?Sized,
        O: Serialize + ?Sized,
    {
        let key = match query_key(namespace, filters, options) {
            Ok(key) => key,
            Err(e) => {
                debug!(namespace, error = %e, "unserializable cache key, bypassing cache");
                return producer().await;
            }
        };
        if let Some(hit) = self.get(&key) {
            return Ok(hit);
        }
        let value = producer().await?;
        self.set_with_ttl(key, value.clone(), ttl.unwrap_or(self.config.default_ttl()));
        Ok(value)
    }

    /// Remove every expired entry. Returns the number removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut map = lock(&self.map);
        let before = map.len();
        map.retain(|_, e| !e.is_expired(now));
        let removed = before - map.len();
        self.counters
            .expirations
            .fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    /// Start the periodic expiry sweep on the current runtime.
    pub fn spawn_sweeper(self: Arc<Self>) -> JoinHandle<()> {
        let interval = self.config.sweep_interval();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                let removed = self.sweep_expired();
                if removed > 0 {
                    debug!(removed, remaining = self.len(), "cache sweep");
                }
            }
        })
    }

    pub fn len(&self) -> usize {
        lock(&self.map).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            entries: self.len(),
            max_entries: self.config.max_entries,
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            expirations: self.counters.expirations.load(Ordering::Relaxed),
            invalidations: self.counters.invalidations.load(Ordering::Relaxed),
        }
    }
}

fn query_key<Q, O>(namespace: &str, filters: &Q, options: &O) -> Result<String, serde_json::Error>
where
    Q: Serialize + ?Sized,
    O: Serialize + ?Sized,
{
    let filters = serde_json::to_string(filters)?;
    let options = serde_json::to_string(options)?;
    Ok(format!("{namespace}:{filters}:{options}"))
}
