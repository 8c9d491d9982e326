//! Response cache for dispatched operations.
//!
//! [`ResponseCache`] is an in-memory LRU + TTL store keyed by
//! [`cache_key`](super::cache_key). It sits in front of backend selection in
//! the [`Dispatcher`](crate::gateway::Dispatcher): a hit returns without
//! touching admission control, retry or any backend.
//!
//! # Eviction
//!
//! - Size-bounded LRU: after every insert, least-recently-read entries are
//!   evicted until both `max_entries` and `max_bytes` hold.
//! - Sliding TTL: an entry is live while `now - last_access <= ttl`. Reads
//!   refresh `last_access`, so hot entries stay alive. Expired entries are
//!   removed lazily on read and swept from the cold end on insert.
//!
//! Values are stored as `serde_json::Value`. A value that no longer
//! deserialises into the type a caller asks for (see
//! [`ResponseCache::get_as`]) is treated as corrupted: it is evicted and the
//! read reports a miss.

use std::time::Duration;

use lru::LruCache;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::time::Instant;
use tracing::debug;

use crate::telemetry;

/// Configuration for the response cache.
///
/// ```rust
/// # use bifrost::cache::CacheConfig;
/// # use std::time::Duration;
/// let config = CacheConfig::new()
///     .max_entries(10_000)
///     .ttl(Duration::from_secs(3600));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Maximum number of cached entries. Default: 10,000.
    pub max_entries: usize,
    /// Aggregate size budget in bytes (JSON-encoded size). Default: 64 MiB.
    pub max_bytes: usize,
    /// Idle time-to-live. Default: 1 hour.
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            max_bytes: 64 * 1024 * 1024,
            ttl: Duration::from_secs(3600),
        }
    }
}

impl CacheConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of cached entries.
    pub fn max_entries(mut self, n: usize) -> Self {
        self.max_entries = n;
        self
    }

    /// Set the aggregate byte budget.
    pub fn max_bytes(mut self, n: usize) -> Self {
        self.max_bytes = n;
        self
    }

    /// Set the time-to-live for cached entries.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

/// Counters describing cache behaviour since creation or the last `clear()`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Entries removed to satisfy the size bounds.
    pub evictions: u64,
    /// Entries removed because their TTL elapsed.
    pub expirations: u64,
    pub entries: usize,
    pub bytes: usize,
}

impl CacheStats {
    /// Hits over total lookups (0.0 before any lookup).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Read-only view of a cached entry.
#[derive(Debug, Clone)]
pub struct CacheEntryInfo {
    pub key: String,
    pub hits: u64,
    pub size: usize,
    pub age: Duration,
    pub idle: Duration,
    pub metadata: Option<Value>,
}

struct Entry {
    value: Value,
    metadata: Option<Value>,
    created_at: Instant,
    last_access: Instant,
    hits: u64,
    size: usize,
}

struct Inner {
    /// Recency order is read order; `set` also counts as a read.
    entries: LruCache<String, Entry>,
    bytes: usize,
    stats: CacheStats,
}

impl Inner {
    fn new() -> Self {
        Self {
            entries: LruCache::unbounded(),
            bytes: 0,
            stats: CacheStats::default(),
        }
    }

    fn remove(&mut self, key: &str) -> Option<Entry> {
        let entry = self.entries.pop(key)?;
        self.bytes -= entry.size;
        Some(entry)
    }

    fn remove_oldest(&mut self) -> bool {
        let Some((_, entry)) = self.entries.pop_lru() else {
            return false;
        };
        self.bytes -= entry.size;
        true
    }

    /// Drop expired entries from the cold end of the LRU order.
    ///
    /// Recency and `last_access` advance together, so the first live entry
    /// found ends the sweep.
    fn sweep_expired(&mut self, now: Instant, ttl: Duration) -> u64 {
        let mut swept = 0;
        while let Some((_, entry)) = self.entries.peek_lru() {
            if now.saturating_duration_since(entry.last_access) <= ttl {
                break;
            }
            self.remove_oldest();
            swept += 1;
        }
        swept
    }
}

/// In-memory LRU + sliding-TTL response cache.
///
/// Safe to share between concurrent callers; all bookkeeping happens under
/// one internal lock.
pub struct ResponseCache {
    inner: Mutex<Inner>,
    config: CacheConfig,
}

impl ResponseCache {
    /// Create a new response cache with the given configuration.
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            inner: Mutex::new(Inner::new()),
            config: config.clone(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Derive the cache key for an operation call.
    pub fn key(&self, operation: &str, args: &[Value], options: &Map<String, Value>) -> String {
        super::cache_key(operation, args, options)
    }

    /// Look up a cached value. Counts a hit or a miss.
    pub fn get(&self, key: &str) -> Option<Value> {
        let value = self.lookup(key);
        self.count(value.is_some());
        value
    }

    /// Look up a cached value and deserialise it.
    ///
    /// An entry that fails to deserialise is evicted and reported as a miss.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let Some(value) = self.lookup(key) else {
            self.count(false);
            return None;
        };
        match serde_json::from_value(value) {
            Ok(typed) => {
                self.count(true);
                Some(typed)
            }
            Err(e) => {
                debug!(key, error = %e, "evicting unreadable cache entry");
                self.invalidate(key);
                self.count(false);
                None
            }
        }
    }

    /// Insert (or replace) a value.
    ///
    /// Evicts least-recently-read entries until the entry count and byte
    /// budget hold. A value larger than the whole byte budget is not stored.
    pub fn set(&self, key: impl Into<String>, value: Value, metadata: Option<Value>) {
        let key = key.into();
        let size = key.len() + encoded_len(&value) + metadata.as_ref().map_or(0, encoded_len);
        let now = Instant::now();

        let mut inner = self.inner.lock();
        inner.remove(&key);
        if size > self.config.max_bytes || self.config.max_entries == 0 {
            debug!(key, size, "value exceeds cache budget, not cached");
            return;
        }

        let expired = inner.sweep_expired(now, self.config.ttl);
        inner.stats.expirations += expired;

        inner.bytes += size;
        inner.entries.put(
            key,
            Entry {
                value,
                metadata,
                created_at: now,
                last_access: now,
                hits: 0,
                size,
            },
        );

        let mut evicted = 0;
        while inner.entries.len() > self.config.max_entries || inner.bytes > self.config.max_bytes {
            if !inner.remove_oldest() {
                break;
            }
            evicted += 1;
        }
        if evicted > 0 {
            inner.stats.evictions += evicted;
            metrics::counter!(telemetry::CACHE_EVICTIONS_TOTAL).increment(evicted);
        }
    }

    /// Remove one entry. Returns whether it was present.
    pub fn invalidate(&self, key: &str) -> bool {
        self.inner.lock().remove(key).is_some()
    }

    /// Remove every entry and reset statistics.
    pub fn clear(&self) {
        *self.inner.lock() = Inner::new();
    }

    /// Whether a live entry exists. Does not refresh recency or count stats.
    pub fn contains(&self, key: &str) -> bool {
        let inner = self.inner.lock();
        inner
            .entries
            .peek(key)
            .is_some_and(|e| Instant::now().saturating_duration_since(e.last_access) <= self.config.ttl)
    }

    /// Inspect an entry without refreshing it.
    pub fn entry_info(&self, key: &str) -> Option<CacheEntryInfo> {
        let now = Instant::now();
        let inner = self.inner.lock();
        inner.entries.peek(key).map(|e| CacheEntryInfo {
            key: key.to_owned(),
            hits: e.hits,
            size: e.size,
            age: now.saturating_duration_since(e.created_at),
            idle: now.saturating_duration_since(e.last_access),
            metadata: e.metadata.clone(),
        })
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            entries: inner.entries.len(),
            bytes: inner.bytes,
            ..inner.stats
        }
    }

    /// Refresh and return a live entry's value without counting stats.
    fn lookup(&self, key: &str) -> Option<Value> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let expired = {
            let entry = inner.entries.peek(key)?;
            now.saturating_duration_since(entry.last_access) > self.config.ttl
        };
        if expired {
            inner.remove(key);
            inner.stats.expirations += 1;
            return None;
        }
        // `get_mut` promotes the entry to most recently used.
        let entry = inner.entries.get_mut(key)?;
        entry.last_access = now;
        entry.hits += 1;
        Some(entry.value.clone())
    }

    fn count(&self, hit: bool) {
        let mut inner = self.inner.lock();
        if hit {
            inner.stats.hits += 1;
            metrics::counter!(telemetry::CACHE_HITS_TOTAL).increment(1);
        } else {
            inner.stats.misses += 1;
            metrics::counter!(telemetry::CACHE_MISSES_TOTAL).increment(1);
        }
    }
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}

fn encoded_len(value: &Value) -> usize {
    serde_json::to_vec(value).map_or(0, |v| v.len())
}
