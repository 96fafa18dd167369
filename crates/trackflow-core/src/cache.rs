//! Time-bounded memoization for query results.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cached value
#[derive(Debug)]
struct Entry<V> {
    value: Arc<V>,
    created_at: Instant,
    last_accessed: RwLock<Instant>,
    access_count: AtomicU64,
}

impl<V> Entry<V> {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.created_at.elapsed() > ttl
    }

    fn touch(&self) {
        *self.last_accessed.write() = Instant::now();
        self.access_count.fetch_add(1, Ordering::Relaxed);
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub inserts: u64,
    pub evictions: u64,
    pub expired_evictions: u64,
}

/// Key/value cache whose entries expire a fixed time after insertion.
///
/// Expiry is by age only; reads never extend an entry's life. Concurrent
/// misses on the same key are not coalesced.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    entries: RwLock<HashMap<K, Entry<V>>>,
    ttl: Duration,
    max_entries: usize,
    stats: RwLock<CacheStats>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self::with_capacity(ttl, 1024)
    }

    pub fn with_capacity(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            max_entries: max_entries.max(1),
            stats: RwLock::new(CacheStats::default()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fresh value for `key`, if any. Expired entries are dropped on sight.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        let entries = self.entries.read();
        if let Some(entry) = entries.get(key) {
            if entry.is_expired(self.ttl) {
                drop(entries);
                let removed = self.remove_if_expired(key);
                let mut stats = self.stats.write();
                stats.misses += 1;
                if removed {
                    stats.expired_evictions += 1;
                }
                return None;
            }
            entry.touch();
            let value = Arc::clone(&entry.value);
            drop(entries);
            self.stats.write().hits += 1;
            return Some(value);
        }
        drop(entries);
        self.stats.write().misses += 1;
        None
    }

    /// Drop `key` only if the entry stored now is expired. Another caller may
    /// have replaced it since the expiry was observed under the read lock.
    fn remove_if_expired(&self, key: &K) -> bool {
        let mut entries = self.entries.write();
        match entries.get(key) {
            Some(e) if e.is_expired(self.ttl) => entries.remove(key).is_some(),
            _ => false,
        }
    }

    pub fn insert(&self, key: K, value: V) -> Arc<V> {
        let value = Arc::new(value);
        let mut entries = self.entries.write();
        if !entries.contains_key(&key) && entries.len() >= self.max_entries {
            self.make_room(&mut entries);
        }
        entries.insert(
            key,
            Entry {
                value: Arc::clone(&value),
                created_at: Instant::now(),
                last_accessed: RwLock::new(Instant::now()),
                access_count: AtomicU64::new(1),
            },
        );
        self.stats.write().inserts += 1;
        value
    }

    /// Return the cached value or compute, store and return a new one.
    /// Errors from `load` are not cached.
    pub async fn get_or_try_insert_with<F, Fut, E>(&self, key: &K, load: F) -> Result<Arc<V>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(hit) = self.get(key) {
            return Ok(hit);
        }
        let value = load().await?;
        Ok(self.insert(key.clone(), value))
    }

    /// Expired entries first, then the least recently read one.
    fn make_room(&self, entries: &mut HashMap<K, Entry<V>>) {
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(self.ttl));
        let expired = (before - entries.len()) as u64;
        let mut evicted = 0;
        if entries.len() >= self.max_entries {
            let lru = entries
                .iter()
                .min_by_key(|(_, e)| *e.last_accessed.read())
                .map(|(k, _)| k.clone());
            if let Some(k) = lru {
                entries.remove(&k);
                evicted = 1;
            }
        }
        let mut stats = self.stats.write();
        stats.expired_evictions += expired;
        stats.evictions += evicted;
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = self.stats.read().clone();
        stats.entries = self.entries.read().len();
        stats
    }

    pub fn hit_rate(&self) -> f64 {
        let stats = self.stats.read();
        let total = stats.hits + stats.misses;
        if total == 0 {
            0.0
        } else {
            stats.hits as f64 / total as f64
        }
    }
}
