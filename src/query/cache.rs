#![forbid(unsafe_code)]

//! Sharded LRU cache keyed by frozen queries.
//!
//! Backends use it to keep the compiled form of a query (a plan, a prepared
//! statement) around between executions. It never stores result rows.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::trace;

use crate::query::search_query::SearchQuery;

type Shard<V> = Mutex<LruCache<Arc<SearchQuery>, Arc<V>>>;

/// Hit and miss counters of a [`PreparedQueryCache`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheMetrics {
    /// Lookups that found an entry.
    pub hits: u64,
    /// Lookups that found nothing.
    pub misses: u64,
    /// Entries inserted.
    pub inserts: u64,
}

/// Cache from frozen queries to backend-specific compiled values.
pub struct PreparedQueryCache<V> {
    shards: Vec<Shard<V>>,
    hits: AtomicU64,
    misses: AtomicU64,
    inserts: AtomicU64,
}

impl<V> PreparedQueryCache<V> {
    /// Creates a cache with `shards` shards holding about `capacity` entries in total.
    pub fn new(shards: usize, capacity: usize) -> Self {
        let shard_count = shards.max(1);
        let per_shard_cap = NonZeroUsize::new(capacity / shard_count).unwrap_or(NonZeroUsize::MIN);
        let shards = (0..shard_count)
            .map(|_| Mutex::new(LruCache::new(per_shard_cap)))
            .collect();
        Self {
            shards,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            inserts: AtomicU64::new(0),
        }
    }

    /// Returns the cached value for `query`, refreshing its recency.
    pub fn get(&self, query: &SearchQuery) -> Option<Arc<V>> {
        let fingerprint = query.fingerprint();
        let found = self.shard_for(fingerprint).lock().get(query).cloned();
        self.record(fingerprint, found.is_some());
        found
    }

    /// Stores `value` for `query`, evicting the least recently used entry of
    /// the shard when it is full.
    pub fn insert(&self, query: Arc<SearchQuery>, value: Arc<V>) {
        let fingerprint = query.fingerprint();
        self.shard_for(fingerprint).lock().put(query, value);
        self.inserts.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the cached value for `query`, computing and storing it on a miss.
    ///
    /// `compute` runs without holding the shard lock; concurrent misses for
    /// the same query may compute twice, and the last insert wins.
    pub fn get_or_insert_with<E>(
        &self,
        query: &Arc<SearchQuery>,
        compute: impl FnOnce(&SearchQuery) -> Result<V, E>,
    ) -> Result<Arc<V>, E> {
        if let Some(hit) = self.get(query) {
            return Ok(hit);
        }
        let value = Arc::new(compute(query)?);
        self.insert(Arc::clone(query), Arc::clone(&value));
        Ok(value)
    }

    /// Removes the entry for `query`.
    pub fn remove(&self, query: &SearchQuery) -> Option<Arc<V>> {
        self.shard_for(query.fingerprint()).lock().pop(query)
    }

    /// Number of cached entries across all shards.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().len()).sum()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every entry; counters are kept.
    pub fn clear(&self) {
        for shard in &self.shards {
            shard.lock().clear();
        }
    }

    /// Snapshot of the hit, miss, and insert counters.
    pub fn metrics(&self) -> CacheMetrics {
        CacheMetrics {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
        }
    }

    fn record(&self, fingerprint: u64, hit: bool) {
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(fingerprint, "query.cache.hit");
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            trace!(fingerprint, "query.cache.miss");
        }
    }

    fn shard_for(&self, fingerprint: u64) -> &Shard<V> {
        let idx = (fingerprint as usize) % self.shards.len();
        &self.shards[idx]
    }
}
