//! Lazily-initialised local store with hit/miss accounting.
//!
//! The underlying store is not built until the first populate, so a group
//! that never caches anything costs nothing beyond this wrapper. Reads
//! before initialisation are plain misses.

use crate::config::CacheOptions;
use ember_core::{ByteView, CacheType, Store};
use ember_lru::LruStore;
use ember_lru2::Lru2Store;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use tracing::{debug, info, warn};

pub(crate) struct LocalCache {
    opts: CacheOptions,
    store: OnceLock<Arc<dyn Store<ByteView>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    closed: AtomicBool,
}

/// Snapshot of a group's local cache counters.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub initialized: bool,
    pub closed: bool,
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
    pub hit_rate: f64,
}

impl LocalCache {
    pub(crate) fn new(opts: CacheOptions) -> Self {
        Self {
            opts,
            store: OnceLock::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    fn store(&self) -> &Arc<dyn Store<ByteView>> {
        self.store.get_or_init(|| {
            info!(
                cache_type = ?self.opts.cache_type,
                max_bytes = self.opts.max_bytes,
                "local store initialized"
            );
            build_store(&self.opts)
        })
    }

    pub(crate) fn get(&self, key: &str) -> Option<ByteView> {
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        let Some(store) = self.store.get() else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };
        match store.get(key) {
            Some(view) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(view)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub(crate) fn set(&self, key: &str, value: ByteView) {
        if self.closed.load(Ordering::Acquire) {
            warn!(key, "set on a closed cache");
            return;
        }
        self.store().set(key, value);
    }

    /// Populate with an absolute expiry instant. Entries already past their
    /// expiry are not stored.
    pub(crate) fn set_with_expiration(&self, key: &str, value: ByteView, expire_at: Instant) {
        if self.closed.load(Ordering::Acquire) {
            warn!(key, "set on a closed cache");
            return;
        }
        let ttl = expire_at.saturating_duration_since(Instant::now());
        if ttl.is_zero() {
            debug!(key, "already expired, skipping populate");
            return;
        }
        self.store().set_with_ttl(key, value, ttl);
    }

    pub(crate) fn delete(&self, key: &str) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        match self.store.get() {
            Some(store) => store.delete(key),
            None => false,
        }
    }

    pub(crate) fn clear(&self) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        if let Some(store) = self.store.get() {
            store.clear();
        }
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    pub(crate) fn len(&self) -> usize {
        if self.closed.load(Ordering::Acquire) {
            return 0;
        }
        self.store.get().map_or(0, |store| store.len())
    }

    /// Idempotent; stops the store's sweeper.
    pub(crate) fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(store) = self.store.get() {
            store.close();
        }
        debug!(
            hits = self.hits.load(Ordering::Relaxed),
            misses = self.misses.load(Ordering::Relaxed),
            "local cache closed"
        );
    }

    pub(crate) fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            initialized: self.store.get().is_some(),
            closed: self.closed.load(Ordering::Acquire),
            hits,
            misses,
            size: self.len(),
            hit_rate: if total > 0 {
                hits as f64 / total as f64
            } else {
                0.0
            },
        }
    }
}

fn build_store(opts: &CacheOptions) -> Arc<dyn Store<ByteView>> {
    match opts.cache_type {
        CacheType::Lru => {
            let mut builder = LruStore::builder()
                .max_bytes(opts.max_bytes)
                .cleanup_interval(opts.cleanup_interval);
            if let Some(callback) = opts.on_evicted.clone() {
                builder = builder.on_evicted(callback);
            }
            Arc::new(builder.build())
        }
        CacheType::Lru2 => {
            let mut builder = Lru2Store::builder()
                .bucket_count(opts.bucket_count)
                .cap_per_bucket(opts.cap_per_bucket)
                .level2_cap(opts.level2_cap)
                .cleanup_interval(opts.cleanup_interval);
            if let Some(callback) = opts.on_evicted.clone() {
                builder = builder.on_evicted(callback);
            }
            Arc::new(builder.build())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn reads_before_initialisation_are_misses() {
        let cache = LocalCache::new(CacheOptions::default());
        assert_eq!(cache.get("k"), None);
        let stats = cache.stats();
        assert!(!stats.initialized);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn first_set_initialises_the_store() {
        let cache = LocalCache::new(CacheOptions::default());
        cache.set("k", ByteView::from("v"));
        assert!(cache.stats().initialized);
        assert_eq!(cache.get("k"), Some(ByteView::from("v")));
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn expired_populate_is_skipped() {
        let cache = LocalCache::new(CacheOptions::default());
        cache.set_with_expiration("k", ByteView::from("v"), Instant::now());
        // The populate was dropped; the store may not even exist yet.
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn close_rejects_further_operations() {
        let cache = LocalCache::new(CacheOptions::default());
        cache.set("k", ByteView::from("v"));
        cache.close();
        cache.close(); // idempotent
        assert_eq!(cache.get("k"), None);
        assert!(!cache.delete("k"));
        assert_eq!(cache.len(), 0);
        assert!(cache.stats().closed);
    }

    #[test]
    fn lru_backend_honours_ttl_populates() {
        let cache = LocalCache::new(CacheOptions {
            cache_type: CacheType::Lru,
            ..CacheOptions::default()
        });
        cache.set_with_expiration(
            "k",
            ByteView::from("v"),
            Instant::now() + Duration::from_millis(50),
        );
        assert!(cache.get("k").is_some());
        std::thread::sleep(Duration::from_millis(80));
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn clear_resets_counters() {
        let cache = LocalCache::new(CacheOptions::default());
        cache.set("k", ByteView::from("v"));
        cache.get("k");
        cache.get("missing");
        cache.clear();
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (0, 0));
        assert_eq!(stats.size, 0);
    }
}
