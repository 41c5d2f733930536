//! Byte-bounded LRU store with per-key TTL.
//!
//! A single reader-writer lock guards the whole store. Recency is tracked by
//! an intrusive doubly linked list threaded through a slab of nodes, so the
//! steady state allocates nothing beyond key strings. Expiry is enforced on
//! every mutating set and by a background sweeper thread.
//!
//! Lookups take the lock in upgradable-read mode: the common path reads
//! without excluding other readers, and the guard is upgraded only for the
//! recency splice (or for removing an entry that turned out to be expired).
//! Because the upgrade is atomic there is no window in which another writer
//! can invalidate the looked-up slot.

mod list;

use ember_core::{EvictionCallback, Store, Value};
use list::{NIL, OrderList};
use parking_lot::{RwLock, RwLockUpgradableReadGuard};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

/// Byte-bounded LRU store.
///
/// Capacity is expressed in bytes: each entry accounts for
/// `key.len() + value.byte_len()`. A `max_bytes` of 0 disables the bound.
pub struct LruStore<V: Value> {
    inner: Arc<RwLock<Inner<V>>>,
    stop: crossbeam_channel::Sender<()>,
    closed: AtomicBool,
}

/// Builder for [`LruStore`].
pub struct LruStoreBuilder<V: Value> {
    max_bytes: usize,
    cleanup_interval: Duration,
    on_evicted: Option<EvictionCallback<V>>,
}

struct Inner<V: Value> {
    list: OrderList,
    nodes: Vec<Option<Node<V>>>,
    free: Vec<usize>,
    map: HashMap<String, usize, ahash::RandomState>,
    expires: HashMap<String, Instant, ahash::RandomState>,
    used_bytes: usize,
    max_bytes: usize,
    on_evicted: Option<EvictionCallback<V>>,
}

struct Node<V> {
    key: String,
    value: V,
}

const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

impl<V: Value + Clone + Send + Sync + 'static> LruStoreBuilder<V> {
    /// Byte bound for the store (0 disables the bound).
    pub fn max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Background sweep cadence. Non-positive values fall back to the
    /// one-minute default.
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = if interval.is_zero() {
            DEFAULT_CLEANUP_INTERVAL
        } else {
            interval
        };
        self
    }

    /// Callback fired whenever a live entry is removed.
    pub fn on_evicted(mut self, callback: EvictionCallback<V>) -> Self {
        self.on_evicted = Some(callback);
        self
    }

    /// Build the store and start its sweeper thread.
    pub fn build(self) -> LruStore<V> {
        let inner = Arc::new(RwLock::new(Inner {
            list: OrderList::new(),
            nodes: Vec::new(),
            free: Vec::new(),
            map: HashMap::default(),
            expires: HashMap::default(),
            used_bytes: 0,
            max_bytes: self.max_bytes,
            on_evicted: self.on_evicted,
        }));

        let (stop, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let sweep_target = inner.clone();
        let interval = self.cleanup_interval;
        thread::Builder::new()
            .name("ember-lru-sweeper".into())
            .spawn(move || {
                let ticker = crossbeam_channel::tick(interval);
                loop {
                    crossbeam_channel::select! {
                        recv(ticker) -> _ => {
                            let removed = sweep_target.write().evict(Instant::now());
                            if removed > 0 {
                                debug!(count = removed, "sweeping expired entries");
                            }
                        }
                        recv(stop_rx) -> _ => break,
                    }
                }
            })
            .expect("failed to spawn lru sweeper thread");

        LruStore {
            inner,
            stop,
            closed: AtomicBool::new(false),
        }
    }
}

impl<V: Value + Clone + Send + Sync + 'static> LruStore<V> {
    /// Start building a store.
    pub fn builder() -> LruStoreBuilder<V> {
        LruStoreBuilder {
            max_bytes: 0,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            on_evicted: None,
        }
    }

    /// Look up a key together with its remaining TTL.
    ///
    /// Returns `(value, None)` for entries without an expiration.
    pub fn get_with_ttl(&self, key: &str) -> Option<(V, Option<Duration>)> {
        let inner = self.inner.upgradable_read();
        let idx = *inner.map.get(key)?;
        let now = Instant::now();
        let expire = inner.expires.get(key).copied();
        if let Some(at) = expire
            && now >= at
        {
            let mut inner = RwLockUpgradableReadGuard::upgrade(inner);
            inner.remove_index(idx);
            return None;
        }
        let mut inner = RwLockUpgradableReadGuard::upgrade(inner);
        inner.list.move_to_back(idx);
        let node = inner.nodes[idx].as_ref()?;
        Some((node.value.clone(), expire.map(|at| at - now)))
    }

    /// Re-stamp a key's expiration. A zero `ttl` clears it. Returns whether
    /// the key was present.
    pub fn update_expiration(&self, key: &str, ttl: Duration) -> bool {
        let mut inner = self.inner.write();
        if !inner.map.contains_key(key) {
            return false;
        }
        if ttl.is_zero() {
            inner.expires.remove(key);
        } else {
            inner.expires.insert(key.to_string(), Instant::now() + ttl);
        }
        true
    }

    /// Bytes currently accounted to live entries.
    pub fn used_bytes(&self) -> usize {
        self.inner.read().used_bytes
    }

    /// The configured byte bound (0 means unbounded).
    pub fn max_bytes(&self) -> usize {
        self.inner.read().max_bytes
    }

    /// Change the byte bound, trimming immediately if it shrank.
    pub fn set_max_bytes(&self, max_bytes: usize) {
        let mut inner = self.inner.write();
        inner.max_bytes = max_bytes;
        if max_bytes > 0 {
            inner.evict(Instant::now());
        }
    }

    fn insert(&self, key: &str, value: V, ttl: Option<Duration>) {
        let value_len = value.byte_len();
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        let now = Instant::now();

        match ttl {
            Some(d) if !d.is_zero() => {
                inner.expires.insert(key.to_string(), now + d);
            }
            _ => {
                inner.expires.remove(key);
            }
        }

        let existing = inner.map.get(key).copied();
        if let Some(idx) = existing {
            if let Some(node) = inner.nodes[idx].as_mut() {
                let old_len = node.value.byte_len();
                node.value = value;
                inner.used_bytes = inner.used_bytes - old_len + value_len;
            }
            inner.list.move_to_back(idx);
        } else {
            let node = Node {
                key: key.to_string(),
                value,
            };
            let idx = match inner.free.pop() {
                Some(idx) => {
                    inner.nodes[idx] = Some(node);
                    idx
                }
                None => {
                    inner.nodes.push(Some(node));
                    inner.list.grow();
                    inner.nodes.len() - 1
                }
            };
            inner.used_bytes += key.len() + value_len;
            inner.list.push_back(idx);
            inner.map.insert(key.to_string(), idx);
        }

        inner.evict(now);
    }
}

impl<V: Value + Clone + Send + Sync + 'static> Store<V> for LruStore<V> {
    fn get(&self, key: &str) -> Option<V> {
        let inner = self.inner.upgradable_read();
        let idx = *inner.map.get(key)?;
        let expired = inner
            .expires
            .get(key)
            .is_some_and(|&at| Instant::now() >= at);
        let mut inner = RwLockUpgradableReadGuard::upgrade(inner);
        if expired {
            inner.remove_index(idx);
            return None;
        }
        inner.list.move_to_back(idx);
        inner.nodes[idx].as_ref().map(|node| node.value.clone())
    }

    fn set(&self, key: &str, value: V) {
        self.insert(key, value, None);
    }

    fn set_with_ttl(&self, key: &str, value: V, ttl: Duration) {
        self.insert(key, value, Some(ttl));
    }

    fn delete(&self, key: &str) -> bool {
        let mut inner = self.inner.write();
        match inner.map.get(key).copied() {
            Some(idx) => {
                inner.remove_index(idx);
                true
            }
            None => false,
        }
    }

    fn clear(&self) {
        let mut inner = self.inner.write();
        if let Some(callback) = inner.on_evicted.clone() {
            for node in inner.nodes.iter().flatten() {
                callback(&node.key, &node.value);
            }
        }
        inner.list = OrderList::new();
        inner.nodes.clear();
        inner.free.clear();
        inner.map.clear();
        inner.expires.clear();
        inner.used_bytes = 0;
    }

    fn len(&self) -> usize {
        self.inner.read().map.len()
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = self.stop.try_send(());
        }
    }
}

impl<V: Value> Drop for LruStore<V> {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = self.stop.try_send(());
        }
    }
}

impl<V: Value> Inner<V> {
    /// Remove a slot: unlink, unmap, release bytes, fire the callback.
    fn remove_index(&mut self, idx: usize) {
        self.list.unlink(idx);
        self.free.push(idx);
        if let Some(node) = self.nodes[idx].take() {
            self.map.remove(&node.key);
            self.expires.remove(&node.key);
            self.used_bytes -= node.key.len() + node.value.byte_len();
            if let Some(callback) = &self.on_evicted {
                callback(&node.key, &node.value);
            }
        }
    }

    /// Drop expired entries, then trim from the LRU end until the store fits
    /// its byte bound. Returns the number of entries removed.
    fn evict(&mut self, now: Instant) -> usize {
        let expired: Vec<usize> = self
            .expires
            .iter()
            .filter(|&(_, &at)| now >= at)
            .filter_map(|(key, _)| self.map.get(key).copied())
            .collect();
        let mut removed = expired.len();
        for idx in expired {
            self.remove_index(idx);
        }

        while self.max_bytes > 0 && self.used_bytes > self.max_bytes {
            let front = self.list.front();
            if front == NIL {
                break;
            }
            self.remove_index(front);
            removed += 1;
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_core::ByteView;
    use std::sync::Mutex;

    fn store(max_bytes: usize) -> LruStore<ByteView> {
        LruStore::builder().max_bytes(max_bytes).build()
    }

    fn expected_bytes(entries: &[(&str, usize)]) -> usize {
        entries.iter().map(|(k, v)| k.len() + v).sum()
    }

    #[test]
    fn set_then_get_round_trips() {
        let cache = store(0);
        cache.set("alpha", ByteView::from("one"));
        assert_eq!(cache.get("alpha"), Some(ByteView::from("one")));
        assert_eq!(cache.get("beta"), None);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn update_replaces_value_and_bytes() {
        let cache = store(0);
        cache.set("k", ByteView::from("short"));
        cache.set("k", ByteView::from("a longer value"));
        assert_eq!(cache.get("k"), Some(ByteView::from("a longer value")));
        assert_eq!(cache.used_bytes(), expected_bytes(&[("k", 14)]));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn capacity_eviction_respects_byte_bound() {
        // Two 11-byte entries exceed a 20-byte bound, so each set keeps only
        // the MRU tail of the sequence.
        let cache = store(20);
        cache.set("a", ByteView::copy_from_slice(&[1u8; 10]));
        assert!(cache.used_bytes() <= 20);
        cache.set("b", ByteView::copy_from_slice(&[2u8; 10]));
        assert!(cache.used_bytes() <= 20);
        cache.set("c", ByteView::copy_from_slice(&[3u8; 10]));

        assert!(cache.used_bytes() <= 20);
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("c"), Some(ByteView::copy_from_slice(&[3u8; 10])));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn eviction_prefers_least_recently_used() {
        // Three 12-byte entries fit a 36-byte bound exactly; touching "a"
        // makes "b" the LRU victim when "d" arrives.
        let cache = store(36);
        cache.set("a", ByteView::copy_from_slice(&[0u8; 11]));
        cache.set("b", ByteView::copy_from_slice(&[0u8; 11]));
        cache.set("c", ByteView::copy_from_slice(&[0u8; 11]));
        assert!(cache.get("a").is_some());

        cache.set("d", ByteView::copy_from_slice(&[0u8; 11]));
        assert!(cache.get("a").is_some());
        assert_eq!(cache.get("b"), None);
        assert!(cache.get("c").is_some());
        assert!(cache.get("d").is_some());
    }

    #[test]
    fn ttl_expiry_with_sweeper() {
        let cache = LruStore::builder()
            .cleanup_interval(Duration::from_millis(10))
            .build();
        cache.set_with_ttl("k", ByteView::from("v"), Duration::from_millis(50));

        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(cache.get("k"), Some(ByteView::from("v")));

        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(cache.get("k"), None);

        // The sweeper reclaims the entry even without reads.
        cache.set_with_ttl("gone", ByteView::from("v"), Duration::from_millis(20));
        std::thread::sleep(Duration::from_millis(120));
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.used_bytes(), 0);
    }

    #[test]
    fn zero_ttl_clears_expiration() {
        let cache = store(0);
        cache.set_with_ttl("k", ByteView::from("v"), Duration::from_millis(30));
        cache.set_with_ttl("k", ByteView::from("v"), Duration::ZERO);
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(cache.get("k"), Some(ByteView::from("v")));
    }

    #[test]
    fn get_with_ttl_reports_remaining_time() {
        let cache = store(0);
        cache.set("forever", ByteView::from("v"));
        cache.set_with_ttl("short", ByteView::from("v"), Duration::from_secs(60));

        let (_, ttl) = cache.get_with_ttl("forever").unwrap();
        assert!(ttl.is_none());

        let (_, ttl) = cache.get_with_ttl("short").unwrap();
        let ttl = ttl.unwrap();
        assert!(ttl <= Duration::from_secs(60) && ttl > Duration::from_secs(50));
    }

    #[test]
    fn update_expiration_restamps_and_clears() {
        let cache = store(0);
        assert!(!cache.update_expiration("missing", Duration::from_secs(1)));

        cache.set_with_ttl("k", ByteView::from("v"), Duration::from_millis(20));
        assert!(cache.update_expiration("k", Duration::from_secs(60)));
        std::thread::sleep(Duration::from_millis(50));
        assert!(cache.get("k").is_some());

        assert!(cache.update_expiration("k", Duration::ZERO));
        assert!(cache.get_with_ttl("k").unwrap().1.is_none());
    }

    #[test]
    fn delete_reports_presence_and_fires_callback() {
        let evicted: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let log = evicted.clone();
        let cache: LruStore<ByteView> = LruStore::builder()
            .on_evicted(Arc::new(move |key, _| log.lock().unwrap().push(key.to_string())))
            .build();

        cache.set("k", ByteView::from("v"));
        assert!(cache.delete("k"));
        assert!(!cache.delete("k"));
        assert_eq!(evicted.lock().unwrap().as_slice(), ["k"]);
    }

    #[test]
    fn clear_fires_callback_for_every_live_entry() {
        let evicted: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let log = evicted.clone();
        let cache: LruStore<ByteView> = LruStore::builder()
            .on_evicted(Arc::new(move |key, _| log.lock().unwrap().push(key.to_string())))
            .build();

        cache.set("a", ByteView::from("1"));
        cache.set("b", ByteView::from("2"));
        cache.clear();

        let mut seen = evicted.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, ["a", "b"]);
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.used_bytes(), 0);
        assert_eq!(cache.get("a"), None);
    }

    #[test]
    fn byte_accounting_stays_exact() {
        let cache = store(0);
        cache.set("one", ByteView::copy_from_slice(&[0u8; 7]));
        cache.set("two", ByteView::copy_from_slice(&[0u8; 13]));
        cache.set("three", ByteView::copy_from_slice(&[0u8; 2]));
        assert_eq!(
            cache.used_bytes(),
            expected_bytes(&[("one", 7), ("two", 13), ("three", 2)])
        );

        cache.delete("two");
        assert_eq!(cache.used_bytes(), expected_bytes(&[("one", 7), ("three", 2)]));

        cache.set("one", ByteView::copy_from_slice(&[0u8; 20]));
        assert_eq!(cache.used_bytes(), expected_bytes(&[("one", 20), ("three", 2)]));
    }

    #[test]
    fn shrinking_max_bytes_trims_immediately() {
        let cache = store(0);
        for i in 0..8 {
            cache.set(&format!("key-{i}"), ByteView::copy_from_slice(&[0u8; 10]));
        }
        cache.set_max_bytes(32);
        assert!(cache.used_bytes() <= 32);
        assert!(cache.len() < 8);
        // MRU survivors only.
        assert!(cache.get("key-7").is_some());
    }
}
