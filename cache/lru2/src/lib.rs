//! Sharded two-level LRU store.
//!
//! Keys hash (BKDR) into independently locked shards; each shard owns an
//! *admission* level and a *main* level, both fixed-capacity arenas
//! ([`level`]). A set lands in admission; the second touch promotes the
//! entry to main. Single-touch scans therefore churn only the admission
//! arena and cannot displace the re-referenced working set.
//!
//! TTL stamps come from the process-wide coarse clock
//! ([`ember_core::coarse_now`]), trading sub-second expiry precision for
//! allocation- and syscall-free reads on the hot path. A background sweeper
//! walks the shards at a configurable cadence and deletes expired entries.

mod level;

use ember_core::{EvictionCallback, Store, Value, coarse_now};
use level::Level;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracing::debug;

/// Expiry stamp meaning "never expires". Distinct from the tombstone stamp
/// (0), so a live unbounded entry can never read as deleted.
pub const NO_EXPIRE: u64 = u64::MAX;

const DEFAULT_BUCKET_COUNT: u16 = 16;
const DEFAULT_CAP_PER_BUCKET: u16 = 1024;
const DEFAULT_LEVEL2_CAP: u16 = 1024;
const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Sharded two-level LRU store.
pub struct Lru2Store<V: Value> {
    shards: Arc<ShardSet<V>>,
    stop: crossbeam_channel::Sender<()>,
    closed: AtomicBool,
}

/// Builder for [`Lru2Store`].
pub struct Lru2StoreBuilder<V: Value> {
    bucket_count: u16,
    cap_per_bucket: u16,
    level2_cap: u16,
    cleanup_interval: Duration,
    on_evicted: Option<EvictionCallback<V>>,
}

struct ShardSet<V: Value> {
    shards: Vec<Mutex<Shard<V>>>,
    mask: i32,
    on_evicted: Option<EvictionCallback<V>>,
}

struct Shard<V> {
    admission: Level<V>,
    main: Level<V>,
}

impl<V: Value + Clone + Send + Sync + 'static> Lru2StoreBuilder<V> {
    /// Number of shards; rounded up to a power of two. Zero selects the
    /// default of 16.
    pub fn bucket_count(mut self, count: u16) -> Self {
        self.bucket_count = if count == 0 { DEFAULT_BUCKET_COUNT } else { count };
        self
    }

    /// Admission-level arena capacity per shard. Zero selects the default.
    pub fn cap_per_bucket(mut self, cap: u16) -> Self {
        self.cap_per_bucket = if cap == 0 { DEFAULT_CAP_PER_BUCKET } else { cap };
        self
    }

    /// Main-level arena capacity per shard. Zero selects the default.
    pub fn level2_cap(mut self, cap: u16) -> Self {
        self.level2_cap = if cap == 0 { DEFAULT_LEVEL2_CAP } else { cap };
        self
    }

    /// Background sweep cadence. Zero selects the one-minute default.
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
    pub fn build(self) -> Lru2Store<V> {
        let mask = mask_of_next_pow2(self.bucket_count);
        let shard_count = mask as usize + 1;
        let shards = (0..shard_count)
            .map(|_| {
                Mutex::new(Shard {
                    admission: Level::new(self.cap_per_bucket),
                    main: Level::new(self.level2_cap),
                })
            })
            .collect();
        let set = Arc::new(ShardSet {
            shards,
            mask: mask as i32,
            on_evicted: self.on_evicted,
        });

        let (stop, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let sweep_target = set.clone();
        let interval = self.cleanup_interval;
        thread::Builder::new()
            .name("ember-lru2-sweeper".into())
            .spawn(move || {
                let ticker = crossbeam_channel::tick(interval);
                loop {
                    crossbeam_channel::select! {
                        recv(ticker) -> _ => sweep_target.sweep(),
                        recv(stop_rx) -> _ => break,
                    }
                }
            })
            .expect("failed to spawn lru2 sweeper thread");

        Lru2Store {
            shards: set,
            stop,
            closed: AtomicBool::new(false),
        }
    }
}

impl<V: Value + Clone + Send + Sync + 'static> Lru2Store<V> {
    /// Start building a store.
    pub fn builder() -> Lru2StoreBuilder<V> {
        Lru2StoreBuilder {
            bucket_count: DEFAULT_BUCKET_COUNT,
            cap_per_bucket: DEFAULT_CAP_PER_BUCKET,
            level2_cap: DEFAULT_LEVEL2_CAP,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            on_evicted: None,
        }
    }

    fn set_at(&self, key: &str, value: V, expire_at: u64) {
        let idx = self.shards.shard_index(key);
        let mut shard = self.shards.shards[idx].lock();
        // An entry already resident in main is updated in place so a key
        // never lives in both levels; everything else lands in admission.
        if shard.main.contains_live(key) {
            shard.main.put(key, value, expire_at, self.shards.on_evicted.as_ref());
        } else {
            shard
                .admission
                .put(key, value, expire_at, self.shards.on_evicted.as_ref());
        }
    }
}

impl<V: Value + Clone + Send + Sync + 'static> Store<V> for Lru2Store<V> {
    fn get(&self, key: &str) -> Option<V> {
        let idx = self.shards.shard_index(key);
        let mut shard = self.shards.shards[idx].lock();
        let now = coarse_now();

        // Admission hit: this is the second touch, promote to main.
        if let Some((value, expire_at)) = shard.admission.remove(key) {
            if now >= expire_at {
                shard.main.remove(key);
                if let Some(callback) = &self.shards.on_evicted {
                    callback(key, &value);
                }
                return None;
            }
            shard
                .main
                .put(key, value.clone(), expire_at, self.shards.on_evicted.as_ref());
            return Some(value);
        }

        if let Some((value, expire_at)) = shard.main.get(key) {
            if now >= expire_at {
                self.shards.delete_in(&mut shard, key);
                return None;
            }
            return Some(value);
        }

        None
    }

    fn set(&self, key: &str, value: V) {
        self.set_at(key, value, NO_EXPIRE);
    }

    fn set_with_ttl(&self, key: &str, value: V, ttl: Duration) {
        let expire_at = if ttl.is_zero() {
            NO_EXPIRE
        } else {
            coarse_now().saturating_add(ttl.as_nanos() as u64)
        };
        self.set_at(key, value, expire_at);
    }

    fn delete(&self, key: &str) -> bool {
        let idx = self.shards.shard_index(key);
        let mut shard = self.shards.shards[idx].lock();
        self.shards.delete_in(&mut shard, key)
    }

    fn clear(&self) {
        for mutex in &self.shards.shards {
            let mut shard = mutex.lock();
            let mut keys: Vec<String> = Vec::new();
            shard.admission.walk(|key, _, _| {
                keys.push(key.to_string());
                true
            });
            shard.main.walk(|key, _, _| {
                if !keys.iter().any(|k| k == key) {
                    keys.push(key.to_string());
                }
                true
            });
            for key in &keys {
                self.shards.delete_in(&mut shard, key);
            }
        }
    }

    fn len(&self) -> usize {
        let mut count = 0;
        for mutex in &self.shards.shards {
            let shard = mutex.lock();
            shard.admission.walk(|_, _, _| {
                count += 1;
                true
            });
            shard.main.walk(|_, _, _| {
                count += 1;
                true
            });
        }
        count
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = self.stop.try_send(());
        }
    }
}

impl<V: Value> Drop for Lru2Store<V> {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = self.stop.try_send(());
        }
    }
}

impl<V: Value + Clone> ShardSet<V> {
    fn shard_index(&self, key: &str) -> usize {
        (hash_bkdr(key) & self.mask) as usize
    }

    /// Remove a key from both levels of a shard, firing the eviction
    /// callback once with whichever copy existed.
    fn delete_in(&self, shard: &mut Shard<V>, key: &str) -> bool {
        let admitted = shard.admission.remove(key);
        let promoted = shard.main.remove(key);
        let deleted = admitted.is_some() || promoted.is_some();
        if deleted
            && let Some(callback) = &self.on_evicted
            && let Some((value, _)) = admitted.or(promoted)
        {
            callback(key, &value);
        }
        deleted
    }

    /// Delete every expired entry, shard by shard.
    fn sweep(&self) {
        let now = coarse_now();
        for mutex in &self.shards {
            let mut shard = mutex.lock();
            let mut expired: Vec<String> = Vec::new();
            shard.admission.walk(|key, _, expire_at| {
                if now >= expire_at {
                    expired.push(key.to_string());
                }
                true
            });
            shard.main.walk(|key, _, expire_at| {
                if now >= expire_at && !expired.iter().any(|k| k == key) {
                    expired.push(key.to_string());
                }
                true
            });
            if !expired.is_empty() {
                debug!(count = expired.len(), "sweeping expired entries");
            }
            for key in &expired {
                self.delete_in(&mut shard, key);
            }
        }
    }
}

/// BKDR string hash in signed 32-bit space.
fn hash_bkdr(key: &str) -> i32 {
    let mut hash: i32 = 0;
    for &byte in key.as_bytes() {
        hash = hash.wrapping_mul(131).wrapping_add(byte as i32);
    }
    hash
}

/// Mask covering the next power of two at or above `cap`.
fn mask_of_next_pow2(cap: u16) -> u16 {
    if cap > 0 && cap & (cap - 1) == 0 {
        return cap - 1;
    }
    let mut cap = cap;
    cap |= cap >> 1;
    cap |= cap >> 2;
    cap |= cap >> 4;
    cap | (cap >> 8)
}
