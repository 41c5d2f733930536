//! Group-level cache configuration.

use ember_core::{ByteView, CacheType, EvictionCallback, StoreConfig};
use std::fmt;
use std::time::Duration;

/// Options for a group's local store.
///
/// The serde-facing form is [`ember_core::StoreConfig`]; this type adds the
/// eviction callback, which can only be attached in code.
#[derive(Clone)]
pub struct CacheOptions {
    /// Eviction backend for the local store.
    pub cache_type: CacheType,
    /// Byte bound for the LRU backend (0 disables the bound).
    pub max_bytes: usize,
    /// Shard count for the LRU-2 backend.
    pub bucket_count: u16,
    /// Admission-level capacity per LRU-2 shard.
    pub cap_per_bucket: u16,
    /// Main-level capacity per LRU-2 shard.
    pub level2_cap: u16,
    /// Background expiry sweep cadence.
    pub cleanup_interval: Duration,
    /// Callback fired whenever a live entry is removed.
    pub on_evicted: Option<EvictionCallback<ByteView>>,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            cache_type: CacheType::Lru2,
            max_bytes: 8 * 1024 * 1024,
            bucket_count: 16,
            cap_per_bucket: 512,
            level2_cap: 256,
            cleanup_interval: Duration::from_secs(60),
            on_evicted: None,
        }
    }
}

impl From<StoreConfig> for CacheOptions {
    fn from(config: StoreConfig) -> Self {
        Self {
            cache_type: config.cache_type,
            max_bytes: config.max_bytes,
            bucket_count: config.bucket_count,
            cap_per_bucket: config.cap_per_bucket,
            level2_cap: config.level2_cap,
            cleanup_interval: config.cleanup_interval(),
            on_evicted: None,
        }
    }
}

impl fmt::Debug for CacheOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheOptions")
            .field("cache_type", &self.cache_type)
            .field("max_bytes", &self.max_bytes)
            .field("bucket_count", &self.bucket_count)
            .field("cap_per_bucket", &self.cap_per_bucket)
            .field("level2_cap", &self.level2_cap)
            .field("cleanup_interval", &self.cleanup_interval)
            .field("on_evicted", &self.on_evicted.is_some())
            .finish()
    }
}
