//! Store contract shared by the eviction backends.

use crate::value::Value;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

/// Eviction backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CacheType {
    /// Byte-bounded classic LRU.
    Lru,
    /// Sharded two-level LRU that resists single-touch scan pollution.
    #[default]
    Lru2,
}

/// Callback invoked whenever a live entry leaves a store through eviction,
/// expiration, explicit delete, or clear.
pub type EvictionCallback<V> = Arc<dyn Fn(&str, &V) + Send + Sync>;

/// Uniform contract over any eviction policy.
///
/// Implementations are internally synchronized; all methods take `&self` and
/// are safe to call from any thread.
pub trait Store<V: Value>: Send + Sync {
    /// Look up a key, refreshing its recency. Expired entries read as absent.
    fn get(&self, key: &str) -> Option<V>;

    /// Insert or update a key with no expiration.
    fn set(&self, key: &str, value: V);

    /// Insert or update a key with a time-to-live. A zero `ttl` clears any
    /// existing expiration.
    fn set_with_ttl(&self, key: &str, value: V, ttl: Duration);

    /// Remove a key. Returns whether it was present.
    fn delete(&self, key: &str) -> bool;

    /// Remove every entry, firing the eviction callback for each live one.
    fn clear(&self);

    /// Number of live entries.
    fn len(&self) -> usize;

    /// Whether the store holds no live entries.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop background work. Idempotent; the store rejects nothing after
    /// close, but its sweeper is gone.
    fn close(&self);
}
