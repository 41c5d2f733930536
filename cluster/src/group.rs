//! Cache groups: the read-through / write-through pipeline.
//!
//! A read runs local store → owning peer → backend loader, coalesced per
//! key; whatever it finds is populated locally (with the group TTL if one is
//! configured). A client-originated write populates locally and replicates
//! to the owning peer asynchronously; a peer-originated write stops at the
//! local populate. Loader failures are returned to the caller and never
//! cached.

use crate::config::CacheOptions;
use crate::context::Context;
use crate::error::{GroupError, LoaderError};
use crate::local::{CacheStats, LocalCache};
use crate::peer::{PeerChoice, PeerPicker, RPC_TIMEOUT};
use crate::singleflight::SingleFlight;
use async_trait::async_trait;
use bytes::Bytes;
use ember_core::ByteView;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Loads a value from the authoritative backend on cache miss.
#[async_trait]
pub trait Getter: Send + Sync {
    async fn get(&self, ctx: Context, key: &str) -> Result<Bytes, LoaderError>;
}

/// Adapter implementing [`Getter`] for plain async functions.
pub struct GetterFn<F>(pub F);

#[async_trait]
impl<F, Fut> Getter for GetterFn<F>
where
    F: Fn(Context, String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Bytes, LoaderError>> + Send,
{
    async fn get(&self, ctx: Context, key: &str) -> Result<Bytes, LoaderError> {
        (self.0)(ctx, key.to_string()).await
    }
}

/// One named keyspace on one node.
///
/// Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct Group {
    inner: Arc<GroupInner>,
}

struct GroupInner {
    name: String,
    getter: Arc<dyn Getter>,
    cache: LocalCache,
    peers: Option<Arc<dyn PeerPicker>>,
    flight: SingleFlight<Result<ByteView, GroupError>>,
    expiration: Option<Duration>,
    closed: AtomicBool,
    stats: Counters,
}

#[derive(Default)]
struct Counters {
    loads: AtomicU64,
    local_hits: AtomicU64,
    local_misses: AtomicU64,
    peer_hits: AtomicU64,
    peer_misses: AtomicU64,
    loader_hits: AtomicU64,
    loader_errors: AtomicU64,
    load_duration_ns: AtomicU64,
}

/// Builder for [`Group`].
pub struct GroupBuilder {
    name: String,
    getter: Arc<dyn Getter>,
    expiration: Option<Duration>,
    peers: Option<Arc<dyn PeerPicker>>,
    cache_options: CacheOptions,
}

/// Point-in-time snapshot of a group's counters.
#[derive(Debug, Clone)]
pub struct GroupStats {
    pub name: String,
    pub closed: bool,
    pub expiration: Option<Duration>,
    pub loads: u64,
    pub local_hits: u64,
    pub local_misses: u64,
    pub peer_hits: u64,
    pub peer_misses: u64,
    pub loader_hits: u64,
    pub loader_errors: u64,
    /// Local hits over local lookups.
    pub hit_rate: f64,
    /// Mean time spent in the load path, in milliseconds.
    pub avg_load_time_ms: f64,
    pub cache: CacheStats,
}

enum SyncOp {
    Set(Bytes),
    Delete,
}

impl GroupBuilder {
    /// Group expiration: entries populated by this group carry this TTL.
    pub fn expiration(mut self, ttl: Duration) -> Self {
        self.expiration = Some(ttl);
        self
    }

    /// Enable the distributed path with a peer picker.
    pub fn peers(mut self, peers: Arc<dyn PeerPicker>) -> Self {
        self.peers = Some(peers);
        self
    }

    /// Local store options.
    pub fn cache_options(mut self, options: CacheOptions) -> Self {
        self.cache_options = options;
        self
    }

    /// Shorthand for overriding only the local byte bound.
    pub fn cache_bytes(mut self, max_bytes: usize) -> Self {
        self.cache_options.max_bytes = max_bytes;
        self
    }

    pub fn build(self) -> Group {
        info!(
            group = %self.name,
            max_bytes = self.cache_options.max_bytes,
            expiration = ?self.expiration,
            "created cache group"
        );
        Group {
            inner: Arc::new(GroupInner {
                name: self.name,
                getter: self.getter,
                cache: LocalCache::new(self.cache_options),
                peers: self.peers,
                flight: SingleFlight::new(),
                expiration: self.expiration,
                closed: AtomicBool::new(false),
                stats: Counters::default(),
            }),
        }
    }
}

impl Group {
    /// Start building a group named `name` backed by `getter`.
    pub fn builder(name: impl Into<String>, getter: Arc<dyn Getter>) -> GroupBuilder {
        GroupBuilder {
            name: name.into(),
            getter,
            expiration: None,
            peers: None,
            cache_options: CacheOptions::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Read a key: local store, then owning peer, then backend loader.
    pub async fn get(&self, ctx: Context, key: &str) -> Result<ByteView, GroupError> {
        if self.is_closed() {
            return Err(GroupError::Closed);
        }
        if key.is_empty() {
            return Err(GroupError::KeyRequired);
        }

        if let Some(view) = self.inner.cache.get(key) {
            self.inner.stats.local_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(view);
        }
        self.inner.stats.local_misses.fetch_add(1, Ordering::Relaxed);

        self.load(ctx, key).await
    }

    /// Write a key. Client-originated writes replicate asynchronously to the
    /// owning peer; peer-originated writes stop here.
    pub async fn set(
        &self,
        ctx: Context,
        key: &str,
        value: impl Into<Bytes>,
    ) -> Result<(), GroupError> {
        if self.is_closed() {
            return Err(GroupError::Closed);
        }
        if key.is_empty() {
            return Err(GroupError::KeyRequired);
        }
        let value = value.into();
        if value.is_empty() {
            return Err(GroupError::ValueRequired);
        }

        self.populate(key, ByteView::from(value.clone()));

        if !ctx.is_from_peer() && self.inner.peers.is_some() {
            let group = self.clone();
            let key = key.to_string();
            tokio::spawn(async move {
                group.sync_to_peers(&key, SyncOp::Set(value)).await;
            });
        }
        Ok(())
    }

    /// Delete a key locally and, for client-originated requests, on the
    /// owning peer.
    pub async fn delete(&self, ctx: Context, key: &str) -> Result<(), GroupError> {
        if self.is_closed() {
            return Err(GroupError::Closed);
        }
        if key.is_empty() {
            return Err(GroupError::KeyRequired);
        }

        self.inner.cache.delete(key);

        if !ctx.is_from_peer() && self.inner.peers.is_some() {
            let group = self.clone();
            let key = key.to_string();
            tokio::spawn(async move {
                group.sync_to_peers(&key, SyncOp::Delete).await;
            });
        }
        Ok(())
    }

    /// Drop every locally cached entry.
    pub fn clear(&self) {
        if self.is_closed() {
            return;
        }
        self.inner.cache.clear();
        info!(group = %self.inner.name, "cleared cache group");
    }

    /// Close the group and its local store. Idempotent; operations already
    /// in flight complete normally.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.cache.close();
        info!(group = %self.inner.name, "closed cache group");
    }

    pub fn stats(&self) -> GroupStats {
        let stats = &self.inner.stats;
        let local_hits = stats.local_hits.load(Ordering::Relaxed);
        let local_misses = stats.local_misses.load(Ordering::Relaxed);
        let loads = stats.loads.load(Ordering::Relaxed);
        let lookups = local_hits + local_misses;

        GroupStats {
            name: self.inner.name.clone(),
            closed: self.is_closed(),
            expiration: self.inner.expiration,
            loads,
            local_hits,
            local_misses,
            peer_hits: stats.peer_hits.load(Ordering::Relaxed),
            peer_misses: stats.peer_misses.load(Ordering::Relaxed),
            loader_hits: stats.loader_hits.load(Ordering::Relaxed),
            loader_errors: stats.loader_errors.load(Ordering::Relaxed),
            hit_rate: if lookups > 0 {
                local_hits as f64 / lookups as f64
            } else {
                0.0
            },
            avg_load_time_ms: if loads > 0 {
                stats.load_duration_ns.load(Ordering::Relaxed) as f64
                    / loads as f64
                    / 1_000_000.0
            } else {
                0.0
            },
            cache: self.inner.cache.stats(),
        }
    }

    /// Coalesced load path; every caller accounts its own wait.
    async fn load(&self, ctx: Context, key: &str) -> Result<ByteView, GroupError> {
        let started = Instant::now();
        let result = self
            .inner
            .flight
            .run(key, || self.load_once(ctx, key))
            .await;

        self.inner
            .stats
            .load_duration_ns
            .fetch_add(started.elapsed().as_nanos() as u64, Ordering::Relaxed);
        self.inner.stats.loads.fetch_add(1, Ordering::Relaxed);
        if result.is_err() {
            self.inner.stats.loader_errors.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    /// One actual load: owning peer first, backend loader as the authority.
    async fn load_once(&self, ctx: Context, key: &str) -> Result<ByteView, GroupError> {
        if let Some(peers) = &self.inner.peers
            && let PeerChoice::Remote(peer) = peers.pick_peer(key)
        {
            match tokio::time::timeout(RPC_TIMEOUT, peer.get(&self.inner.name, key)).await {
                Ok(Ok(bytes)) => {
                    self.inner.stats.peer_hits.fetch_add(1, Ordering::Relaxed);
                    let view = ByteView::from(bytes);
                    self.populate(key, view.clone());
                    return Ok(view);
                }
                Ok(Err(err)) => {
                    self.inner.stats.peer_misses.fetch_add(1, Ordering::Relaxed);
                    warn!(group = %self.inner.name, key, %err, "failed to get from peer");
                }
                Err(_) => {
                    self.inner.stats.peer_misses.fetch_add(1, Ordering::Relaxed);
                    warn!(group = %self.inner.name, key, "peer get timed out");
                }
            }
        }

        let bytes = self
            .inner
            .getter
            .get(ctx, key)
            .await
            .map_err(|cause| GroupError::load(key, cause))?;
        self.inner.stats.loader_hits.fetch_add(1, Ordering::Relaxed);
        let view = ByteView::from(bytes);
        self.populate(key, view.clone());
        Ok(view)
    }

    fn populate(&self, key: &str, view: ByteView) {
        match self.inner.expiration {
            Some(ttl) => self
                .inner
                .cache
                .set_with_expiration(key, view, Instant::now() + ttl),
            None => self.inner.cache.set(key, view),
        }
    }

    /// Fire-and-forget replication of a mutation to the owning peer. The
    /// propagated context carries the `from_peer` marker, which is what
    /// stops the receiving node from relaying it again.
    async fn sync_to_peers(&self, key: &str, op: SyncOp) {
        let Some(peers) = &self.inner.peers else {
            return;
        };
        let PeerChoice::Remote(peer) = peers.pick_peer(key) else {
            return;
        };

        let ctx = Context::from_peer();
        let result = match op {
            SyncOp::Set(value) => peer.set(ctx, &self.inner.name, key, value).await,
            SyncOp::Delete => match tokio::time::timeout(
                RPC_TIMEOUT,
                peer.delete(&self.inner.name, key),
            )
            .await
            {
                Ok(outcome) => outcome.map(|_existed| ()),
                Err(_) => Err(crate::peer::PeerError::Timeout),
            },
        };

        if let Err(err) = result {
            error!(group = %self.inner.name, key, %err, "failed to sync to peer");
        }
    }
}
