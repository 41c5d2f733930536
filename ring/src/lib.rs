//! Consistent hash ring with virtual nodes and adaptive rebalancing.
//!
//! Each real node is placed on the ring as `replicas` virtual nodes hashed
//! from `"{node}-{i}"`. A key is owned by the first virtual node clockwise
//! from its hash (wrapping at the end of the ring). Lookups record per-node
//! hit counts; a background rebalancer compares observed load against the
//! mean once per second and, past a configurable imbalance threshold,
//! shrinks the replica count of hot nodes and grows cold ones, clamped to a
//! configured range.

mod config;

pub use config::{HashFn, RingConfig, fnv1a};

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;
use tracing::debug;

/// Rebalance cadence.
const BALANCE_INTERVAL: Duration = Duration::from_secs(1);

/// Samples below this are too noisy to act on.
const MIN_REBALANCE_SAMPLE: u64 = 1000;

/// Errors from ring membership operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RingError {
    #[error("no nodes provided")]
    NoNodes,
    #[error("invalid node name")]
    InvalidNode,
    #[error("node {0} not found")]
    UnknownNode(String),
    #[error("node {0} already registered; remove it before re-adding")]
    NodeExists(String),
}

/// Consistent hash ring.
///
/// Owns its rebalancer thread; dropping the ring stops it.
pub struct Ring {
    shared: Arc<Shared>,
    stop: crossbeam_channel::Sender<()>,
}

struct Shared {
    config: RingConfig,
    state: RwLock<State>,
    total_requests: AtomicU64,
}

#[derive(Default)]
struct State {
    /// Sorted virtual-node hashes.
    keys: Vec<u64>,
    /// Virtual-node hash to real node.
    hash_map: HashMap<u64, String>,
    /// Real node to its current replica count.
    replicas: HashMap<String, usize>,
    /// Observed per-node lookup counts since the last rebalance.
    counts: HashMap<String, AtomicU64>,
}

impl Ring {
    /// Create a ring with the default configuration.
    pub fn new() -> Self {
        Self::with_config(RingConfig::default())
    }

    /// Create a ring and start its rebalancer thread.
    pub fn with_config(config: RingConfig) -> Self {
        let shared = Arc::new(Shared {
            config,
            state: RwLock::new(State::default()),
            total_requests: AtomicU64::new(0),
        });

        let (stop, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let balance_target = shared.clone();
        thread::Builder::new()
            .name("ember-ring-balancer".into())
            .spawn(move || {
                let ticker = crossbeam_channel::tick(BALANCE_INTERVAL);
                loop {
                    crossbeam_channel::select! {
                        recv(ticker) -> _ => balance_target.check_and_rebalance(),
                        recv(stop_rx) -> _ => break,
                    }
                }
            })
            .expect("failed to spawn ring balancer thread");

        Self { shared, stop }
    }

    /// Add nodes to the ring, each with the configured default replica
    /// count. Empty names are skipped; re-adding a present node is an error.
    pub fn add<S: AsRef<str>>(&self, nodes: &[S]) -> Result<(), RingError> {
        if nodes.is_empty() {
            return Err(RingError::NoNodes);
        }

        let mut state = self.shared.state.write();
        for node in nodes {
            let node = node.as_ref();
            if !node.is_empty() && state.replicas.contains_key(node) {
                return Err(RingError::NodeExists(node.to_string()));
            }
        }
        for node in nodes {
            let node = node.as_ref();
            if node.is_empty() {
                continue;
            }
            state.add_node(&self.shared.config, node, self.shared.config.default_replicas);
        }
        state.keys.sort_unstable();
        Ok(())
    }

    /// Remove a node and all of its virtual nodes.
    pub fn remove(&self, node: &str) -> Result<(), RingError> {
        if node.is_empty() {
            return Err(RingError::InvalidNode);
        }
        let mut state = self.shared.state.write();
        state.remove_node(&self.shared.config, node)
    }

    /// Owner of `key`: the next virtual node clockwise. Returns `None` for
    /// an empty key or an empty ring. Records the hit against the owner.
    pub fn get(&self, key: &str) -> Option<String> {
        if key.is_empty() {
            return None;
        }

        let state = self.shared.state.read();
        if state.keys.is_empty() {
            return None;
        }

        let hash = (self.shared.config.hash)(key.as_bytes());
        let idx = state.keys.partition_point(|&k| k < hash);
        let idx = if idx == state.keys.len() { 0 } else { idx };
        let node = state.hash_map.get(&state.keys[idx])?.clone();

        if let Some(count) = state.counts.get(&node) {
            count.fetch_add(1, Ordering::Relaxed);
        }
        self.shared.total_requests.fetch_add(1, Ordering::Relaxed);

        Some(node)
    }

    /// Current real nodes, unordered.
    pub fn nodes(&self) -> Vec<String> {
        self.shared.state.read().replicas.keys().cloned().collect()
    }

    /// Per-node fraction of lookups since the last rebalance. Empty until
    /// any lookup happens.
    pub fn stats(&self) -> HashMap<String, f64> {
        let state = self.shared.state.read();
        let total = self.shared.total_requests.load(Ordering::Relaxed);
        if total == 0 {
            return HashMap::new();
        }
        state
            .counts
            .iter()
            .map(|(node, count)| {
                (node.clone(), count.load(Ordering::Relaxed) as f64 / total as f64)
            })
            .collect()
    }
}

impl Default for Ring {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Ring {
    fn drop(&mut self) {
        let _ = self.stop.try_send(());
    }
}

impl Shared {
    /// Rebalance when the observed imbalance exceeds the threshold. Small
    /// samples are ignored.
    fn check_and_rebalance(&self) {
        if self.total_requests.load(Ordering::Relaxed) < MIN_REBALANCE_SAMPLE {
            return;
        }

        let needs_rebalance = {
            let state = self.state.read();
            if state.replicas.is_empty() {
                return;
            }
            let total = self.total_requests.load(Ordering::Relaxed);
            let avg = total as f64 / state.replicas.len() as f64;
            let max_diff = state
                .counts
                .values()
                .map(|count| (count.load(Ordering::Relaxed) as f64 - avg).abs() / avg)
                .fold(0.0_f64, f64::max);
            max_diff > self.config.load_balance_threshold
        };

        if needs_rebalance {
            self.rebalance();
        }
    }

    /// Resize each node's replica count toward its observed load, then reset
    /// the counters. Holds the write lock throughout so lookups never see a
    /// half-built ring.
    fn rebalance(&self) {
        let mut state = self.state.write();
        if state.replicas.is_empty() {
            return;
        }

        let total = self.total_requests.load(Ordering::Relaxed);
        let avg = total as f64 / state.replicas.len() as f64;

        let plan: Vec<(String, usize)> = state
            .counts
            .iter()
            .map(|(node, count)| {
                let current = state.replicas.get(node).copied().unwrap_or(0);
                let load_ratio = count.load(Ordering::Relaxed) as f64 / avg;
                let resized = if load_ratio > 1.0 {
                    (current as f64 / load_ratio) as usize
                } else {
                    (current as f64 * (2.0 - load_ratio)) as usize
                };
                let clamped = resized.clamp(self.config.min_replicas, self.config.max_replicas);
                (node.clone(), clamped)
            })
            .collect();

        for (node, new_replicas) in plan {
            let current = state.replicas.get(&node).copied().unwrap_or(0);
            if new_replicas != current {
                debug!(node = %node, from = current, to = new_replicas, "resizing replicas");
                if state.remove_node(&self.config, &node).is_err() {
                    continue;
                }
                state.add_node(&self.config, &node, new_replicas);
            }
        }

        for count in state.counts.values() {
            count.store(0, Ordering::Relaxed);
        }
        self.total_requests.store(0, Ordering::Relaxed);
        state.keys.sort_unstable();
    }
}

impl State {
    fn add_node(&mut self, config: &RingConfig, node: &str, replicas: usize) {
        for i in 0..replicas {
            let hash = (config.hash)(format!("{node}-{i}").as_bytes());
            self.keys.push(hash);
            self.hash_map.insert(hash, node.to_string());
        }
        self.replicas.insert(node.to_string(), replicas);
        self.counts
            .entry(node.to_string())
            .or_insert_with(|| AtomicU64::new(0));
    }

    fn remove_node(&mut self, config: &RingConfig, node: &str) -> Result<(), RingError> {
        let replicas = self
            .replicas
            .get(node)
            .copied()
            .ok_or_else(|| RingError::UnknownNode(node.to_string()))?;

        for i in 0..replicas {
            let hash = (config.hash)(format!("{node}-{i}").as_bytes());
            self.hash_map.remove(&hash);
            if let Some(pos) = self.keys.iter().position(|&k| k == hash) {
                self.keys.remove(pos);
            }
        }
        self.replicas.remove(node);
        self.counts.remove(node);
        Ok(())
    }
}
