//! Ring configuration.

use serde::Deserialize;

/// Hash function placing keys and virtual nodes on the ring.
pub type HashFn = fn(&[u8]) -> u64;

/// Tuning knobs for a [`crate::Ring`].
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RingConfig {
    /// Virtual nodes created per real node on `add`.
    #[serde(default = "default_replicas")]
    pub default_replicas: usize,

    /// Lower clamp applied when the rebalancer shrinks a hot node.
    #[serde(default = "default_min_replicas")]
    pub min_replicas: usize,

    /// Upper clamp applied when the rebalancer grows a cold node.
    #[serde(default = "default_max_replicas")]
    pub max_replicas: usize,

    /// Relative deviation from mean load that triggers a rebalance.
    #[serde(default = "default_load_balance_threshold")]
    pub load_balance_threshold: f64,

    /// Ring hash function (FNV-1a unless overridden in code).
    #[serde(skip_deserializing, default = "default_hash")]
    pub hash: HashFn,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            default_replicas: default_replicas(),
            min_replicas: default_min_replicas(),
            max_replicas: default_max_replicas(),
            load_balance_threshold: default_load_balance_threshold(),
            hash: default_hash(),
        }
    }
}

fn default_replicas() -> usize {
    50
}

fn default_min_replicas() -> usize {
    10
}

fn default_max_replicas() -> usize {
    200
}

fn default_load_balance_threshold() -> f64 {
    0.25
}

fn default_hash() -> HashFn {
    fnv1a
}

/// FNV-1a hash (64-bit).
pub fn fnv1a(data: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &byte in data {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}
