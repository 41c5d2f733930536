//! Store sizing configuration.

use crate::store::CacheType;
use serde::Deserialize;
use std::time::Duration;

/// Sizing and policy knobs shared by the store backends.
///
/// Loadable from TOML; byte sizes accept human-readable strings ("8MB").
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// Eviction backend: "lru" or "lru2".
    #[serde(default)]
    pub cache_type: CacheType,

    /// Byte bound for the LRU backend (0 disables the bound).
    #[serde(default = "default_max_bytes", deserialize_with = "deserialize_size")]
    pub max_bytes: usize,

    /// Number of shards for the LRU-2 backend (rounded up to a power of two).
    #[serde(default = "default_bucket_count")]
    pub bucket_count: u16,

    /// Admission-level capacity per LRU-2 shard.
    #[serde(default = "default_cap_per_bucket")]
    pub cap_per_bucket: u16,

    /// Main-level capacity per LRU-2 shard.
    #[serde(default = "default_level2_cap")]
    pub level2_cap: u16,

    /// Background expiry sweep cadence in milliseconds.
    #[serde(default = "default_cleanup_interval_ms")]
    pub cleanup_interval_ms: u64,
}

impl StoreConfig {
    /// Sweep cadence as a `Duration`.
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            cache_type: CacheType::default(),
            max_bytes: default_max_bytes(),
            bucket_count: default_bucket_count(),
            cap_per_bucket: default_cap_per_bucket(),
            level2_cap: default_level2_cap(),
            cleanup_interval_ms: default_cleanup_interval_ms(),
        }
    }
}

fn default_max_bytes() -> usize {
    8 * 1024 * 1024 // 8MB
}

fn default_bucket_count() -> u16 {
    16
}

fn default_cap_per_bucket() -> u16 {
    512
}

fn default_level2_cap() -> u16 {
    256
}

fn default_cleanup_interval_ms() -> u64 {
    60_000
}

/// Deserialize a size field that may be a number or a string like "64MB".
fn deserialize_size<'de, D>(deserializer: D) -> Result<usize, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum SizeValue {
        Number(usize),
        String(String),
    }

    match SizeValue::deserialize(deserializer)? {
        SizeValue::Number(n) => Ok(n),
        SizeValue::String(s) => parse_size(&s).map_err(D::Error::custom),
    }
}

/// Parse a size string like "64MB" or "4GB" into bytes.
pub fn parse_size(s: &str) -> Result<usize, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty size string".to_string());
    }

    let (num_str, suffix) = match s.find(|c: char| c.is_alphabetic()) {
        Some(idx) => (&s[..idx], s[idx..].to_uppercase()),
        None => (s, String::new()),
    };

    let num: usize = num_str
        .trim()
        .parse()
        .map_err(|_| format!("invalid number: {}", num_str))?;

    let multiplier: usize = match suffix.as_str() {
        "" | "B" => 1,
        "K" | "KB" | "KIB" => 1024,
        "M" | "MB" | "MIB" => 1024 * 1024,
        "G" | "GB" | "GIB" => 1024 * 1024 * 1024,
        _ => return Err(format!("unknown size suffix: {}", suffix)),
    };

    num.checked_mul(multiplier)
        .ok_or_else(|| "size overflow".to_string())
}
