//! ember-core: shared building blocks for the ember cache stores.
//!
//! This crate defines the contract every eviction backend implements:
//!
//! - **Value**: the byte-length capability a store needs for capacity
//!   accounting, and [`ByteView`], the immutable payload the cluster layer
//!   stores.
//! - **Store**: the uniform Get/Set/SetTtl/Delete/Clear/Len/Close surface
//!   over any eviction policy, plus [`CacheType`] and [`StoreConfig`] for
//!   selecting and sizing a backend.
//! - **Clock**: a coarse virtual clock for cheap TTL stamping on hot paths.

mod clock;
mod config;
mod store;
mod value;

pub use clock::coarse_now;
pub use config::{StoreConfig, parse_size};
pub use store::{CacheType, EvictionCallback, Store};
pub use value::{ByteView, Value};
