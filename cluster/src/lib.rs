//! ember-cluster: the request pipeline of the distributed cache.
//!
//! A [`Group`] is one named keyspace on one node. Reads consult the local
//! store, then the owning peer (per the consistent hash ring), then the
//! authoritative backend [`Getter`] — with concurrent loads for the same key
//! coalesced by [`SingleFlight`]. Writes populate locally and replicate
//! asynchronously to the owning peer; mutations that arrived *from* a peer
//! carry the [`Context`] marker and are never re-broadcast, which is what
//! keeps replication loop-free.
//!
//! Groups are owned by a [`GroupManager`]; transports implement [`Peer`] and
//! feed discovery events into a [`RingPicker`].
//!
//! # Example
//!
//! ```no_run
//! use ember_cluster::{Context, GetterFn, Group, GroupManager, LoaderError};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), ember_cluster::GroupError> {
//! let getter = Arc::new(GetterFn(|_ctx: Context, key: String| async move {
//!     Ok::<_, LoaderError>(bytes::Bytes::from(format!("backend value for {key}")))
//! }));
//!
//! let manager = GroupManager::new();
//! let group = manager.register(Group::builder("users", getter).build());
//!
//! group.set(Context::new(), "alice", &b"profile"[..]).await?;
//! let value = group.get(Context::new(), "alice").await?;
//! assert_eq!(value.as_slice(), b"profile");
//! # Ok(())
//! # }
//! ```

mod config;
mod context;
mod error;
mod group;
mod local;
mod manager;
mod peer;
mod picker;
mod singleflight;

pub use config::CacheOptions;
pub use context::Context;
pub use error::{GroupError, LoaderError};
pub use group::{Getter, GetterFn, Group, GroupBuilder, GroupStats};
pub use local::CacheStats;
pub use manager::GroupManager;
pub use peer::{Peer, PeerChoice, PeerError, PeerPicker, RPC_TIMEOUT};
pub use picker::RingPicker;
pub use singleflight::SingleFlight;
