//! Outbound peer contract.
//!
//! A [`Peer`] is an outbound handle to another cache node; a [`PeerPicker`]
//! decides which node owns a key. Both are transport-agnostic: the wire
//! protocol only has to carry the three calls below and must tag inbound
//! mutations with [`crate::Context::from_peer`] before dispatching them to a
//! group.

use crate::context::Context;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

/// Deadline applied to outbound peer get/delete calls. Set propagation
/// carries its caller's context instead.
pub const RPC_TIMEOUT: Duration = Duration::from_secs(3);

/// Outbound transport failures.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("peer transport error: {0}")]
    Transport(String),
    #[error("peer request timed out")]
    Timeout,
    #[error("peer connection closed")]
    Closed,
}

/// Outbound handle to the cache node that owns a key.
#[async_trait]
pub trait Peer: Send + Sync {
    /// Fetch a value from the remote group.
    async fn get(&self, group: &str, key: &str) -> Result<Bytes, PeerError>;

    /// Store a value in the remote group.
    async fn set(&self, ctx: Context, group: &str, key: &str, value: Bytes)
    -> Result<(), PeerError>;

    /// Delete a key from the remote group. Returns whether it existed.
    async fn delete(&self, group: &str, key: &str) -> Result<bool, PeerError>;

    /// Release the underlying connection.
    async fn close(&self) -> Result<(), PeerError>;
}

/// Outcome of routing a key.
pub enum PeerChoice {
    /// No ring, no nodes, or no client for the owner: use the local path.
    Unavailable,
    /// This node owns the key.
    Local,
    /// A remote node owns the key.
    Remote(Arc<dyn Peer>),
}

/// Routes keys to their owning node.
pub trait PeerPicker: Send + Sync {
    fn pick_peer(&self, key: &str) -> PeerChoice;
}
