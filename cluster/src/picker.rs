//! Ring-backed peer picker.

use crate::peer::{Peer, PeerChoice, PeerPicker};
use ember_ring::{Ring, RingError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Picks the owner of a key off a consistent hash ring.
///
/// Holds this node's own advertised address, the ring, and the outbound
/// client for every known remote node. Service discovery feeds node-up and
/// node-down events in through [`add_peer`](Self::add_peer) and
/// [`remove_peer`](Self::remove_peer); the picker keeps the ring in step.
pub struct RingPicker {
    self_addr: String,
    ring: Ring,
    peers: RwLock<HashMap<String, Arc<dyn Peer>>>,
}

impl RingPicker {
    /// Create a picker for the node advertised at `self_addr`, placing that
    /// node on the ring.
    pub fn new(self_addr: impl Into<String>, ring: Ring) -> Result<Self, RingError> {
        let self_addr = self_addr.into();
        ring.add(&[self_addr.as_str()])?;
        Ok(Self {
            self_addr,
            ring,
            peers: RwLock::new(HashMap::new()),
        })
    }

    /// This node's advertised address.
    pub fn self_addr(&self) -> &str {
        &self.self_addr
    }

    /// Node-up: place `addr` on the ring with an outbound client.
    pub fn add_peer(&self, addr: impl Into<String>, peer: Arc<dyn Peer>) -> Result<(), RingError> {
        let addr = addr.into();
        self.ring.add(&[addr.as_str()])?;
        self.peers.write().insert(addr.clone(), peer);
        info!(addr = %addr, "peer joined");
        Ok(())
    }

    /// Node-down: drop `addr` from the ring and its client.
    pub fn remove_peer(&self, addr: &str) -> Result<(), RingError> {
        self.ring.remove(addr)?;
        self.peers.write().remove(addr);
        info!(addr = %addr, "peer left");
        Ok(())
    }

    /// Per-node load fractions observed by the ring.
    pub fn stats(&self) -> HashMap<String, f64> {
        self.ring.stats()
    }
}

impl PeerPicker for RingPicker {
    fn pick_peer(&self, key: &str) -> PeerChoice {
        let Some(owner) = self.ring.get(key) else {
            return PeerChoice::Unavailable;
        };
        if owner == self.self_addr {
            return PeerChoice::Local;
        }
        match self.peers.read().get(&owner) {
            Some(peer) => PeerChoice::Remote(peer.clone()),
            None => {
                warn!(owner = %owner, "owner has no registered client");
                PeerChoice::Unavailable
            }
        }
    }
}
