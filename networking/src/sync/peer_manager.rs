//! Peer registry for sync operations.
//!
//! Tracks connected peers and the chain head each one has announced.
use std::collections::HashMap;

use containers::Hash;
use parking_lot::Mutex;

use crate::types::{BestPeer, ConnectionState, PeerError, PeerProvider};

/// Head a peer has announced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerHead {
    pub hash: Hash,
    pub height: u64,
}

/// Sync-specific peer state.
#[derive(Debug, Clone)]
pub struct SyncPeer {
    pub peer_id: String,
    pub connection_state: ConnectionState,
    pub head: Option<PeerHead>,
}

impl SyncPeer {
    pub fn new(peer_id: impl Into<String>, connection_state: ConnectionState) -> Self {
        Self {
            peer_id: peer_id.into(),
            connection_state,
            head: None,
        }
    }

    /// Check if peer is connected.
    pub fn is_connected(&self) -> bool {
        self.connection_state == ConnectionState::Connected
    }
}

/// Peer registry.
///
/// Wrapped in a `Mutex` it serves as the node's [`PeerProvider`].
#[derive(Debug, Default, Clone)]
pub struct PeerManager {
    peers: HashMap<String, SyncPeer>,
}

impl PeerManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a peer, or refresh its connection state if already known.
    pub fn add_peer(&mut self, peer_id: &str, connection_state: ConnectionState) -> &mut SyncPeer {
        let peer = self
            .peers
            .entry(peer_id.to_string())
            .or_insert_with(|| SyncPeer::new(peer_id, connection_state));
        peer.connection_state = connection_state;
        peer
    }

    pub fn get_peer(&self, peer_id: &str) -> Option<&SyncPeer> {
        self.peers.get(peer_id)
    }

    pub fn update_connection_state(&mut self, peer_id: &str, state: ConnectionState) {
        if let Some(peer) = self.peers.get_mut(peer_id) {
            peer.connection_state = state;
        }
    }

    /// Record a peer's announced head. Unknown peers are ignored.
    pub fn set_peer_head(&mut self, peer_id: &str, hash: Hash, height: u64) {
        if let Some(peer) = self.peers.get_mut(peer_id) {
            peer.head = Some(PeerHead { hash, height });
        }
    }

    /// Connected peer with the highest announced head.
    ///
    /// Ties go to the lexicographically smallest peer id so every call picks
    /// the same peer for the same view.
    pub fn best_peer(&self) -> Result<BestPeer, PeerError> {
        let mut connected = self.peers.values().filter(|peer| peer.is_connected()).peekable();
        if connected.peek().is_none() {
            return Err(PeerError::NoPeers);
        }

        connected
            .filter_map(|peer| peer.head.map(|head| (peer, head)))
            .max_by(|(a, a_head), (b, b_head)| {
                a_head
                    .height
                    .cmp(&b_head.height)
                    .then_with(|| b.peer_id.cmp(&a.peer_id))
            })
            .map(|(peer, head)| BestPeer {
                peer_id: peer.peer_id.clone(),
                head_hash: head.hash,
                head_height: head.height,
            })
            .ok_or(PeerError::NoHead)
    }

    pub fn connected_peers(&self) -> impl Iterator<Item = &SyncPeer> {
        self.peers.values().filter(|peer| peer.is_connected())
    }
}

impl PeerProvider for Mutex<PeerManager> {
    fn best_peer_info(&self) -> Result<BestPeer, PeerError> {
        self.lock().best_peer()
    }
}
