use std::collections::HashMap;

use tether_shared::{PeerDirectory, PeerId, SERVER_PEER_ID};

use crate::connection::peer::Peer;

/// Every peer the session knows about. Remote ids are allocated from 1
/// upward and never reused while the session runs.
pub struct PeerRoster {
    peers: HashMap<PeerId, Peer>,
    next_peer_id: PeerId,
}

impl Default for PeerRoster {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerRoster {
    pub fn new() -> Self {
        Self {
            peers: HashMap::new(),
            next_peer_id: SERVER_PEER_ID + 1,
        }
    }

    pub fn allocate_id(&mut self) -> PeerId {
        let id = self.next_peer_id;
        self.next_peer_id += 1;
        id
    }

    pub fn insert(&mut self, peer: Peer) {
        self.peers.insert(peer.id(), peer);
    }

    pub fn get(&self, peer: &PeerId) -> Option<&Peer> {
        self.peers.get(peer)
    }

    pub(crate) fn get_mut(&mut self, peer: &PeerId) -> Option<&mut Peer> {
        self.peers.get_mut(peer)
    }

    pub fn remove(&mut self, peer: &PeerId) -> Option<Peer> {
        self.peers.remove(peer)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Peer ids in ascending order
    pub fn ids(&self) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self.peers.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Connected peer ids in ascending order
    pub fn connected_ids(&self) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self
            .peers
            .values()
            .filter(|peer| peer.is_connected())
            .map(Peer::id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn iter(&self) -> impl Iterator<Item = &Peer> {
        self.peers.values()
    }

    /// Drops every peer and restarts id allocation, for a fresh session
    pub fn clear(&mut self) {
        self.peers.clear();
        self.next_peer_id = SERVER_PEER_ID + 1;
    }
}

impl PeerDirectory for PeerRoster {
    fn contains(&self, peer: &PeerId) -> bool {
        self.peers.contains_key(peer)
    }

    fn is_connected(&self, peer: &PeerId) -> bool {
        self.peers.get(peer).is_some_and(Peer::is_connected)
    }
}
