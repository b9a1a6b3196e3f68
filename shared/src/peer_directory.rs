use crate::types::PeerId;

/// Read access to the peer roster, handed to the message manager so it can
/// route without owning connection state
pub trait PeerDirectory {
    fn contains(&self, peer: &PeerId) -> bool;

    fn is_connected(&self, peer: &PeerId) -> bool;
}
