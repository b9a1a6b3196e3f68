pub type PeerId = u64;
pub type Tick = u32;
pub type MessageId = u16;

/// Peer id reserved for the server (and the host's local client)
pub const SERVER_PEER_ID: PeerId = 0;

/// Identifies a link as reported by the transport, before it is mapped to a
/// session-level [`PeerId`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransportId(pub u64);

/// The identity a deferred message is waiting on
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TriggerKey(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HostType {
    Server,
    Client,
}
