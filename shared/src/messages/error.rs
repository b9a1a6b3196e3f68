use thiserror::Error;

use tether_serde::SerdeErr;

/// Errors that can occur during message manager operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageManagerError {
    /// Envelope had no targets
    #[error("Message envelope has an empty target set. Add at least one peer before sending")]
    EmptyTargets,

    /// Message body exceeds the fragmented-message limit
    #[error("Message body of {size} bytes exceeds the fragmented message limit of {limit} bytes")]
    MessageTooLarge { size: usize, limit: usize },

    /// Attempted to register a handler for a kind reserved by the session layer
    #[error("Message kind {kind} is reserved for session control messages. Use MessageKind::FIRST_USER_KIND or above")]
    ReservedMessageKind { kind: u32 },

    /// No channels exist for the peer
    #[error("Peer {peer_id} has no message channels. Add the peer before sending to it")]
    UnknownPeer { peer_id: u64 },

    /// RPC envelope was built without a handler hash
    #[error("RPC message is missing its handler hash. Build it with MessageEnvelope::rpc")]
    MissingRpcHash,

    /// A handler is already registered for this kind
    #[error("A handler for message kind {kind} is already registered")]
    HandlerAlreadyRegistered { kind: u32 },
}

/// Errors that can occur during message fragmentation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FragmentationError {
    /// Fragment index limit exceeded
    #[error("Fragment index limit of {limit} exceeded: message would need {fragment_count} fragments. Raise the MTU or reduce the message size")]
    FragmentLimitExceeded { limit: u32, fragment_count: usize },

    /// Chunk size leaves no room for payload
    #[error("MTU of {mtu} bytes leaves no room for fragment payload")]
    MtuTooSmall { mtu: usize },
}

/// Errors that can occur while reassembling fragments
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReceiverError {
    /// Non-fragmented frame handed to the FragmentReceiver
    #[error("Received non-fragmented frame in FragmentReceiver. Only fragmented frames should be processed by this receiver")]
    NonFragmentedMessage,

    /// A later fragment disagrees with the first on the total count
    #[error("Fragment count mismatch: expected {expected}, received {received}. Fragment reassembly protocol violation")]
    FragmentCountMismatch { expected: u16, received: u16 },

    /// A later fragment disagrees with the first on kind or delivery class
    #[error("Fragment header mismatch: fragments of one message must share kind and delivery class")]
    FragmentHeaderMismatch,

    /// Same fragment index received twice
    #[error("Received duplicate fragment with index {index}")]
    DuplicateFragment { index: u16 },

    /// Fragments always carry at least one byte
    #[error("Received empty fragment with index {index}")]
    EmptyFragment { index: u16 },

    /// The fragments of one message add up to more than the message limit
    #[error("Fragmented message reaches at least {size} bytes, over the {limit} byte limit")]
    MessageTooLarge { size: usize, limit: usize },

    /// The sender already has as many messages in reassembly as allowed
    #[error("Peer {peer_id} already has {limit} fragmented messages in reassembly")]
    TooManyPartialMessages { peer_id: u64, limit: usize },
}

/// Errors that can occur while building or using the RPC table
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    /// Table no longer accepts registrations
    #[error("RPC table is locked; register '{signature}' before the session starts")]
    TableLocked { signature: String },

    /// Signature registered twice
    #[error("RPC '{signature}' is already registered")]
    DuplicateSignature { signature: String },

    /// Two different signatures hash to the same value
    #[error("RPC '{signature}' hashes to {hash:#010x}, which is already used by '{existing}'")]
    HashCollision {
        hash: u32,
        existing: String,
        signature: String,
    },

    /// Received an RPC whose hash is not in the table
    #[error("No RPC handler registered for hash {hash:#010x}")]
    UnknownHash { hash: u32 },
}

/// Umbrella error for the message layer. Every error an inbound frame can
/// run into on its way to a handler is reported as one of these.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageError {
    /// Message manager error
    #[error("Message manager error: {0}")]
    MessageManager(#[from] MessageManagerError),

    /// Fragmentation error
    #[error("Fragmentation error: {0}")]
    Fragmentation(#[from] FragmentationError),

    /// Reassembly error
    #[error("Receiver error: {0}")]
    Receiver(#[from] ReceiverError),

    /// RPC error
    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    /// Malformed wire data
    #[error("Malformed message: {0}")]
    Serde(#[from] SerdeErr),
}
