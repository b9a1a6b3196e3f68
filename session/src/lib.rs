//! # Tether
//! The session layer of a client-server multiplayer stack: runs connection
//! lifecycle and approval, batched and fragmented message routing, RPC
//! dispatch, deferred delivery and tick synchronization through three fixed
//! stages per frame, on top of any datagram transport.

#![deny(
    trivial_casts,
    trivial_numeric_casts,
    unstable_features,
    unused_import_braces
)]

pub mod shared {
    pub use tether_shared::{
        align_mtu, rpc_hash, ByteReader, ByteWriter, ConstByteLength, Serde, SerdeErr,
        DEFAULT_FRAGMENTED_MESSAGE_MAX_BYTES, DEFAULT_MTU_BYTES, FRAGMENTED_FRAME_HEADER_BYTES,
        FRAME_HEADER_BYTES, MIN_MTU_BYTES,
    };
}

mod connection;
mod error;
mod scheduler;
mod session;

pub use connection::{
    approval::{
        ApprovalCallback, ApprovalConfig, ApprovalManager, ApprovalState,
        ConnectionApprovalRequest, ConnectionApprovalResponse,
    },
    connection_manager::{
        ConnectedCallback, ConnectionManager, DisconnectedCallback, TransportFailureCallback,
        REASON_APPROVAL_TIMED_OUT, REASON_CONNECTION_LOST, REASON_REJECTED,
        REASON_REQUEST_TIMED_OUT, REASON_SERVER_SHUTDOWN,
    },
    peer::{ConnectionState, Peer, PeerRoles},
    roster::PeerRoster,
};
pub use error::{SchedulerError, SessionError};
pub use scheduler::{UpdateScheduler, UpdateStage};
pub use session::{NetworkStats, Session, SessionConfig, TelemetryCallback};

pub use tether_shared::{
    ConnectionConfig, DeferredMessageManager, DeliveryClass, Dispatch, DispatchContext,
    InboundMessage, MessageEnvelope, MessageHandler, MessageHook, MessageKind,
    MessageManagerError, MessageStats, PeerId, RpcError, RpcHash, SubscriberHandle,
    SystemMessage, Tick, TickConfig, Transport, TransportError, TransportEvent, TransportId,
    TriggerKey, SERVER_PEER_ID,
};
