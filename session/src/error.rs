use thiserror::Error;

use tether_shared::{MessageManagerError, PeerId, RpcError, TransportError};

use crate::scheduler::UpdateStage;

/// Errors raised by the frame stage cursor
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    /// A stage was invoked before the one that must precede it
    #[error("Update stage {requested:?} invoked out of order; expected {expected:?}. Call early_update, pre_update and post_late_update once each per frame, in that order")]
    OutOfOrder {
        expected: UpdateStage,
        requested: UpdateStage,
    },

    /// A stage was invoked while another stage was still running
    #[error("Update stage {requested:?} invoked while {running:?} is still running")]
    Reentered {
        running: UpdateStage,
        requested: UpdateStage,
    },
}

/// Errors returned by the session handle
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Start requested while a session is already running
    #[error("Session is already listening. Shut it down before starting again")]
    AlreadyListening,

    /// No transport installed
    #[error("No transport is installed. Call set_transport before starting the session")]
    TransportMissing,

    /// Operation requires a running session
    #[error("Session is not listening")]
    NotListening,

    /// Second approval callback registered
    #[error("A connection approval callback is already registered. Clear it before registering another")]
    ApprovalCallbackAlreadyRegistered,

    /// Server-only operation called on a client
    #[error("{operation} is only available on a server or host")]
    NotServer { operation: &'static str },

    /// Operation not valid for this peer
    #[error("Operation is not valid for peer {peer_id}: {reason}")]
    InvalidPeer {
        peer_id: PeerId,
        reason: &'static str,
    },

    /// No approval is pending for the peer
    #[error("No connection approval is pending for peer {peer_id}")]
    UnknownPendingApproval { peer_id: PeerId },

    /// Transport error
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Message manager error
    #[error("Message error: {0}")]
    MessageManager(#[from] MessageManagerError),

    /// RPC table error
    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    /// Scheduler error
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
}
