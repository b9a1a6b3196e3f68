use thiserror::Error;

use crate::types::TransportId;

/// Errors that can occur during transport operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Transport could not bind or connect
    #[error("Transport failed to start as {role}: {reason}")]
    StartFailed { role: &'static str, reason: String },

    /// Transport has not been started, or was shut down
    #[error("Transport is not running. Start it before sending")]
    NotStarted,

    /// No link exists for the given id
    #[error("Transport has no open link {transport_id:?}")]
    UnknownLink { transport_id: TransportId },

    /// The link exists but the send failed
    #[error("Failed to send {len} bytes on link {transport_id:?}: {reason}")]
    SendFailed {
        transport_id: TransportId,
        len: usize,
        reason: String,
    },
}
