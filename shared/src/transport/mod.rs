mod error;

pub use error::TransportError;

use crate::{messages::delivery::DeliveryClass, types::TransportId};

/// Something the transport observed since the last poll
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// A link opened. On a client this is the link to the server.
    Connect(TransportId),
    Disconnect(TransportId),
    Data(TransportId, Box<[u8]>),
    /// Unrecoverable; the session shuts down
    TransportFailure(String),
}

/// Datagram transport the session runs on top of.
///
/// Every method is non-blocking. Transports that receive on another thread
/// must queue events and hand them out from [`Transport::poll_event`].
pub trait Transport {
    /// Begins listening. `Ok(false)` means the transport declined to start.
    fn start_server(&mut self) -> Result<bool, TransportError>;

    /// Begins connecting to the configured remote endpoint
    fn start_client(&mut self) -> Result<bool, TransportError>;

    /// Sends one packet on a link
    fn send(
        &mut self,
        transport_id: TransportId,
        payload: &[u8],
        delivery: DeliveryClass,
    ) -> Result<(), TransportError>;

    /// Returns the next queued event, or `None` when there is nothing left this frame
    fn poll_event(&mut self) -> Option<TransportEvent>;

    /// Closes one link
    fn disconnect_remote(&mut self, transport_id: TransportId);

    /// Closes every link and releases the event stream
    fn shutdown(&mut self);
}
