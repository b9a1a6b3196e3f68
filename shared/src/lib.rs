//! # Tether Shared
//! Wire framing, message routing, deferral and the tick clock shared by every
//! tether session role.

#![deny(trivial_numeric_casts, unstable_features, unused_import_braces)]

pub use tether_serde::{ByteReader, ByteWriter, ConstByteLength, Serde, SerdeErr};

mod deferred;
mod messages;
mod peer_directory;
mod subscribers;
mod time;
mod transport;
mod types;

pub use deferred::deferred_message_manager::DeferredMessageManager;
pub use messages::{
    connection_config::ConnectionConfig,
    constants::{
        align_mtu, DEFAULT_FRAGMENTED_MESSAGE_MAX_BYTES, DEFAULT_MAX_PARTIAL_MESSAGES_PER_PEER,
        DEFAULT_MTU_BYTES, MIN_MTU_BYTES, MTU_ALIGNMENT_MASK,
    },
    delivery::DeliveryClass,
    envelope::{InboundMessage, MessageEnvelope},
    error::{FragmentationError, MessageError, MessageManagerError, ReceiverError, RpcError},
    fragment_receiver::FragmentReceiver,
    fragmenter::MessageFragmenter,
    frame::{FragmentInfo, Frame, FRAGMENTED_FRAME_HEADER_BYTES, FRAME_HEADER_BYTES},
    handler::{Dispatch, DispatchContext, MessageHandler},
    hooks::MessageHook,
    message_kind::MessageKind,
    message_manager::{MessageManager, MessageStats},
    outbound_batch::{FlushOutcome, OutboundBatch},
    rpc::{rpc_hash, RpcHash, RpcTable},
    system_messages::SystemMessage,
};
pub use peer_directory::PeerDirectory;
pub use subscribers::{SubscriberHandle, SubscriberList};
pub use time::{
    tick_config::TickConfig,
    time_manager::{TickAdjustment, TimeManager},
};
pub use transport::{Transport, TransportError, TransportEvent};
pub use types::{HostType, MessageId, PeerId, Tick, TransportId, TriggerKey, SERVER_PEER_ID};
