use tether_serde::{ByteReader, ByteWriter, Serde, SerdeErr};

use crate::{
    messages::{envelope::InboundMessage, message_kind::MessageKind},
    types::{PeerId, Tick},
};

/// Control messages exchanged by the connection manager
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SystemMessage {
    /// Client -> server, carries the application's approval payload
    ConnectionRequest { payload: Vec<u8> },
    /// Server -> client once the connection is accepted
    ConnectionApproved { peer_id: PeerId, server_tick: Tick },
    /// Either direction; the sender is closing the link
    Disconnect { reason: Option<String> },
    /// Server -> client, periodic
    TimeSync { server_tick: Tick },
}

impl SystemMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            SystemMessage::ConnectionRequest { .. } => MessageKind::CONNECTION_REQUEST,
            SystemMessage::ConnectionApproved { .. } => MessageKind::CONNECTION_APPROVED,
            SystemMessage::Disconnect { .. } => MessageKind::DISCONNECT,
            SystemMessage::TimeSync { .. } => MessageKind::TIME_SYNC,
        }
    }

    pub fn to_payload(&self) -> Vec<u8> {
        let mut writer = ByteWriter::new();
        match self {
            SystemMessage::ConnectionRequest { payload } => payload.ser(&mut writer),
            SystemMessage::ConnectionApproved {
                peer_id,
                server_tick,
            } => {
                peer_id.ser(&mut writer);
                server_tick.ser(&mut writer);
            }
            SystemMessage::Disconnect { reason } => reason.ser(&mut writer),
            SystemMessage::TimeSync { server_tick } => server_tick.ser(&mut writer),
        }
        writer.to_bytes()
    }

    pub fn from_inbound(message: &InboundMessage) -> Result<Self, SerdeErr> {
        let mut reader = ByteReader::new(&message.payload);
        let output = match message.kind {
            MessageKind::CONNECTION_REQUEST => SystemMessage::ConnectionRequest {
                payload: Vec::<u8>::de(&mut reader)?,
            },
            MessageKind::CONNECTION_APPROVED => SystemMessage::ConnectionApproved {
                peer_id: PeerId::de(&mut reader)?,
                server_tick: Tick::de(&mut reader)?,
            },
            MessageKind::DISCONNECT => SystemMessage::Disconnect {
                reason: Option::<String>::de(&mut reader)?,
            },
            MessageKind::TIME_SYNC => SystemMessage::TimeSync {
                server_tick: Tick::de(&mut reader)?,
            },
            other => {
                return Err(SerdeErr::InvalidValue {
                    type_name: "SystemMessage",
                    value: u64::from(other.value()),
                })
            }
        };
        Ok(output)
    }
}
