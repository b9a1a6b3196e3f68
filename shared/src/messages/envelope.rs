use tether_serde::{ByteReader, ByteWriter, Serde, SerdeErr};

use crate::{
    messages::{delivery::DeliveryClass, message_kind::MessageKind, rpc::RpcHash},
    types::{PeerId, Tick},
};

/// One framed application or control message, built per send
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageEnvelope {
    pub kind: MessageKind,
    pub payload: Vec<u8>,
    pub delivery: DeliveryClass,
    pub targets: Vec<PeerId>,
    pub tick: Option<Tick>,
    pub rpc_hash: Option<RpcHash>,
}

impl MessageEnvelope {
    pub fn new(kind: MessageKind, delivery: DeliveryClass, payload: Vec<u8>) -> Self {
        Self {
            kind,
            payload,
            delivery,
            targets: Vec::new(),
            tick: None,
            rpc_hash: None,
        }
    }

    /// Builds an envelope addressed to the RPC handler registered under `hash`
    pub fn rpc(hash: RpcHash, delivery: DeliveryClass, payload: Vec<u8>) -> Self {
        let mut envelope = Self::new(MessageKind::RPC, delivery, payload);
        envelope.rpc_hash = Some(hash);
        envelope
    }

    pub fn to(mut self, peer: PeerId) -> Self {
        self.targets.push(peer);
        self
    }

    pub fn to_many(mut self, peers: impl IntoIterator<Item = PeerId>) -> Self {
        self.targets.extend(peers);
        self
    }

    pub fn stamped(mut self, tick: Tick) -> Self {
        self.tick = Some(tick);
        self
    }

    pub fn body_len(&self) -> usize {
        let rpc_len = if self.kind.is_rpc() { 4 } else { 0 };
        self.tick.byte_length() + rpc_len + self.payload.len()
    }

    /// Writes `[tick stamp][rpc hash if RPC][payload]`, the part of a message
    /// that may be split across fragments
    pub fn write_body(&self) -> Vec<u8> {
        let mut writer = ByteWriter::with_capacity(self.body_len());
        self.tick.ser(&mut writer);
        if self.kind.is_rpc() {
            writer.write_u32(self.rpc_hash.unwrap_or_default());
        }
        writer.write_bytes(&self.payload);
        writer.to_bytes()
    }
}

/// A fully reassembled message as seen by handlers
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    pub sender: PeerId,
    pub kind: MessageKind,
    pub delivery: DeliveryClass,
    pub tick: Option<Tick>,
    pub rpc_hash: Option<RpcHash>,
    pub payload: Box<[u8]>,
}

impl InboundMessage {
    pub fn read_body(
        sender: PeerId,
        kind: MessageKind,
        delivery: DeliveryClass,
        body: &[u8],
    ) -> Result<Self, SerdeErr> {
        let mut reader = ByteReader::new(body);
        let tick = Option::<Tick>::de(&mut reader)?;
        let rpc_hash = if kind.is_rpc() {
            Some(reader.read_u32()?)
        } else {
            None
        };
        let payload = reader.read_rest().into();

        Ok(Self {
            sender,
            kind,
            delivery,
            tick,
            rpc_hash,
            payload,
        })
    }
}
