use tether_serde::{ByteReader, ByteWriter, ConstByteLength, Serde, SerdeErr};

/// Wire identifier for the type of a message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageKind(u32);

impl MessageKind {
    pub const CONNECTION_REQUEST: MessageKind = MessageKind(1);
    pub const CONNECTION_APPROVED: MessageKind = MessageKind(2);
    pub const DISCONNECT: MessageKind = MessageKind(3);
    pub const TIME_SYNC: MessageKind = MessageKind(4);
    pub const RPC: MessageKind = MessageKind(5);

    /// Kinds below this value are reserved by the session layer
    pub const FIRST_USER_KIND: u32 = 64;

    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u32 {
        self.0
    }

    pub fn is_reserved(&self) -> bool {
        self.0 < Self::FIRST_USER_KIND
    }

    /// Control messages consumed by the connection manager rather than a handler
    pub fn is_system(&self) -> bool {
        self.is_reserved() && *self != MessageKind::RPC
    }

    pub fn is_rpc(&self) -> bool {
        *self == MessageKind::RPC
    }
}

impl Serde for MessageKind {
    fn ser(&self, writer: &mut ByteWriter) {
        writer.write_u32(self.0);
    }

    fn de(reader: &mut ByteReader) -> Result<Self, SerdeErr> {
        Ok(Self(reader.read_u32()?))
    }

    fn byte_length(&self) -> usize {
        4
    }
}

impl ConstByteLength for MessageKind {
    fn const_byte_length() -> usize {
        4
    }
}
