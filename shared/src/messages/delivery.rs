use tether_serde::{ByteReader, ByteWriter, ConstByteLength, Serde, SerdeErr};

/// Reliability and ordering guarantee of a channel
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DeliveryClass {
    /// May be lost; never fragmented
    Unreliable,
    /// Delivered once, in send order within the channel
    ReliableSequenced,
    /// Delivered once; large payloads are split into fragments
    ReliableFragmented,
}

impl DeliveryClass {
    /// Every class, in the order outbound batches are flushed
    pub const ALL: [DeliveryClass; 3] = [
        DeliveryClass::ReliableSequenced,
        DeliveryClass::ReliableFragmented,
        DeliveryClass::Unreliable,
    ];

    pub fn is_reliable(&self) -> bool {
        !matches!(self, DeliveryClass::Unreliable)
    }

    fn to_index(self) -> u8 {
        match self {
            DeliveryClass::Unreliable => 0,
            DeliveryClass::ReliableSequenced => 1,
            DeliveryClass::ReliableFragmented => 2,
        }
    }
}

impl Serde for DeliveryClass {
    fn ser(&self, writer: &mut ByteWriter) {
        writer.write_u8(self.to_index());
    }

    fn de(reader: &mut ByteReader) -> Result<Self, SerdeErr> {
        match reader.read_u8()? {
            0 => Ok(DeliveryClass::Unreliable),
            1 => Ok(DeliveryClass::ReliableSequenced),
            2 => Ok(DeliveryClass::ReliableFragmented),
            // SECURITY: malformed packets could carry any index
            other => Err(SerdeErr::InvalidValue {
                type_name: "DeliveryClass",
                value: u64::from(other),
            }),
        }
    }

    fn byte_length(&self) -> usize {
        1
    }
}

impl ConstByteLength for DeliveryClass {
    fn const_byte_length() -> usize {
        1
    }
}
