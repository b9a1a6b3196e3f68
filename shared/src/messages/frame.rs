use tether_serde::{ByteReader, ByteWriter, Serde, SerdeErr};

use crate::{
    messages::{delivery::DeliveryClass, message_kind::MessageKind},
    types::MessageId,
};

/// kind + delivery + fragment index + fragment count + payload length
pub const FRAME_HEADER_BYTES: usize = 4 + 1 + 2 + 2 + 4;
/// Fragmented frames additionally carry the message id
pub const FRAGMENTED_FRAME_HEADER_BYTES: usize = FRAME_HEADER_BYTES + 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FragmentInfo {
    pub message_id: MessageId,
    pub index: u16,
    pub count: u16,
}

/// One unit on the wire. A packet is a concatenation of frames.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub kind: MessageKind,
    pub delivery: DeliveryClass,
    pub fragment: Option<FragmentInfo>,
    pub payload: Box<[u8]>,
}

impl Frame {
    pub fn whole(kind: MessageKind, delivery: DeliveryClass, body: Box<[u8]>) -> Self {
        Self {
            kind,
            delivery,
            fragment: None,
            payload: body,
        }
    }

    pub fn is_fragment(&self) -> bool {
        self.fragment.is_some()
    }

    pub fn header_len(&self) -> usize {
        if self.is_fragment() {
            FRAGMENTED_FRAME_HEADER_BYTES
        } else {
            FRAME_HEADER_BYTES
        }
    }

    /// Reads every frame in a packet. Fails on the first malformed frame.
    pub fn read_packet(packet: &[u8]) -> Result<Vec<Frame>, SerdeErr> {
        let mut reader = ByteReader::new(packet);
        let mut frames = Vec::new();
        while !reader.is_empty() {
            frames.push(Frame::de(&mut reader)?);
        }
        Ok(frames)
    }
}

impl Serde for Frame {
    fn ser(&self, writer: &mut ByteWriter) {
        self.kind.ser(writer);
        self.delivery.ser(writer);
        match &self.fragment {
            Some(info) => {
                writer.write_u16(info.index);
                writer.write_u16(info.count);
                writer.write_u16(info.message_id);
            }
            None => {
                writer.write_u16(0);
                writer.write_u16(1);
            }
        }
        // payloads are bounded by the fragmented-message limit, well below u32::MAX
        writer.write_u32(self.payload.len() as u32);
        writer.write_bytes(&self.payload);
    }

    fn de(reader: &mut ByteReader) -> Result<Self, SerdeErr> {
        let kind = MessageKind::de(reader)?;
        let delivery = DeliveryClass::de(reader)?;
        let index = reader.read_u16()?;
        let count = reader.read_u16()?;

        if count == 0 {
            return Err(SerdeErr::InvalidValue {
                type_name: "fragment count",
                value: 0,
            });
        }
        if index >= count {
            return Err(SerdeErr::InvalidValue {
                type_name: "fragment index",
                value: u64::from(index),
            });
        }

        let fragment = if count > 1 {
            let message_id = reader.read_u16()?;
            Some(FragmentInfo {
                message_id,
                index,
                count,
            })
        } else {
            None
        };

        let payload_len = reader.read_u32()? as usize;
        let payload = reader.read_bytes(payload_len)?.into();

        Ok(Self {
            kind,
            delivery,
            fragment,
            payload,
        })
    }

    fn byte_length(&self) -> usize {
        self.header_len() + self.payload.len()
    }
}
