use log::warn;

use tether_serde::{ByteWriter, Serde};

use crate::messages::{
    delivery::DeliveryClass, fragmenter::MessageFragmenter, frame::Frame,
    message_kind::MessageKind,
};

struct QueuedMessage {
    kind: MessageKind,
    body: Box<[u8]>,
}

/// Result of flushing one batch
#[derive(Default)]
pub struct FlushOutcome {
    /// Packets in send order, each no larger than the MTU used for the flush
    pub packets: Vec<(DeliveryClass, Box<[u8]>)>,
    pub messages: u64,
    pub dropped_unreliable: u64,
    pub dropped_unfragmentable: u64,
}

/// Messages queued for one peer on one delivery class, waiting for the next flush
pub struct OutboundBatch {
    delivery: DeliveryClass,
    messages: Vec<QueuedMessage>,
}

impl OutboundBatch {
    pub fn new(delivery: DeliveryClass) -> Self {
        Self {
            delivery,
            messages: Vec::new(),
        }
    }

    pub fn delivery(&self) -> DeliveryClass {
        self.delivery
    }

    pub fn push(&mut self, kind: MessageKind, body: Box<[u8]>) {
        self.messages.push(QueuedMessage { kind, body });
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Drains the batch into packets no larger than `mtu`. Oversized reliable
    /// messages are split into fragments on this batch's own delivery class;
    /// oversized unreliable messages are dropped and counted.
    pub fn flush(&mut self, fragmenter: &mut MessageFragmenter, mtu: usize) -> FlushOutcome {
        let mut outcome = FlushOutcome::default();
        let mut packer = PacketPacker::new(mtu);

        for message in self.messages.drain(..) {
            let frame = Frame::whole(message.kind, self.delivery, message.body);
            if frame.byte_length() <= mtu {
                packer.push(&frame);
                outcome.messages += 1;
                continue;
            }

            if !self.delivery.is_reliable() {
                warn!(
                    "Dropping unreliable message of kind {} ({} bytes framed) exceeding MTU of {} bytes",
                    frame.kind.value(),
                    frame.byte_length(),
                    mtu
                );
                outcome.dropped_unreliable += 1;
                continue;
            }

            match fragmenter.fragment(frame.kind, self.delivery, &frame.payload, mtu) {
                Ok(fragments) => {
                    for fragment in &fragments {
                        packer.push(fragment);
                    }
                    outcome.messages += 1;
                }
                Err(error) => {
                    warn!("Dropping message of kind {}: {}", frame.kind.value(), error);
                    outcome.dropped_unfragmentable += 1;
                }
            }
        }

        outcome.packets = packer.finish();
        outcome
    }
}

/// Concatenates frames of one delivery class into packets bounded by the MTU
struct PacketPacker {
    mtu: usize,
    current: Option<(DeliveryClass, ByteWriter)>,
    packets: Vec<(DeliveryClass, Box<[u8]>)>,
}

impl PacketPacker {
    fn new(mtu: usize) -> Self {
        Self {
            mtu,
            current: None,
            packets: Vec::new(),
        }
    }

    fn push(&mut self, frame: &Frame) {
        let frame_len = frame.byte_length();
        let fits = match &self.current {
            Some((delivery, writer)) => {
                *delivery == frame.delivery && writer.len() + frame_len <= self.mtu
            }
            None => false,
        };
        if !fits {
            self.close_packet();
            self.current = Some((frame.delivery, ByteWriter::with_capacity(self.mtu)));
        }
        if let Some((_, writer)) = &mut self.current {
            frame.ser(writer);
        }
    }

    fn close_packet(&mut self) {
        if let Some((delivery, writer)) = self.current.take() {
            if !writer.is_empty() {
                self.packets.push((delivery, writer.to_boxed()));
            }
        }
    }

    fn finish(mut self) -> Vec<(DeliveryClass, Box<[u8]>)> {
        self.close_packet();
        self.packets
    }
}
