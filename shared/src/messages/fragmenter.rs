use crate::{
    messages::{
        delivery::DeliveryClass,
        error::FragmentationError,
        frame::{FragmentInfo, Frame, FRAGMENTED_FRAME_HEADER_BYTES},
        message_kind::MessageKind,
    },
    types::MessageId,
};

/// Splits message bodies that exceed an MTU into ordered fragments
pub struct MessageFragmenter {
    next_message_id: MessageId,
}

impl Default for MessageFragmenter {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageFragmenter {
    pub fn new() -> Self {
        Self { next_message_id: 0 }
    }

    /// Splits `body` into frames that each fit `mtu`. Every fragment shares
    /// one message id and stays on the channel the message was queued on, so
    /// it keeps its place among the other messages of that channel.
    pub fn fragment(
        &mut self,
        kind: MessageKind,
        delivery: DeliveryClass,
        body: &[u8],
        mtu: usize,
    ) -> Result<Vec<Frame>, FragmentationError> {
        if mtu <= FRAGMENTED_FRAME_HEADER_BYTES {
            return Err(FragmentationError::MtuTooSmall { mtu });
        }
        let chunk_size = mtu - FRAGMENTED_FRAME_HEADER_BYTES;
        let fragment_count = body.len().div_ceil(chunk_size).max(1);

        // a count of 1 would be read back as an unfragmented frame
        if fragment_count == 1 {
            return Ok(vec![Frame::whole(kind, delivery, body.into())]);
        }
        let Ok(count) = u16::try_from(fragment_count) else {
            return Err(FragmentationError::FragmentLimitExceeded {
                limit: u32::from(u16::MAX),
                fragment_count,
            });
        };

        let message_id = self.next_message_id;
        self.next_message_id = self.next_message_id.wrapping_add(1);

        let frames = body
            .chunks(chunk_size)
            .enumerate()
            .map(|(index, chunk)| Frame {
                kind,
                delivery,
                fragment: Some(FragmentInfo {
                    message_id,
                    // bounded by `count`, which fits u16
                    index: index as u16,
                    count,
                }),
                payload: chunk.into(),
            })
            .collect();

        Ok(frames)
    }
}
