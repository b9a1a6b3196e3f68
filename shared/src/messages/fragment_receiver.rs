use std::collections::{BTreeMap, HashMap};

use crate::{
    messages::{
        constants::{DEFAULT_FRAGMENTED_MESSAGE_MAX_BYTES, DEFAULT_MAX_PARTIAL_MESSAGES_PER_PEER},
        delivery::DeliveryClass,
        error::ReceiverError,
        frame::{FragmentInfo, Frame},
        message_kind::MessageKind,
    },
    types::{MessageId, PeerId, Tick},
};

struct PartialMessage {
    kind: MessageKind,
    delivery: DeliveryClass,
    count: u16,
    bytes: usize,
    started: Tick,
    fragments: BTreeMap<u16, Box<[u8]>>,
}

/// Reassembles fragmented messages, keyed by sending peer and message id.
/// Memory held per peer is bounded by the message size limit and the number
/// of messages a peer may have in reassembly at once.
pub struct FragmentReceiver {
    map: HashMap<(PeerId, MessageId), PartialMessage>,
    max_message_bytes: usize,
    max_partials_per_peer: usize,
}

impl Default for FragmentReceiver {
    fn default() -> Self {
        Self::new(
            DEFAULT_FRAGMENTED_MESSAGE_MAX_BYTES,
            DEFAULT_MAX_PARTIAL_MESSAGES_PER_PEER,
        )
    }
}

impl FragmentReceiver {
    pub fn new(max_message_bytes: usize, max_partials_per_peer: usize) -> Self {
        Self {
            map: HashMap::new(),
            max_message_bytes,
            max_partials_per_peer,
        }
    }

    /// Attempt to receive and reassemble a fragmented message
    ///
    /// Returns Ok(None) if more fragments are needed, Ok(Some(...)) with the
    /// concatenated body once every fragment has arrived, or Err if the frame
    /// contradicts what was received before or would exceed a limit
    pub fn try_receive(
        &mut self,
        sender: PeerId,
        frame: Frame,
        now: Tick,
    ) -> Result<Option<(MessageKind, Box<[u8]>)>, ReceiverError> {
        let Some(info) = frame.fragment else {
            return Err(ReceiverError::NonFragmentedMessage);
        };
        if frame.payload.is_empty() {
            return Err(ReceiverError::EmptyFragment { index: info.index });
        }
        let key = (sender, info.message_id);
        let limit = self.max_message_bytes;

        if !self.map.contains_key(&key) {
            let size = smallest_message_len(info, frame.payload.len());
            if size > limit {
                return Err(ReceiverError::MessageTooLarge { size, limit });
            }
            if self.in_flight_for(&sender) >= self.max_partials_per_peer {
                return Err(ReceiverError::TooManyPartialMessages {
                    peer_id: sender,
                    limit: self.max_partials_per_peer,
                });
            }
        }

        let partial = self.map.entry(key).or_insert_with(|| PartialMessage {
            kind: frame.kind,
            delivery: frame.delivery,
            count: info.count,
            bytes: 0,
            started: now,
            fragments: BTreeMap::new(),
        });

        if partial.count != info.count {
            let expected = partial.count;
            self.map.remove(&key);
            return Err(ReceiverError::FragmentCountMismatch {
                expected,
                received: info.count,
            });
        }
        if partial.kind != frame.kind || partial.delivery != frame.delivery {
            self.map.remove(&key);
            return Err(ReceiverError::FragmentHeaderMismatch);
        }
        if partial.fragments.contains_key(&info.index) {
            return Err(ReceiverError::DuplicateFragment { index: info.index });
        }

        let size = partial.bytes + frame.payload.len();
        if size > limit {
            self.map.remove(&key);
            return Err(ReceiverError::MessageTooLarge { size, limit });
        }
        partial.bytes = size;
        partial.fragments.insert(info.index, frame.payload);

        if partial.fragments.len() != usize::from(info.count) {
            return Ok(None);
        }

        // we have received all fragments! put it all together
        let Some(partial) = self.map.remove(&key) else {
            return Ok(None);
        };
        let mut body = Vec::with_capacity(partial.bytes);
        for fragment in partial.fragments.into_values() {
            body.extend_from_slice(&fragment);
        }
        Ok(Some((partial.kind, body.into_boxed_slice())))
    }

    /// Discards messages that started reassembly `timeout_ticks` or more
    /// before `now`. Returns the number discarded.
    pub fn discard_stale(&mut self, now: Tick, timeout_ticks: u32) -> usize {
        let before = self.map.len();
        self.map
            .retain(|_, partial| now.saturating_sub(partial.started) < timeout_ticks);
        before - self.map.len()
    }

    /// Discards in-flight reassembly for a peer that has gone away
    pub fn discard_peer(&mut self, peer: &PeerId) {
        self.map.retain(|(sender, _), _| sender != peer);
    }

    pub fn in_flight(&self) -> usize {
        self.map.len()
    }

    pub fn in_flight_for(&self, peer: &PeerId) -> usize {
        self.map.keys().filter(|(sender, _)| sender == peer).count()
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }
}

// Every fragment but the last carries a full chunk, so one fragment already
// tells how small the whole message can be
fn smallest_message_len(info: FragmentInfo, payload_len: usize) -> usize {
    let others = usize::from(info.count) - 1;
    if info.index + 1 < info.count {
        others.saturating_mul(payload_len).saturating_add(1)
    } else {
        others.saturating_add(payload_len)
    }
}
