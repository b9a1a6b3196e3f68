use std::{default::Default, time::Duration};

use crate::messages::constants::{
    DEFAULT_FRAGMENTED_MESSAGE_MAX_BYTES, DEFAULT_MAX_PARTIAL_MESSAGES_PER_PEER, DEFAULT_MTU_BYTES,
};

/// Contains Config properties which will be used by the message manager for
/// every connection
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    /// MTU used for peers with no explicit override. Rounded down to a word
    /// boundary when applied.
    pub default_mtu: usize,
    /// Largest message body accepted by `send`, before fragmentation
    pub fragmented_message_max_size: usize,
    /// Fragmented messages one peer may have partially received at once.
    /// Fragments starting another message beyond this are dropped.
    pub max_partial_messages_per_peer: usize,
    /// How long a partially received message may wait for its remaining
    /// fragments before it is discarded
    pub fragment_reassembly_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            default_mtu: DEFAULT_MTU_BYTES,
            fragmented_message_max_size: DEFAULT_FRAGMENTED_MESSAGE_MAX_BYTES,
            max_partial_messages_per_peer: DEFAULT_MAX_PARTIAL_MESSAGES_PER_PEER,
            fragment_reassembly_timeout: Duration::from_secs(10),
        }
    }
}
