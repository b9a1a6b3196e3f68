use crate::{
    messages::envelope::{InboundMessage, MessageEnvelope},
    types::{PeerId, Tick, TriggerKey},
};

/// What a handler did with a message
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dispatch {
    Handled,
    /// The message refers to something not yet known locally; buffer it until
    /// the key is resolved
    Defer(TriggerKey),
}

/// Handed to every handler invocation
pub struct DispatchContext {
    local_peer: PeerId,
    local_tick: Tick,
    replies: Vec<MessageEnvelope>,
}

impl DispatchContext {
    pub fn new(local_peer: PeerId, local_tick: Tick) -> Self {
        Self {
            local_peer,
            local_tick,
            replies: Vec::new(),
        }
    }

    pub fn local_peer(&self) -> PeerId {
        self.local_peer
    }

    pub fn local_tick(&self) -> Tick {
        self.local_tick
    }

    /// Queues an envelope to be sent once dispatch of the current batch ends
    pub fn send(&mut self, envelope: MessageEnvelope) {
        self.replies.push(envelope);
    }

    pub fn take_replies(&mut self) -> Vec<MessageEnvelope> {
        std::mem::take(&mut self.replies)
    }
}

pub type MessageHandler = dyn FnMut(&mut DispatchContext, &InboundMessage) -> Dispatch;
