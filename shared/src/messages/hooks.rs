use crate::{
    messages::{delivery::DeliveryClass, envelope::InboundMessage, message_kind::MessageKind},
    types::PeerId,
};

/// Observes traffic without influencing routing. Hooks run in registration order.
pub trait MessageHook {
    /// Called once per target when a message is queued for sending
    fn on_outbound(
        &mut self,
        _target: PeerId,
        _kind: MessageKind,
        _delivery: DeliveryClass,
        _body_len: usize,
    ) {
    }

    /// Called once per fully reassembled inbound message, before dispatch
    fn on_inbound(&mut self, _message: &InboundMessage) {}
}
