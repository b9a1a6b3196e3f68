use std::collections::{HashMap, VecDeque};

use log::{debug, info, trace, warn};

use tether_serde::{ByteReader, Serde};

use crate::{
    deferred::deferred_message_manager::DeferredMessageManager,
    messages::{
        connection_config::ConnectionConfig,
        constants::{align_mtu, MIN_MTU_BYTES},
        delivery::DeliveryClass,
        envelope::{InboundMessage, MessageEnvelope},
        error::{MessageError, MessageManagerError, RpcError},
        fragment_receiver::FragmentReceiver,
        fragmenter::MessageFragmenter,
        frame::Frame,
        handler::{Dispatch, DispatchContext, MessageHandler},
        hooks::MessageHook,
        message_kind::MessageKind,
        outbound_batch::OutboundBatch,
        rpc::{RpcHash, RpcTable},
        system_messages::SystemMessage,
    },
    peer_directory::PeerDirectory,
    subscribers::{SubscriberHandle, SubscriberList},
    transport::Transport,
    types::{PeerId, Tick, TransportId, TriggerKey},
};

/// Running counters, reported through telemetry
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MessageStats {
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub dropped_unreliable: u64,
    pub dropped_unfragmentable: u64,
    pub protocol_errors: u64,
    /// Partially received messages discarded after waiting too long
    pub expired_reassemblies: u64,
    pub skipped_targets: u64,
    pub send_failures: u64,
}

struct PeerChannels {
    // None routes through loopback to the local peer
    transport_id: Option<TransportId>,
    batches: Vec<OutboundBatch>,
    // A final notice is queued; the link closes after the next flush
    closing: bool,
}

impl PeerChannels {
    fn new(transport_id: Option<TransportId>) -> Self {
        Self {
            transport_id,
            batches: DeliveryClass::ALL
                .iter()
                .map(|delivery| OutboundBatch::new(*delivery))
                .collect(),
            closing: false,
        }
    }

    fn batch_mut(&mut self, delivery: DeliveryClass) -> Option<&mut OutboundBatch> {
        self.batches
            .iter_mut()
            .find(|batch| batch.delivery() == delivery)
    }

    fn pending(&self) -> usize {
        self.batches.iter().map(OutboundBatch::len).sum()
    }

    fn clear(&mut self) {
        for batch in &mut self.batches {
            batch.clear();
        }
    }
}

/// Batches, fragments and routes framed messages for every peer, and
/// dispatches inbound messages to registered handlers
pub struct MessageManager {
    config: ConnectionConfig,
    local_peer: PeerId,
    peers: HashMap<PeerId, PeerChannels>,
    mtu_overrides: HashMap<PeerId, usize>,
    incoming_packets: VecDeque<(PeerId, Box<[u8]>)>,
    ready_messages: VecDeque<InboundMessage>,
    fragment_receiver: FragmentReceiver,
    fragmenter: MessageFragmenter,
    fragment_timeout_ticks: u32,
    handlers: HashMap<MessageKind, Box<MessageHandler>>,
    rpc_table: RpcTable,
    hooks: SubscriberList<dyn MessageHook>,
    stats: MessageStats,
}

impl MessageManager {
    /// Creates a new MessageManager
    pub fn new(config: ConnectionConfig) -> Self {
        let fragment_receiver = FragmentReceiver::new(
            config.fragmented_message_max_size,
            config.max_partial_messages_per_peer,
        );
        Self {
            config,
            local_peer: 0,
            peers: HashMap::new(),
            mtu_overrides: HashMap::new(),
            incoming_packets: VecDeque::new(),
            ready_messages: VecDeque::new(),
            fragment_receiver,
            fragmenter: MessageFragmenter::new(),
            fragment_timeout_ticks: u32::MAX,
            handlers: HashMap::new(),
            rpc_table: RpcTable::new(),
            hooks: SubscriberList::new(),
            stats: MessageStats::default(),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn local_peer(&self) -> PeerId {
        self.local_peer
    }

    pub fn set_local_peer(&mut self, peer: PeerId) {
        self.local_peer = peer;
    }

    pub fn stats(&self) -> MessageStats {
        self.stats
    }

    /// Counts a protocol error detected outside the manager, for instance a
    /// control message the connection layer could not parse
    pub fn record_protocol_error(&mut self) {
        self.stats.protocol_errors += 1;
    }

    /// Ticks a partially received message may wait for its remaining fragments
    pub fn set_fragment_timeout_ticks(&mut self, timeout_ticks: u32) {
        self.fragment_timeout_ticks = timeout_ticks;
    }

    pub fn fragments_in_flight(&self) -> usize {
        self.fragment_receiver.in_flight()
    }

    /// Discards partially received messages that have waited out the
    /// reassembly timeout. Returns the number discarded.
    pub fn cleanup_stale_fragments(&mut self, now: Tick) -> usize {
        let discarded = self
            .fragment_receiver
            .discard_stale(now, self.fragment_timeout_ticks);
        if discarded > 0 {
            warn!(
                "Discarded {} partially received message(s) still missing fragments",
                discarded
            );
            self.stats.expired_reassemblies += discarded as u64;
        }
        discarded
    }

    // Registration

    pub fn register_handler(
        &mut self,
        kind: MessageKind,
        handler: Box<MessageHandler>,
    ) -> Result<(), MessageManagerError> {
        if kind.is_reserved() {
            return Err(MessageManagerError::ReservedMessageKind { kind: kind.value() });
        }
        if self.handlers.contains_key(&kind) {
            return Err(MessageManagerError::HandlerAlreadyRegistered { kind: kind.value() });
        }
        self.handlers.insert(kind, handler);
        Ok(())
    }

    pub fn register_rpc(
        &mut self,
        signature: &str,
        handler: Box<MessageHandler>,
    ) -> Result<RpcHash, RpcError> {
        self.rpc_table.register(signature, handler)
    }

    pub fn rpc_table(&self) -> &RpcTable {
        &self.rpc_table
    }

    pub fn lock_rpc_table(&mut self) {
        self.rpc_table.lock();
    }

    pub fn add_hook(&mut self, hook: Box<dyn MessageHook>) -> SubscriberHandle {
        self.hooks.add(hook)
    }

    pub fn remove_hook(&mut self, handle: &SubscriberHandle) -> bool {
        self.hooks.remove(handle)
    }

    // Peers

    pub fn add_peer(&mut self, peer: PeerId, transport_id: Option<TransportId>) {
        self.peers
            .entry(peer)
            .or_insert_with(|| PeerChannels::new(transport_id));
    }

    pub fn has_peer(&self, peer: &PeerId) -> bool {
        self.peers.contains_key(peer)
    }

    pub fn is_closing(&self, peer: &PeerId) -> bool {
        self.peers.get(peer).is_some_and(|channels| channels.closing)
    }

    /// Drops every piece of state held for `peer`, including unsent messages
    pub fn remove_peer(&mut self, peer: &PeerId) {
        self.peers.remove(peer);
        self.forget_peer(peer);
    }

    /// Cancels everything queued for `peer` and marks it closing, so the next
    /// flush only carries messages queued after this call (the final notice)
    /// and then reports the link as closed. Returns false if the peer is unknown.
    pub fn close_peer(&mut self, peer: &PeerId) -> bool {
        let Some(channels) = self.peers.get_mut(peer) else {
            return false;
        };
        channels.clear();
        channels.closing = true;
        self.forget_peer(peer);
        true
    }

    /// Drops queues and MTU overrides for peers no longer in the roster, except
    /// peers still waiting to flush a final notice. Returns the number dropped.
    pub fn cleanup_disconnected_clients(&mut self, roster: &dyn PeerDirectory) -> usize {
        let stale: Vec<PeerId> = self
            .peers
            .iter()
            .filter(|(peer, channels)| !channels.closing && !roster.contains(peer))
            .map(|(peer, _)| *peer)
            .collect();
        for peer in &stale {
            debug!("Dropping message state for departed peer {}", peer);
            self.remove_peer(peer);
        }
        self.mtu_overrides
            .retain(|peer, _| roster.contains(peer));
        stale.len()
    }

    fn forget_peer(&mut self, peer: &PeerId) {
        self.mtu_overrides.remove(peer);
        self.fragment_receiver.discard_peer(peer);
        self.incoming_packets.retain(|(sender, _)| sender != peer);
        self.ready_messages.retain(|message| message.sender != *peer);
    }

    // MTU

    /// Stores an MTU override for `peer`. The size is clamped into
    /// `[MIN_MTU_BYTES, fragmented_message_max_size]` and rounded down to a
    /// word boundary. Returns the stored value.
    pub fn set_peer_mtu(&mut self, peer: PeerId, size: usize) -> usize {
        let clamped = size
            .max(MIN_MTU_BYTES)
            .min(self.config.fragmented_message_max_size);
        let mtu = align_mtu(clamped).max(align_mtu(MIN_MTU_BYTES));
        if mtu != size {
            debug!("MTU for peer {} requested as {}, stored as {}", peer, size, mtu);
        }
        self.mtu_overrides.insert(peer, mtu);
        mtu
    }

    pub fn peer_mtu(&self, peer: &PeerId) -> usize {
        self.mtu_overrides
            .get(peer)
            .copied()
            .unwrap_or_else(|| align_mtu(self.config.default_mtu.max(MIN_MTU_BYTES)))
    }

    // Outgoing Messages

    /// Queues an envelope for every connected target. Targets that are not
    /// connected are skipped. Returns the number of targets the message was
    /// queued for.
    pub fn send(
        &mut self,
        envelope: MessageEnvelope,
        roster: &dyn PeerDirectory,
    ) -> Result<usize, MessageManagerError> {
        if envelope.targets.is_empty() {
            return Err(MessageManagerError::EmptyTargets);
        }
        if envelope.kind.is_system() {
            return Err(MessageManagerError::ReservedMessageKind {
                kind: envelope.kind.value(),
            });
        }
        if envelope.kind.is_rpc() && envelope.rpc_hash.is_none() {
            return Err(MessageManagerError::MissingRpcHash);
        }
        let size = envelope.body_len();
        let limit = self.config.fragmented_message_max_size;
        if size > limit {
            return Err(MessageManagerError::MessageTooLarge { size, limit });
        }

        let body: Box<[u8]> = envelope.write_body().into();
        let mut queued = 0;
        for (position, target) in envelope.targets.iter().enumerate() {
            if envelope.targets[..position].contains(target) {
                continue;
            }
            let deliverable = roster.is_connected(target)
                && self
                    .peers
                    .get(target)
                    .is_some_and(|channels| !channels.closing);
            if !deliverable {
                debug!(
                    "Skipping message of kind {} to peer {}, which is not connected",
                    envelope.kind.value(),
                    target
                );
                self.stats.skipped_targets += 1;
                continue;
            }
            self.queue(*target, envelope.kind, envelope.delivery, body.clone());
            queued += 1;
        }
        Ok(queued)
    }

    /// Queues a control message, bypassing the connected check. Control
    /// messages always travel `ReliableSequenced`.
    pub fn send_system(
        &mut self,
        peer: PeerId,
        message: &SystemMessage,
    ) -> Result<(), MessageManagerError> {
        if !self.peers.contains_key(&peer) {
            return Err(MessageManagerError::UnknownPeer { peer_id: peer });
        }
        let envelope = MessageEnvelope::new(
            message.kind(),
            DeliveryClass::ReliableSequenced,
            message.to_payload(),
        );
        trace!("Queueing {:?} for peer {}", message, peer);
        self.queue(
            peer,
            envelope.kind,
            envelope.delivery,
            envelope.write_body().into(),
        );
        Ok(())
    }

    fn queue(&mut self, peer: PeerId, kind: MessageKind, delivery: DeliveryClass, body: Box<[u8]>) {
        for hook in self.hooks.iter_mut() {
            hook.on_outbound(peer, kind, delivery, body.len());
        }
        if let Some(batch) = self
            .peers
            .get_mut(&peer)
            .and_then(|channels| channels.batch_mut(delivery))
        {
            batch.push(kind, body);
        }
    }

    /// Returns whether any peer has queued messages
    pub fn has_outgoing_messages(&self) -> bool {
        self.peers.values().any(|channels| channels.pending() > 0)
    }

    pub fn pending_outbound(&self, peer: &PeerId) -> usize {
        self.peers.get(peer).map_or(0, PeerChannels::pending)
    }

    /// Packs every queued message into MTU-bounded packets and hands them to
    /// the transport. Messages for a peer with no transport link are looped
    /// back into the local inbound queue. Returns the peers whose final notice
    /// has now been flushed; their state is dropped and the caller closes the
    /// transport link.
    pub fn flush_outbound(
        &mut self,
        transport: &mut dyn Transport,
    ) -> Vec<(PeerId, Option<TransportId>)> {
        let mut peer_ids: Vec<PeerId> = self.peers.keys().copied().collect();
        peer_ids.sort_unstable();

        let mut loopback = Vec::new();
        let mut closed = Vec::new();

        for peer in peer_ids {
            let mtu = self.peer_mtu(&peer);
            let Some(channels) = self.peers.get_mut(&peer) else {
                continue;
            };

            for batch in &mut channels.batches {
                if batch.is_empty() {
                    continue;
                }
                let outcome = batch.flush(&mut self.fragmenter, mtu);
                self.stats.messages_sent += outcome.messages;
                self.stats.dropped_unreliable += outcome.dropped_unreliable;
                self.stats.dropped_unfragmentable += outcome.dropped_unfragmentable;

                for (delivery, packet) in outcome.packets {
                    let Some(transport_id) = channels.transport_id else {
                        loopback.push(packet);
                        continue;
                    };
                    match transport.send(transport_id, &packet, delivery) {
                        Ok(()) => {
                            self.stats.packets_sent += 1;
                            self.stats.bytes_sent += packet.len() as u64;
                        }
                        Err(error) => {
                            warn!("Failed to send packet to peer {}: {}", peer, error);
                            self.stats.send_failures += 1;
                        }
                    }
                }
            }

            if channels.closing {
                closed.push((peer, channels.transport_id));
            }
        }

        for (peer, _) in &closed {
            info!("Final notice flushed to peer {}, releasing its channels", peer);
            self.remove_peer(peer);
        }

        let local_peer = self.local_peer;
        for packet in loopback {
            self.incoming_packets.push_back((local_peer, packet));
        }

        closed
    }

    // Incoming Messages

    /// Queues a raw packet received from `sender`
    pub fn receive_packet(&mut self, sender: PeerId, packet: Box<[u8]>) {
        self.incoming_packets.push_back((sender, packet));
    }

    pub fn has_incoming(&self) -> bool {
        !self.incoming_packets.is_empty() || !self.ready_messages.is_empty()
    }

    /// Parses queued packets and dispatches user and RPC messages in arrival
    /// order. Stops at the first control message and returns it, so the
    /// caller can apply connection changes before later messages are
    /// dispatched. Returns `None` once everything queued has been processed.
    pub fn process_inbound(
        &mut self,
        roster: &dyn PeerDirectory,
        deferred: &mut DeferredMessageManager,
        now: Tick,
    ) -> Option<InboundMessage> {
        loop {
            if let Some(message) = self.ready_messages.pop_front() {
                if message.kind.is_system() {
                    return Some(message);
                }
                self.dispatch(roster, deferred, now, message, None);
                continue;
            }

            let (sender, packet) = self.incoming_packets.pop_front()?;
            self.read_packet(sender, &packet, now);
        }
    }

    /// Replays everything deferred under `key` through the handler table.
    /// A message deferred again keeps its original expiry. Returns the number
    /// of messages replayed.
    pub fn resolve_deferred(
        &mut self,
        key: &TriggerKey,
        roster: &dyn PeerDirectory,
        deferred: &mut DeferredMessageManager,
        now: Tick,
    ) -> usize {
        let messages = deferred.take_key(key, now);
        let count = messages.len();
        for (message, expiry) in messages {
            self.dispatch(roster, deferred, now, message, Some(expiry));
        }
        count
    }

    fn read_packet(&mut self, sender: PeerId, packet: &[u8], now: Tick) {
        let mut reader = ByteReader::new(packet);
        while !reader.is_empty() {
            let frame = match Frame::de(&mut reader) {
                Ok(frame) => frame,
                Err(error) => {
                    warn!(
                        "Malformed frame from peer {}: {}. Discarding the rest of the packet",
                        sender, error
                    );
                    self.stats.protocol_errors += 1;
                    return;
                }
            };
            let kind = frame.kind;
            if let Err(error) = self.read_frame(sender, frame, now) {
                warn!(
                    "Dropping message of kind {} from peer {}: {}",
                    kind.value(),
                    sender,
                    error
                );
                self.stats.protocol_errors += 1;
            }
        }
    }

    fn read_frame(
        &mut self,
        sender: PeerId,
        frame: Frame,
        now: Tick,
    ) -> Result<(), MessageError> {
        let delivery = frame.delivery;
        let (kind, body) = if frame.is_fragment() {
            match self.fragment_receiver.try_receive(sender, frame, now)? {
                Some(message) => message,
                None => return Ok(()),
            }
        } else {
            (frame.kind, frame.payload)
        };

        let limit = self.config.fragmented_message_max_size;
        if body.len() > limit {
            return Err(MessageManagerError::MessageTooLarge {
                size: body.len(),
                limit,
            }
            .into());
        }

        let message = InboundMessage::read_body(sender, kind, delivery, &body)?;
        self.stats.messages_received += 1;
        for hook in self.hooks.iter_mut() {
            hook.on_inbound(&message);
        }
        self.ready_messages.push_back(message);
        Ok(())
    }

    fn dispatch(
        &mut self,
        roster: &dyn PeerDirectory,
        deferred: &mut DeferredMessageManager,
        now: Tick,
        message: InboundMessage,
        expiry: Option<Tick>,
    ) {
        if !roster.is_connected(&message.sender) {
            debug!(
                "Dropping message of kind {} from peer {}, which is not connected",
                message.kind.value(),
                message.sender
            );
            return;
        }

        let mut context = DispatchContext::new(self.local_peer, now);
        let handler = if message.kind.is_rpc() {
            let hash = message.rpc_hash.unwrap_or_default();
            match self.rpc_table.handler_mut(&hash) {
                Ok(handler) => handler,
                Err(error) => {
                    warn!("Dropping RPC from peer {}: {}", message.sender, error);
                    self.stats.protocol_errors += 1;
                    return;
                }
            }
        } else {
            match self.handlers.get_mut(&message.kind) {
                Some(handler) => handler,
                None => {
                    warn!(
                        "Dropping message from peer {}: no handler registered for kind {}",
                        message.sender,
                        message.kind.value()
                    );
                    self.stats.protocol_errors += 1;
                    return;
                }
            }
        };

        if let Dispatch::Defer(key) = handler(&mut context, &message) {
            trace!("Deferring message of kind {} until {:?}", message.kind.value(), key);
            match expiry {
                Some(expiry) => deferred.redefer(key, message, expiry, now),
                None => deferred.defer_until_key_available(key, message, now),
            }
        }

        for reply in context.take_replies() {
            if let Err(error) = self.send(reply, roster) {
                warn!("Dropping reply queued by a handler: {}", error);
            }
        }
    }

    /// Drops every queue, peer and counter. Handlers and RPC registrations
    /// survive; the RPC table is unlocked and hooks are removed.
    pub fn clear(&mut self) {
        self.peers.clear();
        self.mtu_overrides.clear();
        self.incoming_packets.clear();
        self.ready_messages.clear();
        self.fragment_receiver.clear();
        self.hooks.clear();
        self.rpc_table.unlock();
        self.local_peer = 0;
        self.stats = MessageStats::default();
    }
}
