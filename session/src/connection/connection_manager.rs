use std::{collections::HashMap, mem};

use log::{debug, info, warn};

use tether_shared::{
    DeferredMessageManager, InboundMessage, MessageManager, PeerDirectory, PeerId,
    SubscriberHandle, SubscriberList, SystemMessage, Tick, TimeManager, Transport, TransportEvent,
    TransportId, SERVER_PEER_ID,
};

use crate::{
    connection::{
        approval::{
            ApprovalCallback, ApprovalConfig, ApprovalManager, ApprovalState,
            ConnectionApprovalResponse,
        },
        peer::{ConnectionState, Peer, PeerRoles},
        roster::PeerRoster,
    },
    error::SessionError,
};

pub const REASON_APPROVAL_TIMED_OUT: &str = "connection approval timed out";
pub const REASON_REQUEST_TIMED_OUT: &str = "connection request timed out";
pub const REASON_REJECTED: &str = "connection rejected";
pub const REASON_SERVER_SHUTDOWN: &str = "server shutting down";
pub const REASON_CONNECTION_LOST: &str = "connection lost";

pub type ConnectedCallback = dyn FnMut(PeerId);
pub type DisconnectedCallback = dyn FnMut(PeerId, Option<&str>);
pub type TransportFailureCallback = dyn FnMut(&str);

/// How the link of a departing peer is closed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LinkClose {
    /// Queue a Disconnect notice and close the link once it is flushed
    Notify,
    /// Close the link at the next flush without a notice
    Quiet,
    /// The transport already closed the link
    Gone,
}

/// Drives the lifecycle of every peer: transport links, connection requests,
/// approval, timeouts and disconnects
pub struct ConnectionManager {
    approval_config: ApprovalConfig,
    roles: PeerRoles,
    listening: bool,
    local_peer: Option<PeerId>,
    roster: PeerRoster,
    transport_peers: HashMap<TransportId, PeerId>,
    lost_links: Vec<TransportId>,
    approvals: ApprovalManager,
    timeout_ticks: u32,
    connection_payload: Vec<u8>,
    // client only
    approval_deadline: Option<Tick>,
    disconnect_reason: Option<String>,
    shutdown_pending: bool,
    connected_callbacks: SubscriberList<ConnectedCallback>,
    disconnected_callbacks: SubscriberList<DisconnectedCallback>,
    failure_callbacks: SubscriberList<TransportFailureCallback>,
}

impl ConnectionManager {
    pub fn new(approval_config: ApprovalConfig) -> Self {
        Self {
            approval_config,
            roles: PeerRoles::NONE,
            listening: false,
            local_peer: None,
            roster: PeerRoster::new(),
            transport_peers: HashMap::new(),
            lost_links: Vec::new(),
            approvals: ApprovalManager::new(),
            timeout_ticks: 0,
            connection_payload: Vec::new(),
            approval_deadline: None,
            disconnect_reason: None,
            shutdown_pending: false,
            connected_callbacks: SubscriberList::new(),
            disconnected_callbacks: SubscriberList::new(),
            failure_callbacks: SubscriberList::new(),
        }
    }

    // Roles

    pub fn roles(&self) -> PeerRoles {
        self.roles
    }

    pub fn is_listening(&self) -> bool {
        self.listening
    }

    pub fn is_server(&self) -> bool {
        self.roles.is_server
    }

    pub fn is_client(&self) -> bool {
        self.roles.is_client
    }

    pub fn is_host(&self) -> bool {
        self.roles.is_host
    }

    fn is_client_only(&self) -> bool {
        self.roles.is_client && !self.roles.is_server
    }

    /// The local peer id. A client has none until the server approves it.
    pub fn local_peer(&self) -> Option<PeerId> {
        self.local_peer
    }

    /// Takes on `roles` ahead of starting the transport
    pub(crate) fn begin(&mut self, roles: PeerRoles, timeout_ticks: u32, now: Tick) {
        self.roles = roles;
        self.listening = true;
        self.timeout_ticks = timeout_ticks;
        self.disconnect_reason = None;
        self.shutdown_pending = false;
        if roles.is_server {
            self.local_peer = Some(SERVER_PEER_ID);
            self.approval_deadline = None;
        } else {
            self.local_peer = None;
            self.approval_deadline = Some(now.saturating_add(timeout_ticks));
        }
    }

    /// Undoes `begin` after the transport failed to start
    pub(crate) fn rollback(&mut self) {
        self.roles = PeerRoles::NONE;
        self.listening = false;
        self.local_peer = None;
        self.approval_deadline = None;
    }

    /// Drops every peer, link and subscriber. The disconnect reason survives
    /// so a client can read it after shutdown.
    pub(crate) fn reset(&mut self) {
        self.rollback();
        self.roster.clear();
        self.transport_peers.clear();
        self.lost_links.clear();
        self.approvals.clear();
        self.shutdown_pending = false;
        self.connected_callbacks.clear();
        self.disconnected_callbacks.clear();
        self.failure_callbacks.clear();
    }

    /// Returns whether a shutdown was requested since the last call
    pub(crate) fn take_shutdown_request(&mut self) -> bool {
        mem::take(&mut self.shutdown_pending)
    }

    // Peers

    pub fn roster(&self) -> &PeerRoster {
        &self.roster
    }

    pub fn peer(&self, peer: &PeerId) -> Option<&Peer> {
        self.roster.get(peer)
    }

    pub fn connected_peers(&self) -> Vec<PeerId> {
        self.roster.connected_ids()
    }

    pub fn pending_approvals(&self) -> usize {
        self.approvals.pending_count()
    }

    pub fn is_connected_to_server(&self) -> bool {
        self.is_client_only() && self.roster.is_connected(&SERVER_PEER_ID)
    }

    /// Why this client was disconnected, if the server or a timeout said so
    pub fn disconnect_reason(&self) -> Option<&str> {
        self.disconnect_reason.as_deref()
    }

    /// Payload a client sends with its connection request
    pub fn set_connection_payload(&mut self, payload: Vec<u8>) {
        self.connection_payload = payload;
    }

    // Approval

    pub fn approval_enabled(&self) -> bool {
        self.approval_config.enabled
    }

    pub fn set_approval_callback(
        &mut self,
        callback: Box<ApprovalCallback>,
    ) -> Result<(), SessionError> {
        self.approvals.set_callback(callback)
    }

    pub fn clear_approval_callback(&mut self) -> bool {
        self.approvals.clear_callback()
    }

    /// Answers an approval the callback left pending. Applied during the next
    /// Early stage.
    pub fn complete_pending_approval(
        &mut self,
        peer: PeerId,
        response: ConnectionApprovalResponse,
    ) -> Result<(), SessionError> {
        if !self.roles.is_server {
            return Err(SessionError::NotServer {
                operation: "complete_pending_approval",
            });
        }
        self.approvals.complete(peer, response)
    }

    // Subscribers

    pub fn on_client_connected(&mut self, callback: Box<ConnectedCallback>) -> SubscriberHandle {
        self.connected_callbacks.add(callback)
    }

    pub fn on_client_disconnected(
        &mut self,
        callback: Box<DisconnectedCallback>,
    ) -> SubscriberHandle {
        self.disconnected_callbacks.add(callback)
    }

    pub fn on_transport_failure(
        &mut self,
        callback: Box<TransportFailureCallback>,
    ) -> SubscriberHandle {
        self.failure_callbacks.add(callback)
    }

    pub fn remove_callback(&mut self, handle: &SubscriberHandle) -> bool {
        self.connected_callbacks.remove(handle)
            || self.disconnected_callbacks.remove(handle)
            || self.failure_callbacks.remove(handle)
    }

    fn notify_connected(&mut self, peer: PeerId) {
        for callback in self.connected_callbacks.iter_mut() {
            callback(peer);
        }
    }

    fn notify_disconnected(&mut self, peer: PeerId, reason: Option<&str>) {
        for callback in self.disconnected_callbacks.iter_mut() {
            callback(peer, reason);
        }
    }

    /// Fires transport-failure subscribers without requesting a shutdown
    pub(crate) fn notify_transport_failure(&mut self, reason: &str) {
        for callback in self.failure_callbacks.iter_mut() {
            callback(reason);
        }
    }

    /// Fires transport-failure subscribers and flags the session for shutdown.
    /// There is no reconnect.
    pub fn handle_transport_failure(&mut self, reason: &str) {
        warn!("Transport failure: {}. Shutting the session down", reason);
        self.notify_transport_failure(reason);
        self.shutdown_pending = true;
    }

    // Transport Events

    pub fn handle_transport_event(
        &mut self,
        event: TransportEvent,
        messages: &mut MessageManager,
        now: Tick,
    ) {
        match event {
            TransportEvent::Connect(transport_id) => self.link_opened(transport_id, messages, now),
            // applied after inbound processing, so data that arrived before
            // the close is still read
            TransportEvent::Disconnect(transport_id) => self.lost_links.push(transport_id),
            TransportEvent::Data(transport_id, packet) => {
                match self.transport_peers.get(&transport_id) {
                    Some(peer) if self.roster.contains(peer) => {
                        messages.receive_packet(*peer, packet)
                    }
                    _ => debug!(
                        "Dropping {} bytes from unmapped link {:?}",
                        packet.len(),
                        transport_id
                    ),
                }
            }
            TransportEvent::TransportFailure(reason) => self.handle_transport_failure(&reason),
        }
    }

    fn link_opened(&mut self, transport_id: TransportId, messages: &mut MessageManager, now: Tick) {
        if self.transport_peers.contains_key(&transport_id) {
            warn!("Link {:?} reported open twice, ignoring", transport_id);
            return;
        }

        if self.is_client_only() {
            if self.roster.contains(&SERVER_PEER_ID) {
                warn!(
                    "Client already has a server link, ignoring link {:?}",
                    transport_id
                );
                return;
            }
            self.roster
                .insert(Peer::new(SERVER_PEER_ID, PeerRoles::SERVER, now));
            self.transport_peers.insert(transport_id, SERVER_PEER_ID);
            messages.add_peer(SERVER_PEER_ID, Some(transport_id));

            let request = SystemMessage::ConnectionRequest {
                payload: self.connection_payload.clone(),
            };
            if let Err(error) = messages.send_system(SERVER_PEER_ID, &request) {
                warn!("Could not queue connection request: {}", error);
            }
            info!(
                "Link {:?} to server open, requesting connection",
                transport_id
            );
            return;
        }

        let peer = self.roster.allocate_id();
        self.roster.insert(Peer::new(peer, PeerRoles::CLIENT, now));
        self.transport_peers.insert(transport_id, peer);
        messages.add_peer(peer, Some(transport_id));
        info!("Peer {} connecting on link {:?}", peer, transport_id);
    }

    /// Handles every link the transport reported closed this frame
    pub fn apply_lost_links(
        &mut self,
        messages: &mut MessageManager,
        deferred: &mut DeferredMessageManager,
        now: Tick,
    ) {
        for transport_id in mem::take(&mut self.lost_links) {
            let Some(peer) = self.transport_peers.remove(&transport_id) else {
                continue;
            };
            if self.is_client_only() {
                self.lose_server(
                    Some(REASON_CONNECTION_LOST.to_string()),
                    LinkClose::Gone,
                    messages,
                    deferred,
                    now,
                );
            } else if self.drop_peer(
                peer,
                Some(REASON_CONNECTION_LOST.to_string()),
                LinkClose::Gone,
                messages,
                deferred,
                now,
            ) {
                info!("Link {:?} of peer {} closed by transport", transport_id, peer);
            }
        }
    }

    /// Closes the transport links of peers whose final notice was flushed
    pub fn release_closed_links(
        &mut self,
        closed: Vec<(PeerId, Option<TransportId>)>,
        transport: &mut dyn Transport,
    ) {
        for (peer, transport_id) in closed {
            let Some(transport_id) = transport_id else {
                continue;
            };
            debug!("Closing link {:?} of peer {}", transport_id, peer);
            transport.disconnect_remote(transport_id);
            self.transport_peers.remove(&transport_id);
        }
    }

    // Approval Flow

    /// Admits the host's own client through the same path as a remote request
    pub(crate) fn admit_local_host(
        &mut self,
        messages: &mut MessageManager,
        deferred: &mut DeferredMessageManager,
        now: Tick,
    ) {
        self.roster
            .insert(Peer::new(SERVER_PEER_ID, PeerRoles::HOST, now));
        messages.add_peer(SERVER_PEER_ID, None);
        let payload = self.connection_payload.clone();
        self.admit(SERVER_PEER_ID, payload, messages, deferred, now);
    }

    fn admit(
        &mut self,
        peer: PeerId,
        payload: Vec<u8>,
        messages: &mut MessageManager,
        deferred: &mut DeferredMessageManager,
        now: Tick,
    ) {
        if !self.approval_config.enabled {
            self.accept(peer, messages, now);
            return;
        }

        if let Some(record) = self.roster.get_mut(&peer) {
            record.transition(ConnectionState::PendingApproval, now);
        }
        let deadline = now.saturating_add(self.timeout_ticks);
        debug!("Peer {} awaiting approval until tick {}", peer, deadline);
        if let ApprovalState::Resolved(response) =
            self.approvals.request_approval(peer, payload, deadline)
        {
            self.apply_approval(peer, response, messages, deferred, now);
        }
    }

    fn apply_approval(
        &mut self,
        peer: PeerId,
        response: ConnectionApprovalResponse,
        messages: &mut MessageManager,
        deferred: &mut DeferredMessageManager,
        now: Tick,
    ) {
        if response.approved {
            self.accept(peer, messages, now);
            return;
        }
        let reason = response
            .reason
            .unwrap_or_else(|| REASON_REJECTED.to_string());
        info!("Peer {} rejected: {}", peer, reason);
        self.drop_peer(peer, Some(reason), LinkClose::Notify, messages, deferred, now);
    }

    fn accept(&mut self, peer: PeerId, messages: &mut MessageManager, now: Tick) {
        let Some(record) = self.roster.get_mut(&peer) else {
            return;
        };
        if !record.transition(ConnectionState::Connected, now) {
            warn!(
                "Peer {} cannot be approved from state {:?}",
                peer,
                record.state()
            );
            return;
        }
        info!("Peer {} connected", peer);
        self.notify_connected(peer);

        if peer != SERVER_PEER_ID {
            let approved = SystemMessage::ConnectionApproved {
                peer_id: peer,
                server_tick: now,
            };
            if let Err(error) = messages.send_system(peer, &approved) {
                warn!("Could not queue approval for peer {}: {}", peer, error);
            }
        }
    }

    /// Applies approvals the application completed since the last frame and
    /// enforces every connection timeout
    pub fn update_approvals(
        &mut self,
        messages: &mut MessageManager,
        deferred: &mut DeferredMessageManager,
        now: Tick,
    ) {
        if self.is_client_only() {
            if let Some(deadline) = self.approval_deadline {
                if now >= deadline && !self.is_connected_to_server() {
                    warn!(
                        "Not approved by the server within {} ticks, shutting down",
                        self.timeout_ticks
                    );
                    self.approval_deadline = None;
                    self.disconnect_reason = Some(REASON_APPROVAL_TIMED_OUT.to_string());
                    self.shutdown_pending = true;
                }
            }
            return;
        }

        for (peer, response) in self.approvals.take_resolved() {
            self.apply_approval(peer, response, messages, deferred, now);
        }

        for peer in self.approvals.take_timed_out(now) {
            warn!("Approval for peer {} timed out", peer);
            self.drop_peer(
                peer,
                Some(REASON_APPROVAL_TIMED_OUT.to_string()),
                LinkClose::Notify,
                messages,
                deferred,
                now,
            );
        }

        let timeout_ticks = self.timeout_ticks;
        let mut stalled: Vec<PeerId> = self
            .roster
            .iter()
            .filter(|peer| {
                peer.state() == ConnectionState::Connecting
                    && now.saturating_sub(peer.state_since()) >= timeout_ticks
            })
            .map(Peer::id)
            .collect();
        stalled.sort_unstable();
        for peer in stalled {
            warn!("Peer {} never sent a connection request", peer);
            self.drop_peer(
                peer,
                Some(REASON_REQUEST_TIMED_OUT.to_string()),
                LinkClose::Notify,
                messages,
                deferred,
                now,
            );
        }
    }

    // Control Messages

    /// Applies one control message returned by the message manager
    pub fn handle_system_message(
        &mut self,
        message: InboundMessage,
        messages: &mut MessageManager,
        deferred: &mut DeferredMessageManager,
        time: &mut TimeManager,
    ) {
        let system = match SystemMessage::from_inbound(&message) {
            Ok(system) => system,
            Err(error) => {
                warn!(
                    "Malformed control message from peer {}: {}",
                    message.sender, error
                );
                messages.record_protocol_error();
                return;
            }
        };

        if self.is_client_only() {
            self.handle_server_message(message.sender, system, messages, deferred, time);
        } else {
            let now = time.local_tick();
            self.handle_client_message(message.sender, system, messages, deferred, now);
        }
    }

    fn handle_client_message(
        &mut self,
        sender: PeerId,
        system: SystemMessage,
        messages: &mut MessageManager,
        deferred: &mut DeferredMessageManager,
        now: Tick,
    ) {
        match system {
            SystemMessage::ConnectionRequest { payload } => {
                match self.roster.get(&sender).map(Peer::state) {
                    Some(ConnectionState::Connecting) => {
                        self.admit(sender, payload, messages, deferred, now)
                    }
                    state => {
                        warn!(
                            "Unexpected connection request from peer {} in state {:?}",
                            sender, state
                        );
                        messages.record_protocol_error();
                    }
                }
            }
            SystemMessage::Disconnect { reason } => {
                info!("Peer {} is leaving", sender);
                self.drop_peer(sender, reason, LinkClose::Quiet, messages, deferred, now);
            }
            other => {
                warn!("Peer {} sent {:?}, which only a server sends", sender, other);
                messages.record_protocol_error();
            }
        }
    }

    fn handle_server_message(
        &mut self,
        sender: PeerId,
        system: SystemMessage,
        messages: &mut MessageManager,
        deferred: &mut DeferredMessageManager,
        time: &mut TimeManager,
    ) {
        if sender != SERVER_PEER_ID {
            warn!("Control message from unexpected peer {}", sender);
            messages.record_protocol_error();
            return;
        }
        let now = time.local_tick();

        match system {
            SystemMessage::ConnectionApproved {
                peer_id,
                server_tick,
            } => {
                if peer_id == SERVER_PEER_ID {
                    warn!("Server assigned the reserved server id");
                    messages.record_protocol_error();
                    return;
                }
                let Some(server) = self.roster.get_mut(&SERVER_PEER_ID) else {
                    return;
                };
                if !server.transition(ConnectionState::Connected, now) {
                    warn!("Duplicate connection approval from server");
                    messages.record_protocol_error();
                    return;
                }

                let mut own = Peer::new(peer_id, PeerRoles::CLIENT, now);
                own.transition(ConnectionState::Connected, now);
                self.roster.insert(own);
                self.local_peer = Some(peer_id);
                self.approval_deadline = None;
                messages.set_local_peer(peer_id);
                time.on_server_tick(server_tick);

                info!(
                    "Approved by server as peer {} at server tick {}",
                    peer_id, server_tick
                );
                self.notify_connected(peer_id);
            }
            SystemMessage::TimeSync { server_tick } => time.on_server_tick(server_tick),
            SystemMessage::Disconnect { reason } => {
                info!(
                    "Server closed the connection: {}",
                    reason.as_deref().unwrap_or("no reason given")
                );
                self.lose_server(reason, LinkClose::Quiet, messages, deferred, now);
            }
            SystemMessage::ConnectionRequest { .. } => {
                warn!("Server sent a connection request");
                messages.record_protocol_error();
            }
        }
    }

    // Disconnects

    /// Disconnects a client from the server, cancelling everything queued for
    /// it and sending a notice carrying `reason`. Returns `Ok(false)` if the
    /// peer is already gone.
    pub fn disconnect_client(
        &mut self,
        peer: PeerId,
        reason: Option<&str>,
        messages: &mut MessageManager,
        deferred: &mut DeferredMessageManager,
        now: Tick,
    ) -> Result<bool, SessionError> {
        if !self.roles.is_server {
            return Err(SessionError::NotServer {
                operation: "disconnect_client",
            });
        }
        if peer == SERVER_PEER_ID {
            return Err(SessionError::InvalidPeer {
                peer_id: peer,
                reason: "the server's own peer leaves through shutdown",
            });
        }
        Ok(self.drop_peer(
            peer,
            reason.map(str::to_string),
            LinkClose::Notify,
            messages,
            deferred,
            now,
        ))
    }

    /// Queues the goodbye every peer receives when this session shuts down
    pub fn queue_shutdown_notices(
        &mut self,
        messages: &mut MessageManager,
        deferred: &mut DeferredMessageManager,
        now: Tick,
    ) {
        if self.is_client_only() {
            self.lose_server(None, LinkClose::Notify, messages, deferred, now);
            return;
        }
        for peer in self.roster.ids() {
            if peer == SERVER_PEER_ID {
                continue;
            }
            self.drop_peer(
                peer,
                Some(REASON_SERVER_SHUTDOWN.to_string()),
                LinkClose::Notify,
                messages,
                deferred,
                now,
            );
        }
    }

    /// Removes a peer from the server's roster. Returns false if it was
    /// already gone. The disconnected subscribers only hear about peers that
    /// had been connected.
    fn drop_peer(
        &mut self,
        peer: PeerId,
        reason: Option<String>,
        link: LinkClose,
        messages: &mut MessageManager,
        deferred: &mut DeferredMessageManager,
        now: Tick,
    ) -> bool {
        let Some(record) = self.roster.get_mut(&peer) else {
            return false;
        };
        let was_connected = record.is_connected();
        record.transition(ConnectionState::Disconnecting, now);
        record.set_disconnect_reason(reason.clone());

        match link {
            LinkClose::Notify => {
                messages.close_peer(&peer);
                let notice = SystemMessage::Disconnect {
                    reason: reason.clone(),
                };
                if let Err(error) = messages.send_system(peer, &notice) {
                    warn!("Could not queue disconnect notice for peer {}: {}", peer, error);
                }
            }
            LinkClose::Quiet => {
                messages.close_peer(&peer);
            }
            LinkClose::Gone => messages.remove_peer(&peer),
        }

        self.roster.remove(&peer);
        self.approvals.remove(&peer);
        let purged = deferred.purge_peer(&peer);
        info!(
            "Peer {} disconnected ({}), {} deferred messages discarded",
            peer,
            reason.as_deref().unwrap_or("no reason given"),
            purged
        );

        if was_connected {
            self.notify_disconnected(peer, reason.as_deref());
        }
        true
    }

    /// Client side counterpart of `drop_peer`: the link to the server is
    /// going away and the session will shut down
    fn lose_server(
        &mut self,
        reason: Option<String>,
        link: LinkClose,
        messages: &mut MessageManager,
        deferred: &mut DeferredMessageManager,
        now: Tick,
    ) {
        let Some(server) = self.roster.get_mut(&SERVER_PEER_ID) else {
            self.shutdown_pending = true;
            return;
        };
        let was_connected = server.is_connected();
        if !server.transition(ConnectionState::Disconnecting, now) {
            return;
        }
        server.set_disconnect_reason(reason.clone());
        if self.disconnect_reason.is_none() {
            self.disconnect_reason = reason.clone();
        }

        match link {
            LinkClose::Notify => {
                messages.close_peer(&SERVER_PEER_ID);
                let notice = SystemMessage::Disconnect { reason: None };
                if let Err(error) = messages.send_system(SERVER_PEER_ID, &notice) {
                    warn!("Could not queue disconnect notice for server: {}", error);
                }
            }
            LinkClose::Quiet => {
                messages.close_peer(&SERVER_PEER_ID);
            }
            LinkClose::Gone => messages.remove_peer(&SERVER_PEER_ID),
        }
        deferred.purge_peer(&SERVER_PEER_ID);
        self.approval_deadline = None;
        self.shutdown_pending = true;

        if was_connected {
            if let Some(local_peer) = self.local_peer {
                self.notify_disconnected(local_peer, reason.as_deref());
            }
        }
    }

    // Time Sync

    /// Sends the current server tick to every connected remote peer
    pub fn broadcast_time_sync(&mut self, messages: &mut MessageManager, server_tick: Tick) {
        let sync = SystemMessage::TimeSync { server_tick };
        for peer in self.roster.connected_ids() {
            if peer == SERVER_PEER_ID {
                continue;
            }
            if let Err(error) = messages.send_system(peer, &sync) {
                debug!("Could not queue time sync for peer {}: {}", peer, error);
            }
        }
    }
}
