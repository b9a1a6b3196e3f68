use std::time::Duration;

use log::{debug, info, warn};

use tether_shared::{
    rpc_hash, DeferredMessageManager, DeliveryClass, HostType, MessageEnvelope, MessageHandler,
    MessageHook, MessageKind, MessageManager, MessageStats, PeerId, RpcError, RpcHash,
    SubscriberHandle, SubscriberList, Tick, TimeManager, Transport, TriggerKey, SERVER_PEER_ID,
};

use crate::{
    connection::{
        approval::{ApprovalCallback, ConnectionApprovalResponse},
        connection_manager::{
            ConnectedCallback, ConnectionManager, DisconnectedCallback, TransportFailureCallback,
        },
        peer::{ConnectionState, Peer, PeerRoles},
    },
    error::SessionError,
    scheduler::{UpdateScheduler, UpdateStage},
    session::{network_stats::NetworkStats, session_config::SessionConfig},
};

pub type TelemetryCallback = dyn FnMut(&NetworkStats);

/// A Session owns every networking component of one process and runs them
/// through the Early, Pre and PostLate stages of each frame. It can run as a
/// server, a client, or a host (a server with a local client).
pub struct Session {
    config: SessionConfig,
    transport: Option<Box<dyn Transport>>,
    scheduler: UpdateScheduler,
    connection: ConnectionManager,
    messages: MessageManager,
    deferred: DeferredMessageManager,
    time: TimeManager,
    telemetry: SubscriberList<TelemetryCallback>,
}

impl Session {
    /// Create a new Session
    pub fn new(config: SessionConfig) -> Self {
        let time = TimeManager::new(HostType::Server, config.tick.clone());
        let deferred =
            DeferredMessageManager::new(time.duration_to_ticks(config.deferred_message_timeout));
        let mut messages = MessageManager::new(config.connection.clone());
        messages.set_fragment_timeout_ticks(
            time.duration_to_ticks(config.connection.fragment_reassembly_timeout),
        );

        Self {
            transport: None,
            scheduler: UpdateScheduler::new(),
            connection: ConnectionManager::new(config.approval.clone()),
            messages,
            deferred,
            time,
            telemetry: SubscriberList::new(),
            config,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Installs the transport the session runs on. Only allowed while the
    /// session is not listening.
    pub fn set_transport(&mut self, transport: Box<dyn Transport>) -> Result<(), SessionError> {
        if self.connection.is_listening() {
            return Err(SessionError::AlreadyListening);
        }
        self.transport = Some(transport);
        Ok(())
    }

    /// Payload a client sends with its connection request, handed to the
    /// server's approval callback
    pub fn set_connection_payload(&mut self, payload: Vec<u8>) {
        self.connection.set_connection_payload(payload);
    }

    // Start

    pub fn start_as_server(&mut self) -> Result<bool, SessionError> {
        self.start(PeerRoles::SERVER)
    }

    /// Connects to a server. Transport errors are reported to the
    /// transport-failure subscribers and returned as `Ok(false)`.
    pub fn start_as_client(&mut self) -> Result<bool, SessionError> {
        self.start(PeerRoles::CLIENT)
    }

    pub fn start_as_host(&mut self) -> Result<bool, SessionError> {
        self.start(PeerRoles::HOST)
    }

    fn start(&mut self, roles: PeerRoles) -> Result<bool, SessionError> {
        if self.connection.is_listening() {
            return Err(SessionError::AlreadyListening);
        }
        let Some(transport) = self.transport.as_mut() else {
            return Err(SessionError::TransportMissing);
        };

        let host_type = if roles.is_server {
            HostType::Server
        } else {
            HostType::Client
        };
        self.time.set_host_type(host_type);
        let timeout_ticks = self.time.duration_to_ticks(self.config.approval.timeout);
        let now = self.time.local_tick();
        self.connection.begin(roles, timeout_ticks, now);

        let started = if roles.is_server {
            transport.start_server()
        } else {
            transport.start_client()
        };
        match started {
            Ok(true) => {}
            Ok(false) => {
                warn!("Transport declined to start");
                self.connection.rollback();
                return Ok(false);
            }
            Err(error) => {
                self.connection.rollback();
                self.connection.notify_transport_failure(&error.to_string());
                if roles.is_server {
                    return Err(error.into());
                }
                warn!("Client failed to start: {}", error);
                return Ok(false);
            }
        }

        self.deferred.set_timeout_ticks(
            self.time
                .duration_to_ticks(self.config.deferred_message_timeout),
        );
        self.messages.set_fragment_timeout_ticks(
            self.time
                .duration_to_ticks(self.config.connection.fragment_reassembly_timeout),
        );
        self.messages.set_local_peer(SERVER_PEER_ID);
        self.messages.lock_rpc_table();
        self.scheduler.register();

        if roles.is_host {
            self.connection
                .admit_local_host(&mut self.messages, &mut self.deferred, now);
        }

        info!(
            "Session started as {}",
            if roles.is_host {
                "host"
            } else if roles.is_server {
                "server"
            } else {
                "client"
            }
        );
        Ok(true)
    }

    // Frame Stages

    /// Polls the transport, applies connection changes and dispatches every
    /// inbound message
    pub fn early_update(&mut self) -> Result<(), SessionError> {
        if !self.scheduler.begin_stage(UpdateStage::Early)? {
            return Ok(());
        }
        self.run_early();
        self.scheduler.end_stage(UpdateStage::Early);
        Ok(())
    }

    /// Advances the tick clock by `delta`. Returns the number of ticks advanced.
    pub fn pre_update(&mut self, delta: Duration) -> Result<u32, SessionError> {
        if !self.scheduler.begin_stage(UpdateStage::Pre)? {
            return Ok(0);
        }
        let ticks = self.run_pre(delta);
        self.scheduler.end_stage(UpdateStage::Pre);
        Ok(ticks)
    }

    /// Flushes outbound messages, reports telemetry, expires deferred
    /// messages and stale fragment reassembly, then tears the session down
    /// if a shutdown was requested
    pub fn post_late_update(&mut self) -> Result<(), SessionError> {
        if !self.scheduler.begin_stage(UpdateStage::PostLate)? {
            return Ok(());
        }
        self.run_post_late();
        self.scheduler.end_stage(UpdateStage::PostLate);
        Ok(())
    }

    /// Runs all three stages of one frame
    pub fn update(&mut self, delta: Duration) -> Result<u32, SessionError> {
        self.early_update()?;
        let ticks = self.pre_update(delta)?;
        self.post_late_update()?;
        Ok(ticks)
    }

    fn run_early(&mut self) {
        let now = self.time.local_tick();

        if let Some(transport) = self.transport.as_mut() {
            while let Some(event) = transport.poll_event() {
                self.connection
                    .handle_transport_event(event, &mut self.messages, now);
            }
        }
        self.connection
            .update_approvals(&mut self.messages, &mut self.deferred, now);

        while let Some(message) =
            self.messages
                .process_inbound(self.connection.roster(), &mut self.deferred, now)
        {
            self.connection.handle_system_message(
                message,
                &mut self.messages,
                &mut self.deferred,
                &mut self.time,
            );
        }

        self.connection
            .apply_lost_links(&mut self.messages, &mut self.deferred, now);
        let pruned = self
            .messages
            .cleanup_disconnected_clients(self.connection.roster());
        if pruned > 0 {
            debug!("Pruned message state of {} departed peers", pruned);
        }

        if self.connection.take_shutdown_request() {
            self.scheduler.request_shutdown();
        }
    }

    fn run_pre(&mut self, delta: Duration) -> u32 {
        let before = self.time.local_tick();
        let ticks = self.time.advance(delta);
        let after = self.time.local_tick();

        if self.connection.is_server() && ticks > 0 {
            let interval = self.time.config().time_sync_interval;
            if interval > 0 && before / interval != after / interval {
                self.connection
                    .broadcast_time_sync(&mut self.messages, after);
            }
        }
        ticks
    }

    fn run_post_late(&mut self) {
        if let Some(transport) = self.transport.as_mut() {
            let closed = self.messages.flush_outbound(transport.as_mut());
            self.connection
                .release_closed_links(closed, transport.as_mut());
        }

        let stats = self.network_stats();
        for callback in self.telemetry.iter_mut() {
            callback(&stats);
        }

        let now = self.time.local_tick();
        self.deferred.cleanup_stale_triggers(now);
        self.messages.cleanup_stale_fragments(now);

        if self.connection.take_shutdown_request() {
            self.scheduler.request_shutdown();
        }
        if self.scheduler.shutdown_requested() {
            self.teardown();
        }
    }

    fn teardown(&mut self) {
        info!("Session shutting down");
        if let Some(transport) = self.transport.as_mut() {
            transport.shutdown();
        }
        self.messages.clear();
        let discarded = self.deferred.cleanup_all_triggers();
        if discarded > 0 {
            debug!("Discarded {} deferred entries on shutdown", discarded);
        }
        self.connection.reset();
        self.telemetry.clear();
        self.time.reset();
        self.scheduler.unregister();
    }

    /// Disconnects every peer and tears the session down at the end of the
    /// next PostLate stage, after the goodbye notices are flushed
    pub fn shutdown(&mut self) -> Result<(), SessionError> {
        if !self.connection.is_listening() {
            return Err(SessionError::NotListening);
        }
        let now = self.time.local_tick();
        self.connection
            .queue_shutdown_notices(&mut self.messages, &mut self.deferred, now);
        self.connection.take_shutdown_request();
        self.scheduler.request_shutdown();
        Ok(())
    }

    // Messages

    /// Queues a message for every connected target. Returns the number of
    /// targets it was queued for.
    pub fn send(&mut self, envelope: MessageEnvelope) -> Result<usize, SessionError> {
        if !self.connection.is_listening() {
            return Err(SessionError::NotListening);
        }
        Ok(self.messages.send(envelope, self.connection.roster())?)
    }

    /// Calls the RPC registered under `signature` on every connected target
    pub fn send_rpc(
        &mut self,
        signature: &str,
        delivery: DeliveryClass,
        payload: Vec<u8>,
        targets: impl IntoIterator<Item = PeerId>,
    ) -> Result<usize, SessionError> {
        let hash = rpc_hash(signature);
        if !self.messages.rpc_table().contains(&hash) {
            return Err(RpcError::UnknownHash { hash }.into());
        }
        self.send(MessageEnvelope::rpc(hash, delivery, payload).to_many(targets))
    }

    pub fn register_handler(
        &mut self,
        kind: MessageKind,
        handler: Box<MessageHandler>,
    ) -> Result<(), SessionError> {
        Ok(self.messages.register_handler(kind, handler)?)
    }

    /// Registers an RPC. Fails once the session has started.
    pub fn register_rpc(
        &mut self,
        signature: &str,
        handler: Box<MessageHandler>,
    ) -> Result<RpcHash, SessionError> {
        Ok(self.messages.register_rpc(signature, handler)?)
    }

    pub fn add_message_hook(&mut self, hook: Box<dyn MessageHook>) -> SubscriberHandle {
        self.messages.add_hook(hook)
    }

    /// Overrides the MTU for `peer`. Returns the value actually stored.
    pub fn set_peer_mtu(&mut self, peer: PeerId, size: usize) -> usize {
        self.messages.set_peer_mtu(peer, size)
    }

    pub fn peer_mtu(&self, peer: &PeerId) -> usize {
        self.messages.peer_mtu(peer)
    }

    pub fn has_outgoing_messages(&self) -> bool {
        self.messages.has_outgoing_messages()
    }

    /// Replays every message deferred under `key`. Returns how many were replayed.
    pub fn resolve_trigger(&mut self, key: TriggerKey) -> usize {
        let now = self.time.local_tick();
        self.messages
            .resolve_deferred(&key, self.connection.roster(), &mut self.deferred, now)
    }

    // Connections

    pub fn disconnect_client(
        &mut self,
        peer: PeerId,
        reason: Option<&str>,
    ) -> Result<bool, SessionError> {
        if !self.connection.is_listening() {
            return Err(SessionError::NotListening);
        }
        let now = self.time.local_tick();
        self.connection.disconnect_client(
            peer,
            reason,
            &mut self.messages,
            &mut self.deferred,
            now,
        )
    }

    pub fn set_approval_callback(
        &mut self,
        callback: Box<ApprovalCallback>,
    ) -> Result<(), SessionError> {
        self.connection.set_approval_callback(callback)
    }

    pub fn clear_approval_callback(&mut self) -> bool {
        self.connection.clear_approval_callback()
    }

    pub fn complete_pending_approval(
        &mut self,
        peer: PeerId,
        response: ConnectionApprovalResponse,
    ) -> Result<(), SessionError> {
        self.connection.complete_pending_approval(peer, response)
    }

    // Subscribers

    pub fn on_client_connected(&mut self, callback: Box<ConnectedCallback>) -> SubscriberHandle {
        self.connection.on_client_connected(callback)
    }

    pub fn on_client_disconnected(
        &mut self,
        callback: Box<DisconnectedCallback>,
    ) -> SubscriberHandle {
        self.connection.on_client_disconnected(callback)
    }

    pub fn on_transport_failure(
        &mut self,
        callback: Box<TransportFailureCallback>,
    ) -> SubscriberHandle {
        self.connection.on_transport_failure(callback)
    }

    pub fn on_telemetry(&mut self, callback: Box<TelemetryCallback>) -> SubscriberHandle {
        self.telemetry.add(callback)
    }

    /// Removes a callback or message hook registered on this session
    pub fn remove_callback(&mut self, handle: &SubscriberHandle) -> bool {
        self.connection.remove_callback(handle)
            || self.telemetry.remove(handle)
            || self.messages.remove_hook(handle)
    }

    // State

    pub fn is_listening(&self) -> bool {
        self.connection.is_listening()
    }

    pub fn is_server(&self) -> bool {
        self.connection.is_server()
    }

    pub fn is_client(&self) -> bool {
        self.connection.is_client()
    }

    pub fn is_host(&self) -> bool {
        self.connection.is_host()
    }

    /// A client has no id until the server approves it
    pub fn local_peer(&self) -> Option<PeerId> {
        self.connection.local_peer()
    }

    pub fn peer(&self, peer: &PeerId) -> Option<&Peer> {
        self.connection.peer(peer)
    }

    /// `Disconnected` for peers this session does not know
    pub fn peer_state(&self, peer: &PeerId) -> ConnectionState {
        self.connection
            .peer(peer)
            .map_or(ConnectionState::Disconnected, Peer::state)
    }

    pub fn connected_peers(&self) -> Vec<PeerId> {
        self.connection.connected_peers()
    }

    pub fn is_connected_to_server(&self) -> bool {
        self.connection.is_connected_to_server()
    }

    /// Why this client was disconnected. Still readable after shutdown.
    pub fn disconnect_reason(&self) -> Option<&str> {
        self.connection.disconnect_reason()
    }

    pub fn local_tick(&self) -> Tick {
        self.time.local_tick()
    }

    pub fn server_tick(&self) -> Tick {
        self.time.server_tick()
    }

    pub fn local_time(&self) -> Duration {
        self.time.local_time()
    }

    pub fn server_time(&self) -> Duration {
        self.time.server_time()
    }

    pub fn message_stats(&self) -> MessageStats {
        self.messages.stats()
    }

    pub fn network_stats(&self) -> NetworkStats {
        NetworkStats {
            frame: self.scheduler.frame_count(),
            local_tick: self.time.local_tick(),
            connected_peers: self.connection.connected_peers().len(),
            pending_approvals: self.connection.pending_approvals(),
            deferred_entries: self.deferred.len(),
            deferred_expired: self.deferred.expired_total(),
            messages: self.messages.stats(),
        }
    }

    pub fn scheduler(&self) -> &UpdateScheduler {
        &self.scheduler
    }

    pub fn deferred(&self) -> &DeferredMessageManager {
        &self.deferred
    }
}
