//! Integration tests for starting, driving and tearing down a session
//! over the in-memory transport

use tether::{
    DeliveryClass, MessageEnvelope, NetworkStats, PeerId, SchedulerError, Session, SessionConfig,
    SessionError, TransportError, UpdateStage, REASON_SERVER_SHUTDOWN, SERVER_PEER_ID,
};
use tether_test::{
    client_session, connect_all, log, recording_handler, run_frames, server_session, EndpointId,
    LocalHub, CHAT, FRAME,
};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn stages_must_run_in_order() {
    init_logger();
    let hub = LocalHub::new();
    let mut server = server_session(&hub, SessionConfig::default());
    assert_eq!(server.start_as_server(), Ok(true));

    assert_eq!(
        server.pre_update(FRAME),
        Err(SessionError::Scheduler(SchedulerError::OutOfOrder {
            expected: UpdateStage::Early,
            requested: UpdateStage::Pre,
        }))
    );

    server.early_update().unwrap();
    assert_eq!(
        server.post_late_update(),
        Err(SessionError::Scheduler(SchedulerError::OutOfOrder {
            expected: UpdateStage::Pre,
            requested: UpdateStage::PostLate,
        }))
    );

    // a rejected stage leaves the cursor where it was
    assert_eq!(server.pre_update(FRAME), Ok(1));
    server.post_late_update().unwrap();
    assert_eq!(server.scheduler().frame_count(), 1);
    assert_eq!(server.scheduler().next_stage(), UpdateStage::Early);
}

#[test]
fn frames_before_start_do_nothing() {
    init_logger();
    let hub = LocalHub::new();
    let mut server = server_session(&hub, SessionConfig::default());

    assert_eq!(server.update(FRAME), Ok(0));
    assert_eq!(server.pre_update(FRAME), Ok(0));
    assert_eq!(server.local_tick(), 0);
    assert_eq!(server.scheduler().frame_count(), 0);
}

#[test]
fn starting_twice_is_rejected() {
    init_logger();
    let hub = LocalHub::new();
    let mut server = server_session(&hub, SessionConfig::default());
    assert_eq!(server.start_as_server(), Ok(true));
    assert_eq!(server.start_as_server(), Err(SessionError::AlreadyListening));
    assert_eq!(server.start_as_client(), Err(SessionError::AlreadyListening));
    assert!(server.is_server());
    assert!(!server.is_client());
}

#[test]
fn starting_without_transport_fails() {
    init_logger();
    let mut session = Session::new(SessionConfig::default());
    assert_eq!(session.start_as_server(), Err(SessionError::TransportMissing));
    assert!(!session.is_listening());
}

#[test]
fn server_start_failure_is_returned_and_reported() {
    init_logger();
    let hub = LocalHub::new();
    let mut server = server_session(&hub, SessionConfig::default());
    let failures = log();
    let recorded = failures.clone();
    server.on_transport_failure(Box::new(move |reason: &str| {
        recorded.borrow_mut().push(reason.to_string());
    }));

    let error = TransportError::StartFailed {
        role: "server",
        reason: "address in use".to_string(),
    };
    hub.fail_next_start(EndpointId::Server, error.clone());

    assert_eq!(
        server.start_as_server(),
        Err(SessionError::Transport(error.clone()))
    );
    assert!(!server.is_listening());
    assert!(!server.is_server());
    assert_eq!(*failures.borrow(), vec![error.to_string()]);

    // the failure is not sticky
    assert_eq!(server.start_as_server(), Ok(true));
    assert!(server.is_listening());
}

#[test]
fn client_start_failure_returns_false() {
    init_logger();
    let hub = LocalHub::new();
    let mut client = client_session(&hub, SessionConfig::default());
    let failures = log();
    let recorded = failures.clone();
    client.on_transport_failure(Box::new(move |reason: &str| {
        recorded.borrow_mut().push(reason.to_string());
    }));

    hub.fail_next_start(
        EndpointId::Client(0),
        TransportError::StartFailed {
            role: "client",
            reason: "unreachable".to_string(),
        },
    );

    assert_eq!(client.start_as_client(), Ok(false));
    assert!(!client.is_listening());
    assert!(!client.is_client());
    assert_eq!(failures.borrow().len(), 1);
}

#[test]
fn declined_start_rolls_back() {
    init_logger();
    let hub = LocalHub::new();
    let mut server = server_session(&hub, SessionConfig::default());
    hub.decline_next_start(EndpointId::Server);

    assert_eq!(server.start_as_server(), Ok(false));
    assert!(!server.is_listening());
    assert_eq!(server.local_peer(), None);
    assert!(!server.scheduler().is_registered());

    assert_eq!(server.start_as_server(), Ok(true));
    assert_eq!(server.local_peer(), Some(SERVER_PEER_ID));
}

#[test]
fn shutdown_flushes_notices_before_teardown() {
    init_logger();
    let hub = LocalHub::new();
    let mut server = server_session(&hub, SessionConfig::default());
    let mut client = client_session(&hub, SessionConfig::default());
    assert_eq!(server.start_as_server(), Ok(true));
    assert_eq!(client.start_as_client(), Ok(true));
    assert_eq!(connect_all(&mut server, &mut [&mut client], 10), Ok(true));

    let disconnected = log();
    let recorded = disconnected.clone();
    server.on_client_disconnected(Box::new(move |peer: PeerId, reason: Option<&str>| {
        recorded
            .borrow_mut()
            .push((peer, reason.map(str::to_string)));
    }));

    hub.clear_sent_packets();
    server.shutdown().unwrap();

    // peers are dropped at once; teardown waits for the end of the frame
    assert_eq!(
        *disconnected.borrow(),
        vec![(1, Some(REASON_SERVER_SHUTDOWN.to_string()))]
    );
    assert!(server.is_listening());
    assert_eq!(hub.shutdowns(EndpointId::Server), 0);

    server.update(FRAME).unwrap();
    assert!(!server.is_listening());
    assert_eq!(hub.shutdowns(EndpointId::Server), 1);
    let notices: Vec<_> = hub
        .sent_packets()
        .into_iter()
        .filter(|packet| packet.from == EndpointId::Server)
        .collect();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].delivery, DeliveryClass::ReliableSequenced);

    client.update(FRAME).unwrap();
    assert!(!client.is_listening());
    assert_eq!(client.disconnect_reason(), Some(REASON_SERVER_SHUTDOWN));
}

#[test]
fn shutdown_requires_a_running_session() {
    init_logger();
    let hub = LocalHub::new();
    let mut server = server_session(&hub, SessionConfig::default());
    assert_eq!(server.shutdown(), Err(SessionError::NotListening));
}

#[test]
fn session_restarts_after_shutdown() {
    init_logger();
    let hub = LocalHub::new();
    let mut server = server_session(&hub, SessionConfig::default());
    assert_eq!(server.start_as_server(), Ok(true));
    run_frames(&mut [&mut server], 3).unwrap();
    server.shutdown().unwrap();
    server.update(FRAME).unwrap();
    assert!(!server.is_listening());
    assert_eq!(server.local_tick(), 0);

    assert_eq!(server.start_as_server(), Ok(true));
    assert_eq!(server.update(FRAME), Ok(1));
    assert_eq!(server.local_tick(), 1);
}

#[test]
fn transport_failure_shuts_the_session_down() {
    init_logger();
    let hub = LocalHub::new();
    let mut server = server_session(&hub, SessionConfig::default());
    let failures = log();
    let recorded = failures.clone();
    server.on_transport_failure(Box::new(move |reason: &str| {
        recorded.borrow_mut().push(reason.to_string());
    }));
    assert_eq!(server.start_as_server(), Ok(true));
    run_frames(&mut [&mut server], 1).unwrap();

    hub.inject_failure(EndpointId::Server, "socket closed");
    server.update(FRAME).unwrap();

    assert_eq!(*failures.borrow(), vec!["socket closed".to_string()]);
    assert!(!server.is_listening());
    assert_eq!(hub.shutdowns(EndpointId::Server), 1);
}

#[test]
fn host_delivers_to_itself_without_the_transport() {
    init_logger();
    let hub = LocalHub::new();
    let mut host = server_session(&hub, SessionConfig::default());
    let received = log();
    host.register_handler(CHAT, recording_handler(received.clone()))
        .unwrap();
    let connected = log();
    let recorded = connected.clone();
    host.on_client_connected(Box::new(move |peer: PeerId| recorded.borrow_mut().push(peer)));

    assert_eq!(host.start_as_host(), Ok(true));
    assert!(host.is_host());
    assert!(host.is_server());
    assert!(host.is_client());
    assert_eq!(host.connected_peers(), vec![SERVER_PEER_ID]);
    assert_eq!(*connected.borrow(), vec![SERVER_PEER_ID]);

    let envelope = MessageEnvelope::new(CHAT, DeliveryClass::ReliableSequenced, b"self".to_vec())
        .to(SERVER_PEER_ID);
    assert_eq!(host.send(envelope), Ok(1));
    run_frames(&mut [&mut host], 2).unwrap();

    let received = received.borrow();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].sender, SERVER_PEER_ID);
    assert_eq!(&*received[0].payload, b"self");
    assert!(hub.sent_packets().is_empty());
}

#[test]
fn host_cannot_disconnect_its_own_client() {
    init_logger();
    let hub = LocalHub::new();
    let mut host = server_session(&hub, SessionConfig::default());
    assert_eq!(host.start_as_host(), Ok(true));
    assert!(matches!(
        host.disconnect_client(SERVER_PEER_ID, None),
        Err(SessionError::InvalidPeer { peer_id: 0, .. })
    ));
}

#[test]
fn telemetry_reports_once_per_frame() {
    init_logger();
    let hub = LocalHub::new();
    let mut server = server_session(&hub, SessionConfig::default());
    let reports = log();
    let recorded = reports.clone();
    let handle = server.on_telemetry(Box::new(move |stats: &NetworkStats| {
        recorded.borrow_mut().push(*stats);
    }));
    assert_eq!(server.start_as_server(), Ok(true));

    run_frames(&mut [&mut server], 3).unwrap();
    {
        let reports = reports.borrow();
        assert_eq!(reports.len(), 3);
        assert_eq!(reports[2].frame, 2);
        assert_eq!(reports[2].local_tick, 3);
    }

    assert!(server.remove_callback(&handle));
    run_frames(&mut [&mut server], 1).unwrap();
    assert_eq!(reports.borrow().len(), 3);
}
