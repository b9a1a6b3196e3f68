//! Integration tests for the connection lifecycle: approval, rejection,
//! timeouts and every way a peer can leave

use std::time::Duration;

use tether::{
    ApprovalState, ConnectionApprovalRequest, ConnectionApprovalResponse, ConnectionState,
    PeerId, SessionConfig, SessionError, Transport, TransportEvent, REASON_APPROVAL_TIMED_OUT,
    REASON_CONNECTION_LOST, REASON_REQUEST_TIMED_OUT, SERVER_PEER_ID,
};
use tether_test::{
    approval_config, client_session, connect_all, log, run_frames, server_session, Log, LocalHub,
};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

type DisconnectLog = Log<(PeerId, Option<String>)>;

fn record_connected(session: &mut tether::Session) -> Log<PeerId> {
    let connected = log();
    let recorded = connected.clone();
    session.on_client_connected(Box::new(move |peer: PeerId| recorded.borrow_mut().push(peer)));
    connected
}

fn record_disconnected(session: &mut tether::Session) -> DisconnectLog {
    let disconnected = log();
    let recorded = disconnected.clone();
    session.on_client_disconnected(Box::new(move |peer: PeerId, reason: Option<&str>| {
        recorded
            .borrow_mut()
            .push((peer, reason.map(str::to_string)));
    }));
    disconnected
}

/// Approval callback that leaves every request open and records it
fn pending_approvals(session: &mut tether::Session) -> Log<ConnectionApprovalRequest> {
    let requests = log();
    let recorded = requests.clone();
    session
        .set_approval_callback(Box::new(move |request: &ConnectionApprovalRequest| {
            recorded.borrow_mut().push(request.clone());
            ApprovalState::Pending
        }))
        .unwrap();
    requests
}

#[test]
fn without_approval_both_sides_see_one_connection() {
    init_logger();
    let hub = LocalHub::new();
    let mut server = server_session(&hub, SessionConfig::default());
    let mut client = client_session(&hub, SessionConfig::default());
    let server_connected = record_connected(&mut server);
    let client_connected = record_connected(&mut client);

    assert_eq!(server.start_as_server(), Ok(true));
    assert_eq!(client.start_as_client(), Ok(true));
    assert_eq!(client.local_peer(), None);
    assert_eq!(connect_all(&mut server, &mut [&mut client], 10), Ok(true));
    run_frames(&mut [&mut server, &mut client], 5).unwrap();

    assert_eq!(*server_connected.borrow(), vec![1]);
    assert_eq!(*client_connected.borrow(), vec![1]);
    assert_eq!(client.local_peer(), Some(1));
    assert_eq!(server.connected_peers(), vec![1]);

    let peer = server.peer(&1).unwrap();
    assert!(peer.is_approved());
    assert_eq!(
        peer.history(),
        &[ConnectionState::Connecting, ConnectionState::Connected]
    );
    assert!(!peer.has_visited(ConnectionState::PendingApproval));
}

#[test]
fn clients_get_sequential_ids() {
    init_logger();
    let hub = LocalHub::new();
    let mut server = server_session(&hub, SessionConfig::default());
    let mut first = client_session(&hub, SessionConfig::default());
    let mut second = client_session(&hub, SessionConfig::default());
    assert_eq!(server.start_as_server(), Ok(true));
    assert_eq!(first.start_as_client(), Ok(true));
    assert_eq!(second.start_as_client(), Ok(true));

    assert_eq!(
        connect_all(&mut server, &mut [&mut first, &mut second], 10),
        Ok(true)
    );
    assert_eq!(server.connected_peers(), vec![1, 2]);
    assert_eq!(first.local_peer(), Some(1));
    assert_eq!(second.local_peer(), Some(2));
    assert_eq!(first.peer_state(&SERVER_PEER_ID), ConnectionState::Connected);
}

#[test]
fn approval_sees_payload_and_precedes_connected() {
    init_logger();
    let hub = LocalHub::new();
    let mut server = server_session(&hub, approval_config());
    let mut client = client_session(&hub, SessionConfig::default());
    let requests = pending_approvals(&mut server);
    let server_connected = record_connected(&mut server);
    let client_connected = record_connected(&mut client);
    client.set_connection_payload(b"token".to_vec());

    assert_eq!(server.start_as_server(), Ok(true));
    assert_eq!(client.start_as_client(), Ok(true));
    run_frames(&mut [&mut server, &mut client], 3).unwrap();

    assert_eq!(
        *requests.borrow(),
        vec![ConnectionApprovalRequest {
            peer_id: 1,
            payload: b"token".to_vec(),
        }]
    );
    assert_eq!(server.peer_state(&1), ConnectionState::PendingApproval);
    assert_eq!(server.network_stats().pending_approvals, 1);
    assert!(server_connected.borrow().is_empty());
    assert!(!client.is_connected_to_server());

    server
        .complete_pending_approval(1, ConnectionApprovalResponse::accept())
        .unwrap();
    assert_eq!(connect_all(&mut server, &mut [&mut client], 5), Ok(true));

    assert_eq!(
        server.peer(&1).unwrap().history(),
        &[
            ConnectionState::Connecting,
            ConnectionState::PendingApproval,
            ConnectionState::Connected,
        ]
    );
    assert_eq!(*server_connected.borrow(), vec![1]);
    assert_eq!(*client_connected.borrow(), vec![1]);
    assert_eq!(server.network_stats().pending_approvals, 0);
}

#[test]
fn callback_may_answer_at_once() {
    init_logger();
    let hub = LocalHub::new();
    let mut server = server_session(&hub, approval_config());
    let mut client = client_session(&hub, SessionConfig::default());
    server
        .set_approval_callback(Box::new(|request: &ConnectionApprovalRequest| {
            ApprovalState::Resolved(if request.payload == b"letmein" {
                ConnectionApprovalResponse::accept()
            } else {
                ConnectionApprovalResponse::reject("bad password")
            })
        }))
        .unwrap();
    client.set_connection_payload(b"letmein".to_vec());

    assert_eq!(server.start_as_server(), Ok(true));
    assert_eq!(client.start_as_client(), Ok(true));
    assert_eq!(connect_all(&mut server, &mut [&mut client], 10), Ok(true));
    assert!(server
        .peer(&1)
        .unwrap()
        .has_visited(ConnectionState::PendingApproval));
}

#[test]
fn second_approval_callback_is_rejected() {
    init_logger();
    let hub = LocalHub::new();
    let mut server = server_session(&hub, approval_config());
    pending_approvals(&mut server);
    assert_eq!(
        server.set_approval_callback(Box::new(|_: &ConnectionApprovalRequest| {
            ApprovalState::Pending
        })),
        Err(SessionError::ApprovalCallbackAlreadyRegistered)
    );
    assert!(server.clear_approval_callback());
    pending_approvals(&mut server);
}

#[test]
fn rejection_reaches_the_client_without_connecting() {
    init_logger();
    let hub = LocalHub::new();
    let mut server = server_session(&hub, approval_config());
    let mut client = client_session(&hub, SessionConfig::default());
    pending_approvals(&mut server);
    let server_connected = record_connected(&mut server);
    let server_disconnected = record_disconnected(&mut server);
    let client_connected = record_connected(&mut client);
    let client_disconnected = record_disconnected(&mut client);

    assert_eq!(server.start_as_server(), Ok(true));
    assert_eq!(client.start_as_client(), Ok(true));
    run_frames(&mut [&mut server, &mut client], 2).unwrap();
    assert_eq!(server.peer_state(&1), ConnectionState::PendingApproval);

    // the request stays open across frames
    run_frames(&mut [&mut server, &mut client], 3).unwrap();
    assert_eq!(server.peer_state(&1), ConnectionState::PendingApproval);

    server
        .complete_pending_approval(1, ConnectionApprovalResponse::reject("server full"))
        .unwrap();
    assert_eq!(
        server.complete_pending_approval(1, ConnectionApprovalResponse::accept()),
        Err(SessionError::UnknownPendingApproval { peer_id: 1 })
    );
    run_frames(&mut [&mut server, &mut client], 2).unwrap();

    assert_eq!(server.peer_state(&1), ConnectionState::Disconnected);
    assert!(server.is_listening());
    assert!(!client.is_listening());
    assert_eq!(client.disconnect_reason(), Some("server full"));

    assert!(server_connected.borrow().is_empty());
    assert!(server_disconnected.borrow().is_empty());
    assert!(client_connected.borrow().is_empty());
    assert!(client_disconnected.borrow().is_empty());
}

#[test]
fn completing_approval_is_server_only() {
    init_logger();
    let hub = LocalHub::new();
    let mut client = client_session(&hub, SessionConfig::default());
    assert_eq!(client.start_as_client(), Ok(true));
    assert!(matches!(
        client.complete_pending_approval(1, ConnectionApprovalResponse::accept()),
        Err(SessionError::NotServer { .. })
    ));
    assert!(matches!(
        client.disconnect_client(1, None),
        Err(SessionError::NotServer { .. })
    ));
}

#[test]
fn unanswered_approval_times_out() {
    init_logger();
    let hub = LocalHub::new();
    let mut config = approval_config();
    config.approval.timeout = Duration::from_millis(500);
    let mut server = server_session(&hub, config);
    let mut client = client_session(&hub, SessionConfig::default());
    pending_approvals(&mut server);

    assert_eq!(server.start_as_server(), Ok(true));
    assert_eq!(client.start_as_client(), Ok(true));
    run_frames(&mut [&mut server, &mut client], 5).unwrap();
    assert_eq!(server.peer_state(&1), ConnectionState::PendingApproval);

    run_frames(&mut [&mut server, &mut client], 10).unwrap();
    assert_eq!(server.peer_state(&1), ConnectionState::Disconnected);
    assert_eq!(server.network_stats().pending_approvals, 0);
    assert!(!client.is_listening());
    assert_eq!(client.disconnect_reason(), Some(REASON_APPROVAL_TIMED_OUT));
}

#[test]
fn client_gives_up_waiting_for_approval() {
    init_logger();
    let hub = LocalHub::new();
    let mut config = SessionConfig::default();
    config.approval.timeout = Duration::from_millis(500);
    let mut client = client_session(&hub, config);
    let client_disconnected = record_disconnected(&mut client);

    // no server is listening, so the link never opens
    assert_eq!(client.start_as_client(), Ok(true));
    run_frames(&mut [&mut client], 5).unwrap();
    assert!(client.is_listening());

    run_frames(&mut [&mut client], 10).unwrap();
    assert!(!client.is_listening());
    assert_eq!(client.disconnect_reason(), Some(REASON_APPROVAL_TIMED_OUT));
    assert!(client_disconnected.borrow().is_empty());
}

#[test]
fn silent_link_is_dropped_after_the_request_timeout() {
    init_logger();
    let hub = LocalHub::new();
    let mut config = SessionConfig::default();
    config.approval.timeout = Duration::from_millis(500);
    let mut server = server_session(&hub, config);
    assert_eq!(server.start_as_server(), Ok(true));

    // a bare transport that opens a link and never says anything
    let mut silent = hub.client_transport();
    assert_eq!(silent.start_client(), Ok(true));

    run_frames(&mut [&mut server], 3).unwrap();
    assert_eq!(server.peer_state(&1), ConnectionState::Connecting);

    run_frames(&mut [&mut server], 12).unwrap();
    assert_eq!(server.peer_state(&1), ConnectionState::Disconnected);

    let mut events = Vec::new();
    while let Some(event) = silent.poll_event() {
        events.push(event);
    }
    assert_eq!(events.len(), 3);
    assert!(matches!(events[0], TransportEvent::Connect(_)));
    assert!(matches!(events[2], TransportEvent::Disconnect(_)));
    let TransportEvent::Data(_, notice) = &events[1] else {
        panic!("expected the disconnect notice, got {:?}", events[1]);
    };
    let reason = REASON_REQUEST_TIMED_OUT.as_bytes();
    assert!(notice.windows(reason.len()).any(|window| window == reason));
}

#[test]
fn disconnecting_a_client_twice_notifies_once() {
    init_logger();
    let hub = LocalHub::new();
    let mut server = server_session(&hub, SessionConfig::default());
    let mut client = client_session(&hub, SessionConfig::default());
    let server_disconnected = record_disconnected(&mut server);
    let client_disconnected = record_disconnected(&mut client);
    assert_eq!(server.start_as_server(), Ok(true));
    assert_eq!(client.start_as_client(), Ok(true));
    assert_eq!(connect_all(&mut server, &mut [&mut client], 10), Ok(true));

    assert_eq!(server.disconnect_client(1, Some("kicked")), Ok(true));
    assert_eq!(server.disconnect_client(1, Some("kicked again")), Ok(false));
    assert_eq!(server.disconnect_client(42, None), Ok(false));
    run_frames(&mut [&mut server, &mut client], 3).unwrap();
    assert_eq!(server.disconnect_client(1, None), Ok(false));

    assert_eq!(
        *server_disconnected.borrow(),
        vec![(1, Some("kicked".to_string()))]
    );
    assert_eq!(
        *client_disconnected.borrow(),
        vec![(1, Some("kicked".to_string()))]
    );
    assert_eq!(client.disconnect_reason(), Some("kicked"));
    assert!(!client.is_listening());
    assert!(server.connected_peers().is_empty());
}

#[test]
fn severed_link_cleans_up_both_sides() {
    init_logger();
    let hub = LocalHub::new();
    let mut server = server_session(&hub, SessionConfig::default());
    let mut client = client_session(&hub, SessionConfig::default());
    let server_disconnected = record_disconnected(&mut server);
    assert_eq!(server.start_as_server(), Ok(true));
    assert_eq!(client.start_as_client(), Ok(true));
    assert_eq!(connect_all(&mut server, &mut [&mut client], 10), Ok(true));

    hub.sever_client(0);
    run_frames(&mut [&mut server, &mut client], 2).unwrap();

    assert_eq!(
        *server_disconnected.borrow(),
        vec![(1, Some(REASON_CONNECTION_LOST.to_string()))]
    );
    assert_eq!(server.peer_state(&1), ConnectionState::Disconnected);
    assert!(!client.is_listening());
    assert_eq!(client.disconnect_reason(), Some(REASON_CONNECTION_LOST));
    assert_eq!(hub.open_links(), 0);
}

#[test]
fn client_shutdown_tells_the_server() {
    init_logger();
    let hub = LocalHub::new();
    let mut server = server_session(&hub, SessionConfig::default());
    let mut client = client_session(&hub, SessionConfig::default());
    let server_disconnected = record_disconnected(&mut server);
    let client_disconnected = record_disconnected(&mut client);
    assert_eq!(server.start_as_server(), Ok(true));
    assert_eq!(client.start_as_client(), Ok(true));
    assert_eq!(connect_all(&mut server, &mut [&mut client], 10), Ok(true));

    client.shutdown().unwrap();
    assert_eq!(client_disconnected.borrow().len(), 1);
    run_frames(&mut [&mut client, &mut server], 1).unwrap();

    assert!(!client.is_listening());
    assert_eq!(server_disconnected.borrow().len(), 1);
    assert_eq!(server_disconnected.borrow()[0].0, 1);
    assert!(server.connected_peers().is_empty());
}
