//! Integration tests for messages a handler defers until a trigger key is
//! resolved: replay order, re-deferral, expiry and purge on disconnect

use std::{cell::Cell, rc::Rc, time::Duration};

use tether::{
    DeliveryClass, Dispatch, DispatchContext, InboundMessage, MessageEnvelope, MessageHandler,
    MessageKind, Session, SessionConfig, TriggerKey, SERVER_PEER_ID,
};
use tether_test::{client_session, connect_all, log, run_frames, server_session, Log, LocalHub};

const SPAWN: MessageKind = MessageKind::new(120);
const ENTITY: TriggerKey = TriggerKey(7);

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Defers every message on `ENTITY` until `ready` is set, then records the
/// first payload byte
fn gated_handler(ready: Rc<Cell<bool>>, applied: Log<u8>) -> Box<MessageHandler> {
    Box::new(move |_context: &mut DispatchContext, message: &InboundMessage| {
        if !ready.get() {
            return Dispatch::Defer(ENTITY);
        }
        applied.borrow_mut().push(message.payload[0]);
        Dispatch::Handled
    })
}

struct Gated {
    server: Session,
    client: Session,
    ready: Rc<Cell<bool>>,
    applied: Log<u8>,
}

impl Gated {
    fn connect(client_config: SessionConfig) -> Self {
        init_logger();
        let hub = LocalHub::new();
        let mut server = server_session(&hub, SessionConfig::default());
        let mut client = client_session(&hub, client_config);
        let ready = Rc::new(Cell::new(false));
        let applied = log();
        client
            .register_handler(SPAWN, gated_handler(ready.clone(), applied.clone()))
            .unwrap();

        assert_eq!(server.start_as_server(), Ok(true));
        assert_eq!(client.start_as_client(), Ok(true));
        assert_eq!(connect_all(&mut server, &mut [&mut client], 10), Ok(true));

        Self {
            server,
            client,
            ready,
            applied,
        }
    }

    fn send_spawn(&mut self, value: u8) {
        let envelope =
            MessageEnvelope::new(SPAWN, DeliveryClass::ReliableSequenced, vec![value]).to(1);
        assert_eq!(self.server.send(envelope), Ok(1));
    }

    fn run(&mut self, frames: usize) {
        run_frames(&mut [&mut self.server, &mut self.client], frames).unwrap();
    }
}

#[test]
fn deferred_messages_replay_in_arrival_order() {
    let mut gated = Gated::connect(SessionConfig::default());
    gated.send_spawn(1);
    gated.send_spawn(2);
    gated.run(1);
    gated.send_spawn(3);
    gated.run(1);

    assert!(gated.applied.borrow().is_empty());
    assert!(gated.client.deferred().has_key(&ENTITY));
    assert_eq!(gated.client.deferred().buffered_messages(&ENTITY), 3);
    assert_eq!(gated.client.network_stats().deferred_entries, 1);

    gated.ready.set(true);
    assert_eq!(gated.client.resolve_trigger(ENTITY), 3);
    assert_eq!(*gated.applied.borrow(), vec![1, 2, 3]);
    assert!(gated.client.deferred().is_empty());

    // later messages go straight through
    gated.send_spawn(4);
    gated.run(1);
    assert_eq!(*gated.applied.borrow(), vec![1, 2, 3, 4]);
}

#[test]
fn resolving_an_unknown_key_replays_nothing() {
    let mut gated = Gated::connect(SessionConfig::default());
    assert_eq!(gated.client.resolve_trigger(TriggerKey(99)), 0);
    assert!(gated.applied.borrow().is_empty());
}

#[test]
fn replayed_messages_may_defer_again() {
    let mut gated = Gated::connect(SessionConfig::default());
    gated.send_spawn(1);
    gated.send_spawn(2);
    gated.run(1);

    assert_eq!(gated.client.resolve_trigger(ENTITY), 2);
    assert_eq!(gated.client.deferred().buffered_messages(&ENTITY), 2);

    gated.ready.set(true);
    assert_eq!(gated.client.resolve_trigger(ENTITY), 2);
    assert_eq!(*gated.applied.borrow(), vec![1, 2]);
}

#[test]
fn unresolved_messages_expire() {
    let mut config = SessionConfig::default();
    config.deferred_message_timeout = Duration::from_millis(250);
    let mut gated = Gated::connect(config);
    assert_eq!(gated.client.deferred().timeout_ticks(), 5);

    gated.send_spawn(1);
    gated.run(1);
    let expiry = gated.client.deferred().expiry(&ENTITY).unwrap();
    assert!(expiry > gated.client.local_tick());

    gated.run(10);
    assert!(gated.client.deferred().is_empty());
    assert_eq!(gated.client.deferred().expired_total(), 1);
    assert_eq!(gated.client.network_stats().deferred_expired, 1);

    gated.ready.set(true);
    assert_eq!(gated.client.resolve_trigger(ENTITY), 0);
    assert!(gated.applied.borrow().is_empty());
}

#[test]
fn disconnect_discards_messages_deferred_from_the_peer() {
    init_logger();
    let hub = LocalHub::new();
    let mut server = server_session(&hub, SessionConfig::default());
    let mut client = client_session(&hub, SessionConfig::default());
    let ready = Rc::new(Cell::new(false));
    let applied = log();
    server
        .register_handler(SPAWN, gated_handler(ready.clone(), applied.clone()))
        .unwrap();
    assert_eq!(server.start_as_server(), Ok(true));
    assert_eq!(client.start_as_client(), Ok(true));
    assert_eq!(connect_all(&mut server, &mut [&mut client], 10), Ok(true));

    let envelope =
        MessageEnvelope::new(SPAWN, DeliveryClass::ReliableSequenced, vec![5]).to(SERVER_PEER_ID);
    client.send(envelope).unwrap();
    run_frames(&mut [&mut client, &mut server], 1).unwrap();
    assert_eq!(server.deferred().buffered_messages(&ENTITY), 1);

    assert_eq!(server.disconnect_client(1, None), Ok(true));
    assert!(server.deferred().is_empty());

    ready.set(true);
    assert_eq!(server.resolve_trigger(ENTITY), 0);
    assert!(applied.borrow().is_empty());
}

#[test]
fn messages_deferred_again_keep_their_original_expiry() {
    let mut config = SessionConfig::default();
    config.deferred_message_timeout = Duration::from_millis(250);
    let mut gated = Gated::connect(config);
    gated.send_spawn(1);
    gated.run(1);
    let expiry = gated.client.deferred().expiry(&ENTITY).unwrap();

    // each replay defers again, as if the trigger was resolved too early
    for _ in 0..10 {
        gated.client.resolve_trigger(ENTITY);
        if let Some(tick) = gated.client.deferred().expiry(&ENTITY) {
            assert_eq!(tick, expiry);
        }
        gated.run(1);
    }
    assert!(gated.client.deferred().is_empty());
    assert_eq!(gated.client.deferred().expired_total(), 1);

    gated.ready.set(true);
    assert_eq!(gated.client.resolve_trigger(ENTITY), 0);
    assert!(gated.applied.borrow().is_empty());
}
