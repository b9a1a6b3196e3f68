//! Property-based tests for message size handling.
//!
//! Invariants:
//! 1. Any message up to the fragmented-message limit arrives intact, whatever the MTU
//! 2. No packet handed to the transport is larger than the peer's MTU
//! 3. Stored MTUs are word aligned and stay inside their bounds

use proptest::prelude::*;

use tether::{DeliveryClass, InboundMessage, MessageEnvelope, SessionConfig};
use tether_shared::{
    align_mtu, ConnectionConfig, MessageManager, DEFAULT_FRAGMENTED_MESSAGE_MAX_BYTES,
    MIN_MTU_BYTES,
};
use tether_test::{
    client_session, connect_all, log, recording_handler, run_frames, server_session, EndpointId,
    LocalHub, CHAT,
};

// the tick stamp takes one byte of the message body
const MAX_PAYLOAD: usize = DEFAULT_FRAGMENTED_MESSAGE_MAX_BYTES - 1;

fn payload_len_strategy() -> impl Strategy<Value = usize> {
    prop_oneof![
        4 => 1usize..4096,
        1 => 4096usize..=MAX_PAYLOAD,
        1 => Just(MAX_PAYLOAD),
    ]
}

fn mtu_strategy() -> impl Strategy<Value = usize> {
    prop_oneof![Just(1296usize), 256usize..1500]
}

/// Sends one message of `len` bytes from server to client over a link with
/// the given MTU. Returns what arrived and the size of every packet sent.
fn deliver(len: usize, mtu: usize, seed: u8) -> (Vec<InboundMessage>, Vec<usize>) {
    let hub = LocalHub::new();
    let mut server = server_session(&hub, SessionConfig::default());
    let mut client = client_session(&hub, SessionConfig::default());
    let received = log();
    client
        .register_handler(CHAT, recording_handler(received.clone()))
        .unwrap();
    assert_eq!(server.start_as_server(), Ok(true));
    assert_eq!(client.start_as_client(), Ok(true));
    assert_eq!(connect_all(&mut server, &mut [&mut client], 10), Ok(true));
    server.set_peer_mtu(1, mtu);
    hub.clear_sent_packets();

    let payload: Vec<u8> = (0..len)
        .map(|index| (index as u8).wrapping_mul(31).wrapping_add(seed))
        .collect();
    let envelope = MessageEnvelope::new(CHAT, DeliveryClass::ReliableFragmented, payload).to(1);
    assert_eq!(server.send(envelope), Ok(1));
    run_frames(&mut [&mut server, &mut client], 1).unwrap();

    let packets = hub
        .sent_packets()
        .into_iter()
        .filter(|packet| packet.from == EndpointId::Server)
        .map(|packet| packet.payload.len())
        .collect();
    let received = received.borrow().clone();
    (received, packets)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_fragmented_messages_arrive_intact(
        len in payload_len_strategy(),
        mtu in mtu_strategy(),
        seed in any::<u8>(),
    ) {
        let (received, packets) = deliver(len, mtu, seed);
        let mtu = align_mtu(mtu);

        prop_assert_eq!(received.len(), 1);
        let payload = &received[0].payload;
        prop_assert_eq!(payload.len(), len);
        for (index, byte) in payload.iter().enumerate() {
            prop_assert_eq!(*byte, (index as u8).wrapping_mul(31).wrapping_add(seed));
        }
        prop_assert!(packets.iter().all(|size| *size <= mtu));
    }

    #[test]
    fn prop_stored_mtu_is_aligned_and_bounded(size in any::<usize>()) {
        let config = ConnectionConfig::default();
        let max = config.fragmented_message_max_size;
        let mut manager = MessageManager::new(config);

        let stored = manager.set_peer_mtu(1, size);

        prop_assert_eq!(stored % 8, 0);
        prop_assert!(stored >= MIN_MTU_BYTES);
        prop_assert!(stored <= max);
        if size >= MIN_MTU_BYTES {
            prop_assert!(stored <= size);
            prop_assert!(size - stored < 8 || size > max);
        }
        prop_assert_eq!(manager.peer_mtu(&1), stored);
    }
}
