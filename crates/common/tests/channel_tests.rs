//! Message channel behavior over scripted in-memory transports

use common::test_utils::{MockConnector, MockLink};
use common::{ChannelConfig, Error, MessageChannel};
use protocol::{ConnectionState, encode_frame};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn test_config() -> ChannelConfig {
    ChannelConfig {
        receive_timeout: Duration::from_millis(10),
        send_retry_delay: Duration::from_millis(10),
        reconnect_delay: Duration::from_millis(20),
        reconnect_delay_max: Duration::from_millis(100),
        max_payload: 16 * 1024,
    }
}

fn channel_over(link: &Arc<MockLink>) -> MessageChannel {
    MessageChannel::with_config(
        Box::new(MockConnector::new(Arc::clone(link))),
        test_config(),
    )
}

fn wait_until(limit: Duration, cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

#[test]
fn connect_reaches_connected_state() {
    let link = MockLink::new();
    let channel = channel_over(&link);

    channel.connect().unwrap();
    assert!(wait_until(Duration::from_secs(2), || channel.is_connected()));
    assert_eq!(link.connect_count(), 1);

    // A late subscriber still learns the current state immediately
    let states = channel.subscribe_state();
    assert_eq!(states.recv_blocking().unwrap(), ConnectionState::Connected);

    channel.dispose();
}

#[test]
fn messages_queued_while_disconnected_flush_in_order() {
    let link = MockLink::new();
    let channel = channel_over(&link);

    channel.send("first").unwrap();
    channel.send("second").unwrap();
    channel.send("third").unwrap();

    thread::sleep(Duration::from_millis(50));
    assert!(link.sent_frames().is_empty());

    channel.connect().unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        link.sent_frames().len() == 3
    }));

    let expected: Vec<Vec<u8>> = ["first", "second", "third"]
        .iter()
        .map(|m| encode_frame(m.as_bytes()).unwrap().to_vec())
        .collect();
    assert_eq!(link.sent_frames(), expected);

    channel.dispose();
}

#[test]
fn received_frames_are_decoded_and_delivered_in_order() {
    let link = MockLink::new();
    let channel = channel_over(&link);
    let messages = channel.subscribe_messages();

    channel.connect().unwrap();
    assert!(wait_until(Duration::from_secs(2), || channel.is_connected()));

    // Two frames arriving fragmented across arbitrary read boundaries
    let mut wire = encode_frame(b"hello").unwrap().to_vec();
    wire.extend_from_slice(&encode_frame(b"world").unwrap());
    for chunk in wire.chunks(3) {
        link.push_incoming(chunk);
    }

    assert_eq!(messages.recv_blocking().unwrap(), "hello");
    assert_eq!(messages.recv_blocking().unwrap(), "world");

    channel.dispose();
}

#[test]
fn invalid_utf8_payload_is_dropped() {
    let link = MockLink::new();
    let channel = channel_over(&link);
    let messages = channel.subscribe_messages();

    channel.connect().unwrap();
    assert!(wait_until(Duration::from_secs(2), || channel.is_connected()));

    link.push_incoming(&encode_frame(&[0xFF, 0xFE, 0xFD]).unwrap());
    link.push_incoming(&encode_frame(b"still alive").unwrap());

    assert_eq!(messages.recv_blocking().unwrap(), "still alive");
    assert!(channel.is_connected());

    channel.dispose();
}

#[test]
fn garbage_between_frames_is_absorbed() {
    let link = MockLink::new();
    let channel = channel_over(&link);
    let messages = channel.subscribe_messages();

    channel.connect().unwrap();
    assert!(wait_until(Duration::from_secs(2), || channel.is_connected()));

    link.push_incoming(&[0xAA, 0xBB, 0xCC]);
    link.push_incoming(&encode_frame(b"clean").unwrap());

    assert_eq!(messages.recv_blocking().unwrap(), "clean");
    assert!(channel.is_connected());

    channel.dispose();
}

#[test]
fn transport_failure_triggers_automatic_reconnect() {
    let link = MockLink::new();
    let channel = channel_over(&link);

    channel.connect().unwrap();
    assert!(wait_until(Duration::from_secs(2), || channel.is_connected()));

    link.trip_receive();

    // No manual connect; the supervisor re-establishes on its own
    assert!(wait_until(Duration::from_secs(3), || {
        link.connect_count() >= 2 && channel.is_connected()
    }));

    channel.dispose();
}

#[test]
fn accessory_role_stays_disconnected_after_loss() {
    let link = MockLink::new();
    let channel = MessageChannel::with_config(
        Box::new(MockConnector::new(Arc::clone(&link)).without_reconnect()),
        test_config(),
    );

    channel.connect().unwrap();
    assert!(wait_until(Duration::from_secs(2), || channel.is_connected()));

    link.trip_receive();
    assert!(wait_until(Duration::from_secs(2), || {
        channel.state() == ConnectionState::Disconnected
    }));

    thread::sleep(Duration::from_millis(100));
    assert_eq!(link.connect_count(), 1);
    assert!(!channel.is_connected());

    channel.dispose();
}

#[test]
fn detach_notification_disconnects_without_retry() {
    let link = MockLink::new();
    let channel = channel_over(&link);

    channel.connect().unwrap();
    assert!(wait_until(Duration::from_secs(2), || channel.is_connected()));

    channel.notify_detached();
    assert!(wait_until(Duration::from_secs(2), || {
        channel.state() == ConnectionState::Disconnected
    }));

    // A detach is not a loss; the supervisor does not try to reconnect
    thread::sleep(Duration::from_millis(100));
    assert_eq!(link.connect_count(), 1);

    channel.dispose();
}

#[test]
fn dispose_is_idempotent_and_rejects_further_use() {
    let link = MockLink::new();
    let channel = channel_over(&link);

    channel.connect().unwrap();
    assert!(wait_until(Duration::from_secs(2), || channel.is_connected()));

    channel.dispose();
    channel.dispose();

    assert_eq!(channel.state(), ConnectionState::Disconnected);
    assert!(matches!(channel.send("late"), Err(Error::Disposed)));
    assert!(matches!(channel.connect(), Err(Error::Disposed)));
}

#[test]
fn oversized_send_is_rejected() {
    let link = MockLink::new();
    let channel = channel_over(&link);

    let huge = "x".repeat(16 * 1024 + 1);
    assert!(matches!(
        channel.send(&huge),
        Err(Error::Protocol(protocol::ProtocolError::PayloadTooLarge { .. }))
    ));

    // The bound itself is still fine
    let exact = "x".repeat(16 * 1024);
    channel.send(&exact).unwrap();

    channel.dispose();
}

#[test]
fn failed_send_is_requeued_and_redelivered() {
    let link = MockLink::new();
    let channel = channel_over(&link);

    channel.connect().unwrap();
    assert!(wait_until(Duration::from_secs(2), || channel.is_connected()));

    link.set_fail_sends(true);
    channel.send("persistent").unwrap();

    thread::sleep(Duration::from_millis(100));
    assert!(link.sent_frames().is_empty());

    link.set_fail_sends(false);
    assert!(wait_until(Duration::from_secs(3), || {
        link.sent_frames().len() == 1
    }));
    assert_eq!(
        link.sent_frames()[0],
        encode_frame(b"persistent").unwrap().to_vec()
    );

    channel.dispose();
}

#[test]
fn permission_prompt_state_is_forwarded() {
    let link = MockLink::new();
    let channel = MessageChannel::with_config(
        Box::new(MockConnector::new(Arc::clone(&link)).with_permission_prompt()),
        test_config(),
    );
    let states = channel.subscribe_state();

    channel.connect().unwrap();

    let mut seen = Vec::new();
    loop {
        let state = states.recv_blocking().unwrap();
        seen.push(state);
        if state == ConnectionState::Connected {
            break;
        }
    }
    assert!(seen.contains(&ConnectionState::Searching));
    assert!(seen.contains(&ConnectionState::PermissionRequested));

    channel.dispose();
}

#[test]
fn explicit_connect_failure_surfaces_error_then_recovers() {
    let link = MockLink::new();
    let channel = MessageChannel::with_config(
        Box::new(MockConnector::new(Arc::clone(&link)).failing_first()),
        test_config(),
    );

    channel.connect().unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        channel.state() == ConnectionState::Error
    }));
    assert_eq!(link.connect_count(), 0);

    // An explicit connect is one attempt; a later request starts fresh
    channel.connect().unwrap();
    assert!(wait_until(Duration::from_secs(2), || channel.is_connected()));
    assert_eq!(link.connect_count(), 1);

    channel.dispose();
}
