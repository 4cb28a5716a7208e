//! Accessory stream behavior over a socketpair standing in for the
//! platform-delivered descriptor

use accessory::{AccessoryConnector, AccessoryStream};
use common::{ChannelConfig, Connector, Error, MessageChannel, Transport};
use protocol::{ConnectionState, encode_frame};
use std::io::{Read, Write};
use std::os::fd::OwnedFd;
use std::os::unix::net::UnixStream;
use std::thread;
use std::time::{Duration, Instant};

fn stream_pair() -> (AccessoryStream, UnixStream) {
    let (ours, theirs) = UnixStream::pair().expect("socketpair");
    (AccessoryStream::from_fd(OwnedFd::from(ours)), theirs)
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
fn send_writes_through_to_peer() {
    let (stream, mut peer) = stream_pair();

    stream.send(b"hello peer").unwrap();

    let mut buf = [0u8; 32];
    let n = peer.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"hello peer");
}

#[test]
fn receive_returns_none_on_idle_timeout() {
    let (stream, _peer) = stream_pair();

    let started = Instant::now();
    let result = stream.receive(Duration::from_millis(50)).unwrap();
    assert!(result.is_none());
    assert!(started.elapsed() >= Duration::from_millis(40));
}

#[test]
fn receive_picks_up_written_bytes() {
    let (stream, mut peer) = stream_pair();

    peer.write_all(&[1, 2, 3, 4]).unwrap();
    let bytes = stream
        .receive(Duration::from_millis(500))
        .unwrap()
        .expect("bytes should be ready");
    assert_eq!(bytes, vec![1, 2, 3, 4]);
}

#[test]
fn peer_hangup_is_a_transport_fault() {
    let (stream, peer) = stream_pair();
    drop(peer);

    let result = stream.receive(Duration::from_millis(500));
    assert!(matches!(result, Err(Error::Transport(_))));
}

#[test]
fn closed_stream_rejects_io() {
    let (stream, _peer) = stream_pair();
    stream.close();

    assert!(matches!(stream.send(b"x"), Err(Error::Transport(_))));
    assert!(matches!(
        stream.receive(Duration::from_millis(10)),
        Err(Error::Transport(_))
    ));
}

#[test]
fn fd_connector_connects_exactly_once() {
    let (ours, _theirs) = UnixStream::pair().expect("socketpair");
    let mut connector = AccessoryConnector::from_fd(OwnedFd::from(ours));
    let sink = |_state: ConnectionState| {};

    assert!(connector.connect(&sink).is_ok());
    assert!(matches!(connector.connect(&sink), Err(Error::NotFound)));
    assert!(!connector.reconnects());
}

#[test]
fn channel_over_socketpair_exchanges_messages() {
    let (ours, mut peer) = UnixStream::pair().expect("socketpair");
    let connector = AccessoryConnector::from_fd(OwnedFd::from(ours));

    let config = ChannelConfig {
        receive_timeout: Duration::from_millis(20),
        ..ChannelConfig::default()
    };
    let channel = MessageChannel::with_config(Box::new(connector), config);
    let messages = channel.subscribe_messages();

    channel.connect().unwrap();
    assert!(wait_until(Duration::from_secs(2), || channel.is_connected()));

    // Host to accessory
    peer.write_all(&encode_frame(b"from host").unwrap()).unwrap();
    assert_eq!(messages.recv_blocking().unwrap(), "from host");

    // Accessory to host
    channel.send("from accessory").unwrap();
    let expected = encode_frame(b"from accessory").unwrap();
    let mut buf = vec![0u8; expected.len()];
    peer.read_exact(&mut buf).unwrap();
    assert_eq!(buf, expected.to_vec());

    channel.dispose();
}

#[test]
fn channel_goes_disconnected_when_host_vanishes() {
    let (ours, peer) = UnixStream::pair().expect("socketpair");
    let connector = AccessoryConnector::from_fd(OwnedFd::from(ours));

    let config = ChannelConfig {
        receive_timeout: Duration::from_millis(20),
        ..ChannelConfig::default()
    };
    let channel = MessageChannel::with_config(Box::new(connector), config);

    channel.connect().unwrap();
    assert!(wait_until(Duration::from_secs(2), || channel.is_connected()));

    drop(peer);
    assert!(wait_until(Duration::from_secs(2), || {
        channel.state() == ConnectionState::Disconnected
    }));

    channel.dispose();
}
