//! End-to-end tests for the unicast data transport on the loopback interface.

use std::time::Duration;

use lanbus::net::protocol::encode_frame;
use lanbus::net::transport::DataTransport;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::time::timeout;

#[tokio::test]
async fn loopback_send_and_receive() {
    let receiver = DataTransport::bind(Handle::current(), 0).unwrap();
    let sender = DataTransport::bind(Handle::current(), 0).unwrap();
    assert_ne!(receiver.local_port(), 0);

    let (tx, mut rx) = mpsc::unbounded_channel();
    receiver.start(Box::new(move |msg| {
        let _ = tx.send(msg);
    }));

    sender.send_to("127.0.0.1", receiver.local_port(), "test/topic", b"hello");

    let msg = timeout(Duration::from_millis(500), rx.recv())
        .await
        .expect("no datagram within 500ms")
        .expect("receive channel closed");

    assert_eq!(msg.topic, "test/topic");
    assert_eq!(msg.payload, b"hello");
    assert_eq!(msg.remote_ip, "127.0.0.1");
    assert_ne!(msg.remote_port, 0);

    receiver.stop();
    sender.stop();
}

#[tokio::test]
async fn malformed_datagrams_are_dropped() {
    let receiver = DataTransport::bind(Handle::current(), 0).unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    receiver.start(Box::new(move |msg| {
        let _ = tx.send(msg);
    }));

    let probe = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    let dest = ("127.0.0.1", receiver.local_port());

    // Shorter than the minimum frame.
    probe.send_to(&[1, 2, 3], dest).unwrap();
    // Topic length overruns the datagram.
    let mut bad = encode_frame("topic", b"x");
    bad[0] = 0xff;
    bad[1] = 0xff;
    probe.send_to(&bad, dest).unwrap();
    // A well-formed frame behind the garbage.
    probe.send_to(&encode_frame("ok", b"payload"), dest).unwrap();

    let msg = timeout(Duration::from_millis(500), rx.recv())
        .await
        .expect("no datagram within 500ms")
        .expect("receive channel closed");

    assert_eq!(msg.topic, "ok");
    assert_eq!(msg.payload, b"payload");

    receiver.stop();
}

#[tokio::test]
async fn empty_payload_round_trips() {
    let receiver = DataTransport::bind(Handle::current(), 0).unwrap();
    let sender = DataTransport::bind(Handle::current(), 0).unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    receiver.start(Box::new(move |msg| {
        let _ = tx.send(msg);
    }));

    sender.send_to("127.0.0.1", receiver.local_port(), "empty", b"");

    let msg = timeout(Duration::from_millis(500), rx.recv())
        .await
        .expect("no datagram within 500ms")
        .expect("receive channel closed");

    assert_eq!(msg.topic, "empty");
    assert!(msg.payload.is_empty());

    receiver.stop();
    sender.stop();
}

#[tokio::test]
async fn stopped_transport_receives_nothing() {
    let receiver = DataTransport::bind(Handle::current(), 0).unwrap();
    let sender = DataTransport::bind(Handle::current(), 0).unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let loop_handle = receiver.start(Box::new(move |msg| {
        let _ = tx.send(msg);
    }));

    receiver.stop();
    let _ = timeout(Duration::from_millis(500), loop_handle).await;

    sender.send_to("127.0.0.1", receiver.local_port(), "late", b"x");
    let outcome = timeout(Duration::from_millis(200), rx.recv()).await;
    assert!(matches!(outcome, Err(_) | Ok(None)));
}
