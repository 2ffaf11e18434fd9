//! TCP transport tests
//!
//! Each test runs against a bare tokio listener standing in for an INDI
//! server.

use bytes::Bytes;
use indi_transport::{
    probe, TcpConfig, TcpTransport, TransportError, TransportEvent, TransportReceiver,
    TransportSender,
};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time::timeout;

async fn listener() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind failed");
    let addr = listener.local_addr().expect("no local addr").to_string();
    (listener, addr)
}

async fn next_event(receiver: &mut impl TransportReceiver) -> Option<TransportEvent> {
    timeout(Duration::from_secs(2), receiver.recv())
        .await
        .expect("timed out waiting for transport event")
}

#[tokio::test]
async fn test_bytes_pass_through_unframed() {
    let (listener, addr) = listener().await;

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.expect("accept failed");
        let mut buf = vec![0u8; 64];
        let n = stream.read(&mut buf).await.expect("read failed");
        buf.truncate(n);
        stream
            .write_all(b"<message message=\"hi\"/>\n")
            .await
            .expect("write failed");
        buf
    });

    let (sender, mut receiver) = TcpTransport::new()
        .connect(&addr)
        .await
        .expect("connect failed");
    assert!(sender.is_connected());

    sender
        .send(Bytes::from_static(b"<getProperties version=\"1.7\"/>\n"))
        .await
        .expect("send failed");

    let received = server.await.expect("server task failed");
    assert_eq!(received, b"<getProperties version=\"1.7\"/>\n");

    let mut collected = Vec::new();
    while collected.len() < 24 {
        match next_event(&mut receiver).await {
            Some(TransportEvent::Data(data)) => collected.extend_from_slice(&data),
            other => panic!("Expected Data event, got {:?}", other),
        }
    }
    assert_eq!(collected, b"<message message=\"hi\"/>\n");
}

#[tokio::test]
async fn test_remote_close_reported() {
    let (listener, addr) = listener().await;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept failed");
        drop(stream);
    });

    let (sender, mut receiver) = TcpTransport::new()
        .connect(&addr)
        .await
        .expect("connect failed");
    server.await.expect("server task failed");

    match next_event(&mut receiver).await {
        Some(TransportEvent::Disconnected { .. }) | Some(TransportEvent::Error(_)) => {}
        other => panic!("Expected Disconnected event, got {:?}", other),
    }

    // The io loop marks the link down once it exits
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!sender.is_connected());
    assert!(matches!(
        sender.send(Bytes::from_static(b"x")).await,
        Err(TransportError::NotConnected)
    ));
}

#[tokio::test]
async fn test_local_close_shuts_down_socket() {
    let (listener, addr) = listener().await;

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.expect("accept failed");
        let mut buf = Vec::new();
        // Returns once the client shuts its write half
        stream.read_to_end(&mut buf).await.expect("read failed");
        buf
    });

    let (sender, _receiver) = TcpTransport::new()
        .connect(&addr)
        .await
        .expect("connect failed");
    sender.close().await.expect("close failed");
    assert!(!sender.is_connected());

    let received = timeout(Duration::from_secs(2), server)
        .await
        .expect("server never saw shutdown")
        .expect("server task failed");
    assert!(received.is_empty());
}

#[tokio::test]
async fn test_queued_writes_flushed_before_shutdown() {
    let (listener, addr) = listener().await;

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.expect("accept failed");
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.expect("read failed");
        buf
    });

    let (sender, _receiver) = TcpTransport::new()
        .connect(&addr)
        .await
        .expect("connect failed");

    let mut expected = Vec::new();
    for i in 0..50 {
        let line = format!("<getProperties version=\"1.7\" device=\"D{}\"/>\n", i);
        expected.extend_from_slice(line.as_bytes());
        sender.send(Bytes::from(line)).await.expect("send failed");
    }
    sender.shutdown();
    timeout(Duration::from_secs(2), sender.closed())
        .await
        .expect("io task never finished");

    let received = timeout(Duration::from_secs(2), server)
        .await
        .expect("server never saw shutdown")
        .expect("server task failed");
    assert_eq!(received, expected);
}

#[tokio::test]
async fn test_probe_detects_listener() {
    let (listener, addr) = listener().await;
    let accept = tokio::spawn(async move {
        let _ = listener.accept().await;
    });

    assert!(probe(&addr, Duration::from_secs(1)).await);
    let _ = accept.await;
}

#[tokio::test]
async fn test_connect_timeout_config() {
    let config = TcpConfig {
        connect_timeout: Duration::from_millis(250),
        ..Default::default()
    };
    let transport = TcpTransport::with_config(config);
    assert_eq!(transport.config().connect_timeout, Duration::from_millis(250));
}
