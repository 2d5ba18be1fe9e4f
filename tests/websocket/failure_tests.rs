//! Handshake failures, protocol violations and backoff give-up.

use std::time::Duration;

use bytes::BytesMut;
use pretty_assertions::assert_eq;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use gateway_socket::domain::handshake::{find_head_end, UpgradeRequest};
use gateway_socket::domain::ReconnectConfig;
use gateway_socket::{ClientEvent, ConnectionState, WebSocketClient};

use crate::common::{client_options, fast_reconnect, recv, recv_until};

/// Accept one socket and read its upgrade request.
async fn accept_upgrade(listener: &TcpListener) -> (TcpStream, UpgradeRequest) {
    let (mut stream, _) = listener.accept().await.unwrap();
    let mut buf = BytesMut::new();
    let end = loop {
        if let Some(end) = find_head_end(&buf) {
            break end;
        }
        let mut chunk = [0u8; 1024];
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "client hung up during upgrade");
        buf.extend_from_slice(&chunk[..n]);
    };
    let head = std::str::from_utf8(&buf[..end]).unwrap();
    let request = UpgradeRequest::parse(head).unwrap();
    (stream, request)
}

/// Port with nothing listening on it.
async fn dead_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

#[test]
fn test_invalid_url_rejected_up_front() {
    // Rejected before any task is spawned, so no runtime is needed
    let err = WebSocketClient::connect("http://example.com", client_options(ReconnectConfig::disabled()))
        .unwrap_err();
    assert!(err.to_string().contains("unsupported scheme"));
}

#[tokio::test]
async fn test_upgrade_request_shape() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/chat?room=1", listener.local_addr().unwrap());
    let (_client, _events) = WebSocketClient::connect_with_headers(
        &url,
        vec![("Authorization".into(), "Bot abc".into())],
        client_options(ReconnectConfig::disabled()),
    )
    .unwrap();

    let (_stream, request) = accept_upgrade(&listener).await;
    assert_eq!(request.path, "/chat?room=1");
    assert_eq!(request.head.header("Authorization"), Some("Bot abc"));
    assert_eq!(request.head.header("Sec-WebSocket-Version"), Some("13"));
    assert_eq!(request.key.len(), 24);
}

#[tokio::test]
async fn test_non_101_response_is_an_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/", listener.local_addr().unwrap());
    let (client, mut events) =
        WebSocketClient::connect(&url, client_options(ReconnectConfig::disabled())).unwrap();

    let (mut stream, _) = accept_upgrade(&listener).await;
    stream
        .write_all(b"HTTP/1.1 403 Forbidden\r\nContent-Length: 0\r\n\r\n")
        .await
        .unwrap();

    match recv(&mut events).await {
        ClientEvent::Error(message) => assert!(message.contains("403"), "{message}"),
        other => panic!("unexpected event: {other:?}"),
    }
    client.join().await;
    assert_eq!(client.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_bad_accept_key_is_an_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/", listener.local_addr().unwrap());
    let (_client, mut events) =
        WebSocketClient::connect(&url, client_options(ReconnectConfig::disabled())).unwrap();

    let (mut stream, _) = accept_upgrade(&listener).await;
    stream
        .write_all(
            b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
              Sec-WebSocket-Accept: bm90LXRoZS1yaWdodC1rZXk=\r\n\r\n",
        )
        .await
        .unwrap();

    match recv(&mut events).await {
        ClientEvent::Error(message) => assert!(message.contains("Sec-WebSocket-Accept"), "{message}"),
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn test_reserved_opcode_drops_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/", listener.local_addr().unwrap());
    let (_client, mut events) =
        WebSocketClient::connect(&url, client_options(ReconnectConfig::disabled())).unwrap();

    let (mut stream, request) = accept_upgrade(&listener).await;
    let mut response = request.accept_response(None).into_bytes();
    // Reserved opcode 0x3, sent in the same segment as the 101
    response.extend_from_slice(&[0x83, 0x00]);
    stream.write_all(&response).await.unwrap();

    assert_eq!(recv(&mut events).await, ClientEvent::Connected);
    match recv(&mut events).await {
        ClientEvent::Error(message) => assert!(message.starts_with("Protocol error"), "{message}"),
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn test_fragmented_server_message() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/", listener.local_addr().unwrap());
    let (_client, mut events) =
        WebSocketClient::connect(&url, client_options(ReconnectConfig::disabled())).unwrap();

    let (mut stream, request) = accept_upgrade(&listener).await;
    stream
        .write_all(request.accept_response(None).as_bytes())
        .await
        .unwrap();
    // "Hello" as a text fragment plus a final continuation
    stream.write_all(&[0x01, 0x03, 0x48, 0x65, 0x6c]).await.unwrap();
    stream.write_all(&[0x80, 0x02, 0x6c, 0x6f]).await.unwrap();

    assert_eq!(recv(&mut events).await, ClientEvent::Connected);
    assert_eq!(
        recv(&mut events).await,
        ClientEvent::Message(gateway_socket::Message::Text("Hello".into()))
    );
}

#[tokio::test]
async fn test_abrupt_drop_reports_lost_then_reconnects() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/", listener.local_addr().unwrap());
    let (client, mut events) = WebSocketClient::connect(&url, client_options(fast_reconnect())).unwrap();

    let (mut stream, request) = accept_upgrade(&listener).await;
    stream
        .write_all(request.accept_response(None).as_bytes())
        .await
        .unwrap();
    assert_eq!(recv(&mut events).await, ClientEvent::Connected);

    // No close frame, just a dead socket
    drop(stream);

    match recv(&mut events).await {
        ClientEvent::Error(message) => {
            assert!(message.starts_with("Connection lost"), "{message}");
            assert!(message.ends_with(" - reconnecting"), "{message}");
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert!(matches!(
        recv(&mut events).await,
        ClientEvent::Reconnecting { attempt: 1, .. }
    ));

    client.stop();
    tokio::time::timeout(Duration::from_secs(2), client.join())
        .await
        .expect("worker did not stop promptly");
}

#[tokio::test]
async fn test_handshake_timeout() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/", listener.local_addr().unwrap());
    let mut options = client_options(ReconnectConfig::disabled());
    options.handshake_timeout = Duration::from_millis(100);
    let (_client, mut events) = WebSocketClient::connect(&url, options).unwrap();

    // Accept but never answer
    let (_stream, _) = accept_upgrade(&listener).await;
    match recv(&mut events).await {
        ClientEvent::Error(message) => assert!(message.contains("Timed out"), "{message}"),
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn test_gives_up_after_max_attempts() {
    let url = format!("ws://127.0.0.1:{}/", dead_port().await);
    let reconnect = ReconnectConfig {
        max_attempts: 2,
        ..fast_reconnect()
    };
    let (client, mut events) = WebSocketClient::connect(&url, client_options(reconnect)).unwrap();

    let mut attempts = Vec::new();
    loop {
        match recv(&mut events).await {
            ClientEvent::Reconnecting { attempt, .. } => attempts.push(attempt),
            ClientEvent::Error(message) if message.contains("Gave up") => break,
            ClientEvent::Error(_) => {}
            other => panic!("unexpected event: {other:?}"),
        }
    }
    assert_eq!(attempts, vec![1, 2]);
    client.join().await;
}

#[tokio::test]
async fn test_backoff_delays_double() {
    let url = format!("ws://127.0.0.1:{}/", dead_port().await);
    let (client, mut events) = WebSocketClient::connect(&url, client_options(fast_reconnect())).unwrap();

    let mut delays = Vec::new();
    while delays.len() < 4 {
        if let ClientEvent::Reconnecting { delay, .. } =
            recv_until(&mut events, |e| matches!(e, ClientEvent::Reconnecting { .. })).await
        {
            delays.push(delay.as_millis());
        }
    }
    assert_eq!(delays, vec![50, 100, 200, 200]);
    client.stop();
    client.join().await;
}

#[tokio::test]
async fn test_close_during_backoff() {
    let url = format!("ws://127.0.0.1:{}/", dead_port().await);
    let mut reconnect = fast_reconnect();
    reconnect.initial_delay = Duration::from_secs(30);
    reconnect.max_delay = Duration::from_secs(30);
    let (client, mut events) = WebSocketClient::connect(&url, client_options(reconnect)).unwrap();

    recv_until(&mut events, |e| matches!(e, ClientEvent::Reconnecting { .. })).await;
    client.close(1000, "user");

    assert_eq!(
        recv(&mut events).await,
        ClientEvent::Closed {
            code: 1000,
            reason: "user".into()
        }
    );
    tokio::time::timeout(Duration::from_secs(2), client.join())
        .await
        .expect("worker did not stop promptly");
}
