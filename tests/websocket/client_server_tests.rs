//! Client and server talking over loopback.

use bytes::Bytes;
use pretty_assertions::assert_eq;

use gateway_socket::application::ServerOptions;
use gateway_socket::domain::ReconnectConfig;
use gateway_socket::infrastructure::tls;
use gateway_socket::shared::error::SendError;
use gateway_socket::{ClientEvent, ConnectionState, Message, ServerEvent, WebSocketClient, WebSocketServer};

use crate::common::{client_options, fast_reconnect, loopback_options, recv, recv_until, EchoServer};

#[tokio::test]
async fn test_text_and_binary_echo() {
    let echo = EchoServer::start(loopback_options()).await;
    let (client, mut events) =
        WebSocketClient::connect(&echo.url(), client_options(ReconnectConfig::disabled())).unwrap();

    assert_eq!(recv(&mut events).await, ClientEvent::Connected);
    assert_eq!(client.state(), ConnectionState::Connected);

    client.send_text("hello").unwrap();
    assert_eq!(recv(&mut events).await, ClientEvent::Message(Message::Text("hello".into())));

    let payload: Vec<u8> = (0..=255u8).cycle().take(70_000).collect();
    client.send_binary(payload.clone()).unwrap();
    assert_eq!(
        recv(&mut events).await,
        ClientEvent::Message(Message::Binary(Bytes::from(payload)))
    );

    client.close(1000, "done");
    client.join().await;
}

#[tokio::test]
async fn test_messages_keep_order() {
    let echo = EchoServer::start(loopback_options()).await;
    let (client, mut events) =
        WebSocketClient::connect(&echo.url(), client_options(ReconnectConfig::disabled())).unwrap();
    assert_eq!(recv(&mut events).await, ClientEvent::Connected);

    for i in 0..20 {
        client.send_text(format!("msg-{i}")).unwrap();
    }
    for i in 0..20 {
        assert_eq!(
            recv(&mut events).await,
            ClientEvent::Message(Message::Text(format!("msg-{i}")))
        );
    }
}

#[tokio::test]
async fn test_send_before_connected_is_rejected() {
    let echo = EchoServer::start(loopback_options()).await;
    let (client, _events) =
        WebSocketClient::connect(&echo.url(), client_options(ReconnectConfig::disabled())).unwrap();

    // The worker has not been polled yet on this single-threaded runtime
    assert_eq!(client.send_text("too early"), Err(SendError::NotConnected));
}

#[tokio::test]
async fn test_client_close_reaches_server() {
    let mut echo = EchoServer::start(loopback_options()).await;
    let (client, mut events) =
        WebSocketClient::connect(&echo.url(), client_options(fast_reconnect())).unwrap();
    assert_eq!(recv(&mut events).await, ClientEvent::Connected);

    client.close(4000, "bye");
    client.close(1000, "ignored");

    assert_eq!(
        recv(&mut events).await,
        ClientEvent::Closed {
            code: 4000,
            reason: "bye".into()
        }
    );
    let (_, code, reason) = recv(&mut echo.disconnects).await;
    assert_eq!((code, reason.as_str()), (4000, "bye"));

    // No reconnect after a caller close
    client.join().await;
    assert_eq!(client.state(), ConnectionState::Closed);
    assert!(!client.is_connected());
}

#[tokio::test]
async fn test_server_close_without_reconnect() {
    let (server, mut server_events) = WebSocketServer::bind(loopback_options()).await.unwrap();
    let url = format!("ws://{}/", server.local_addr());
    let (client, mut events) =
        WebSocketClient::connect(&url, client_options(ReconnectConfig::disabled())).unwrap();
    assert_eq!(recv(&mut events).await, ClientEvent::Connected);

    let id = match recv(&mut server_events).await {
        ServerEvent::ClientConnected { id, .. } => id,
        other => panic!("unexpected event: {other:?}"),
    };
    assert_eq!(server.connection_count(), 1);
    server.connection(&id).unwrap().close(4001, "kicked");

    assert_eq!(
        recv(&mut events).await,
        ClientEvent::Closed {
            code: 4001,
            reason: "kicked".into()
        }
    );
    client.join().await;
    assert_eq!(client.state(), ConnectionState::Closed);

    let disconnected = recv_until(&mut server_events, |e| matches!(e, ServerEvent::ClientDisconnected { .. })).await;
    assert_eq!(
        disconnected,
        ServerEvent::ClientDisconnected {
            id,
            code: 4001,
            reason: "kicked".into()
        }
    );
}

#[tokio::test]
async fn test_reconnects_after_server_close() {
    let (server, mut server_events) = WebSocketServer::bind(loopback_options()).await.unwrap();
    let url = format!("ws://{}/", server.local_addr());
    let (client, mut events) = WebSocketClient::connect(&url, client_options(fast_reconnect())).unwrap();
    assert_eq!(recv(&mut events).await, ClientEvent::Connected);

    let first = match recv(&mut server_events).await {
        ServerEvent::ClientConnected { id, .. } => id,
        other => panic!("unexpected event: {other:?}"),
    };
    server.connection(&first).unwrap().close(1012, "restarting");

    assert!(matches!(recv(&mut events).await, ClientEvent::Closed { code: 1012, .. }));
    match recv(&mut events).await {
        ClientEvent::Reconnecting { attempt, delay } => {
            assert_eq!(attempt, 1);
            assert_eq!(delay, std::time::Duration::from_millis(50));
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert_eq!(recv(&mut events).await, ClientEvent::Connected);

    let second = recv_until(&mut server_events, |e| matches!(e, ServerEvent::ClientConnected { .. })).await;
    assert!(matches!(second, ServerEvent::ClientConnected { id, .. } if id != first));

    client.send_text("after reconnect").unwrap();
    client.close(1000, "");
    client.join().await;
}

#[tokio::test]
async fn test_server_shutdown_sends_going_away() {
    let (server, _server_events) = WebSocketServer::bind(loopback_options()).await.unwrap();
    let url = format!("ws://{}/", server.local_addr());
    let (client, mut events) =
        WebSocketClient::connect(&url, client_options(ReconnectConfig::disabled())).unwrap();
    assert_eq!(recv(&mut events).await, ClientEvent::Connected);

    server.shutdown().await;

    assert_eq!(
        recv(&mut events).await,
        ClientEvent::Closed {
            code: 1001,
            reason: "Server going away".into()
        }
    );
    client.join().await;
}

#[tokio::test]
async fn test_broadcast_reaches_every_client() {
    let (server, _server_events) = WebSocketServer::bind(loopback_options()).await.unwrap();
    let url = format!("ws://{}/", server.local_addr());

    let (a, mut a_events) = WebSocketClient::connect(&url, client_options(ReconnectConfig::disabled())).unwrap();
    let (b, mut b_events) = WebSocketClient::connect(&url, client_options(ReconnectConfig::disabled())).unwrap();
    assert_eq!(recv(&mut a_events).await, ClientEvent::Connected);
    assert_eq!(recv(&mut b_events).await, ClientEvent::Connected);

    // The client sees 101 before the server registers the connection
    while server.connection_count() < 2 {
        tokio::task::yield_now().await;
    }
    assert_eq!(server.broadcast_text("news"), 2);

    let expected = ClientEvent::Message(Message::Text("news".into()));
    assert_eq!(recv(&mut a_events).await, expected);
    assert_eq!(recv(&mut b_events).await, expected);

    a.close(1000, "");
    b.close(1000, "");
}

#[tokio::test]
async fn test_subprotocol_negotiation() {
    let echo = EchoServer::start(ServerOptions {
        protocols: vec!["chat".into()],
        ..loopback_options()
    })
    .await;
    let mut options = client_options(ReconnectConfig::disabled());
    options.protocols = vec!["superchat".into(), "chat".into()];

    let (client, mut events) = WebSocketClient::connect(&echo.url(), options).unwrap();
    assert_eq!(recv(&mut events).await, ClientEvent::Connected);
    client.send_text("negotiated").unwrap();
    assert_eq!(
        recv(&mut events).await,
        ClientEvent::Message(Message::Text("negotiated".into()))
    );
}

#[tokio::test]
async fn test_tls_echo() {
    let generated = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let cert_pem = generated.cert.pem();
    let key_pem = generated.key_pair.serialize_pem();
    let server_config = tls::server_config_from_pem(&mut cert_pem.as_bytes(), &mut key_pem.as_bytes()).unwrap();

    let echo = EchoServer::start(ServerOptions {
        tls: Some(server_config),
        ..loopback_options()
    })
    .await;
    let url = format!("wss://localhost:{}/secure", echo.server.local_addr().port());

    let mut options = client_options(ReconnectConfig::disabled());
    options.tls_verify = false;
    let (client, mut events) = WebSocketClient::connect(&url, options).unwrap();

    assert_eq!(recv(&mut events).await, ClientEvent::Connected);
    client.send_text("over tls").unwrap();
    assert_eq!(
        recv(&mut events).await,
        ClientEvent::Message(Message::Text("over tls".into()))
    );

    client.close(1000, "done");
    assert!(matches!(recv(&mut events).await, ClientEvent::Closed { code: 1000, .. }));
    client.join().await;
}
