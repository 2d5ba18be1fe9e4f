//! Identify, heartbeat, resume and invalid-session flows over loopback.

use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;

use gateway_socket::domain::gateway::{Activity, GatewayState};
use gateway_socket::{GatewayClient, GatewayConfig, GatewayEvent};

use crate::common::{client_options, fast_reconnect, recv, recv_until, FakeGateway, FakeGatewayOptions, SESSION_ID};

const TOKEN: &str = "test-token";

fn config(gateway: &FakeGateway) -> GatewayConfig {
    GatewayConfig {
        invalid_session_delay: Duration::from_millis(50),
        client: client_options(fast_reconnect()),
        ..GatewayConfig::new(gateway.url(), TOKEN, 513)
    }
}

/// Connect and wait for READY.
async fn ready_client(gateway: &mut FakeGateway) -> (GatewayClient, UnboundedReceiver<GatewayEvent>) {
    let (client, mut events) = GatewayClient::connect(config(gateway)).unwrap();
    assert_eq!(recv(&mut events).await, GatewayEvent::Connected);

    let identify = gateway.next_op(2).await;
    assert_eq!(identify.d["token"], TOKEN);
    assert_eq!(identify.d["intents"], 513);

    match recv(&mut events).await {
        GatewayEvent::Ready { session_id, .. } => assert_eq!(session_id, SESSION_ID),
        other => panic!("unexpected event: {other:?}"),
    }
    (client, events)
}

#[tokio::test]
async fn test_identify_then_ready() {
    let mut gateway = FakeGateway::start(FakeGatewayOptions::default()).await;
    let (client, _events) = ready_client(&mut gateway).await;

    assert_eq!(client.state(), GatewayState::Connected);
    assert_eq!(client.session_id().as_deref(), Some(SESSION_ID));
    assert_eq!(client.sequence(), Some(1));
    assert!(client.is_connected());

    client.shutdown().await;
    assert_eq!(client.state(), GatewayState::Disconnected);
}

#[tokio::test]
async fn test_url_gets_version_query() {
    let mut gateway = FakeGateway::start(FakeGatewayOptions::default()).await;
    let (client, _events) = ready_client(&mut gateway).await;
    assert!(format!("{client:?}").contains("v=10&encoding=json"));
}

#[tokio::test]
async fn test_heartbeats_are_acknowledged() {
    let mut gateway = FakeGateway::start(FakeGatewayOptions {
        heartbeat_interval_ms: 100,
        ack_heartbeats: true,
    })
    .await;
    let (client, mut events) = ready_client(&mut gateway).await;

    // The first beat may race READY and carry null
    for _ in 0..2 {
        gateway.next_op(1).await;
    }
    let heartbeat = gateway.next_op(1).await;
    assert_eq!(heartbeat.d, json!(1));

    // Acked heartbeats never trigger a reconnect
    let quiet = tokio::time::timeout(Duration::from_millis(150), events.recv()).await;
    assert!(quiet.is_err(), "unexpected event: {quiet:?}");
    assert!(client.is_connected());
}

#[tokio::test]
async fn test_missed_ack_resumes() {
    let mut gateway = FakeGateway::start(FakeGatewayOptions {
        heartbeat_interval_ms: 100,
        ack_heartbeats: false,
    })
    .await;
    let (_client, mut events) = ready_client(&mut gateway).await;

    gateway.next_op(1).await;
    let resume = gateway.next_op(6).await;
    assert_eq!(resume.d["session_id"], SESSION_ID);
    assert_eq!(resume.d["token"], TOKEN);
    assert_eq!(resume.d["seq"], 1);

    recv_until(&mut events, |e| *e == GatewayEvent::Resumed).await;
}

#[tokio::test]
async fn test_server_reconnect_request_resumes() {
    let mut gateway = FakeGateway::start(FakeGatewayOptions::default()).await;
    let (client, mut events) = ready_client(&mut gateway).await;
    let first = gateway.next_connection().await;

    gateway.broadcast(json!({"op": 7, "d": null}));

    let second = gateway.next_connection().await;
    assert_ne!(first, second);
    let resume = gateway.next_op(6).await;
    assert_eq!(resume.d["session_id"], SESSION_ID);

    assert!(matches!(
        recv_until(&mut events, |e| matches!(e, GatewayEvent::Reconnecting { .. })).await,
        GatewayEvent::Reconnecting { attempt: 1, .. }
    ));
    recv_until(&mut events, |e| *e == GatewayEvent::Resumed).await;
    assert_eq!(client.state(), GatewayState::Connected);
    assert_eq!(client.sequence(), Some(2));
}

#[tokio::test]
async fn test_invalid_session_identifies_again() {
    let mut gateway = FakeGateway::start(FakeGatewayOptions::default()).await;
    let (client, mut events) = ready_client(&mut gateway).await;

    gateway.broadcast(json!({"op": 9, "d": false}));

    assert_eq!(
        recv_until(&mut events, |e| matches!(e, GatewayEvent::SessionInvalidated { .. })).await,
        GatewayEvent::SessionInvalidated { resumable: false }
    );
    match recv_until(&mut events, |e| matches!(e, GatewayEvent::Reconnecting { .. })).await {
        GatewayEvent::Reconnecting { delay, .. } => assert_eq!(delay, Duration::from_millis(50)),
        other => panic!("unexpected event: {other:?}"),
    }

    // Fresh identify, not a resume
    let identify = gateway.next_op(2).await;
    assert_eq!(identify.d["token"], TOKEN);
    match recv_until(&mut events, |e| matches!(e, GatewayEvent::Ready { .. })).await {
        GatewayEvent::Ready { session_id, .. } => assert_eq!(session_id, SESSION_ID),
        other => panic!("unexpected event: {other:?}"),
    }
    assert_eq!(client.state(), GatewayState::Connected);
}

#[tokio::test]
async fn test_dispatch_forwarded_with_sequence() {
    let mut gateway = FakeGateway::start(FakeGatewayOptions::default()).await;
    let (client, mut events) = ready_client(&mut gateway).await;

    gateway.broadcast(json!({"op": 0, "t": "MESSAGE_CREATE", "s": 5, "d": {"content": "hi"}}));

    assert_eq!(
        recv(&mut events).await,
        GatewayEvent::Dispatch {
            event: "MESSAGE_CREATE".into(),
            sequence: Some(5),
            data: json!({"content": "hi"}),
        }
    );
    assert_eq!(client.sequence(), Some(5));
}

#[tokio::test]
async fn test_update_presence() {
    let mut gateway = FakeGateway::start(FakeGatewayOptions::default()).await;
    let (client, _events) = ready_client(&mut gateway).await;

    client
        .update_presence(Some(Activity {
            name: "tests".into(),
            kind: 0,
        }))
        .unwrap();

    let presence = gateway.next_op(3).await;
    assert_eq!(presence.d["status"], "online");
    assert_eq!(presence.d["afk"], false);
    assert_eq!(presence.d["activities"][0]["name"], "tests");
    assert_eq!(presence.d["activities"][0]["type"], 0);
}

#[tokio::test]
async fn test_close_stops_reconnecting() {
    let mut gateway = FakeGateway::start(FakeGatewayOptions::default()).await;
    let (client, mut events) = ready_client(&mut gateway).await;

    client.close();
    assert!(matches!(
        recv_until(&mut events, |e| matches!(e, GatewayEvent::Closed { .. })).await,
        GatewayEvent::Closed { code: 1000, .. }
    ));
    tokio::time::timeout(Duration::from_secs(2), client.shutdown())
        .await
        .expect("gateway client did not stop");
    assert_eq!(client.state(), GatewayState::Disconnected);
}
