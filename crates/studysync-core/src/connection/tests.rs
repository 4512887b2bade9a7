use std::future::Future;
use std::time::Duration;

use serde_json::json;
use tokio::time::Instant;

use super::memory::{self, MemoryServer, ServerSession};
use super::*;
use crate::config::ConnectionConfig;
use crate::protocol::{AckPayload, InboundEvent, OutboundEvent};

async fn connected(config: ConnectionConfig) -> (ConnectionManager, MemoryServer, ServerSession) {
    let (transport, mut server) = memory::pair();
    let manager = ConnectionManager::spawn(transport, config);
    let session = server.accept().await.expect("client connects");
    manager.wait_for(ConnectionState::Connected).await.unwrap();
    (manager, server, session)
}

#[tokio::test(start_paused = true)]
async fn rejoins_registered_rooms_after_reconnect() {
    let (manager, mut server, mut session) = connected(ConnectionConfig::default()).await;
    manager.join_room("g1").await.unwrap();
    let frame = session.recv_frame().await.unwrap();
    assert_eq!(frame.event, "join-room");
    assert_eq!(frame.data["roomId"], "g1");

    drop(session);
    let mut session = server.accept().await.expect("client reconnects");
    let frame = session.recv_frame().await.unwrap();
    assert_eq!(frame.event, "join-room");
    assert_eq!(frame.data["roomId"], "g1");

    let status = manager.wait_for(ConnectionState::Connected).await.unwrap();
    assert_eq!(status.reconnect_attempt, 0);
    assert!(status.last_error.is_none());
    assert_eq!(server.connect_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn emit_before_connect_is_rejected() {
    let (transport, _server) = memory::pair();
    let manager = ConnectionManager::spawn(transport, ConnectionConfig::default());
    let err = manager
        .emit(OutboundEvent::MarkRead {
            message_id: "m1".into(),
        })
        .await
        .unwrap_err();
    assert_eq!(err, ConnectionError::NotConnected(ConnectionState::Connecting));
}

#[tokio::test(start_paused = true)]
async fn exhausted_reconnects_fail_until_manual_retry() {
    let (transport, mut server) = memory::pair();
    server.set_accepting(false);
    let config = ConnectionConfig {
        max_reconnect_attempts: 2,
        ..ConnectionConfig::default()
    };
    let manager = ConnectionManager::spawn(transport, config);

    let status = manager.wait_for(ConnectionState::Failed).await.unwrap();
    assert_eq!(status.reconnect_attempt, 2);
    assert!(status.last_error.unwrap().contains("not accepting"));

    // Stays failed: no automatic reconnect.
    tokio::time::advance(Duration::from_secs(60)).await;
    assert_eq!(manager.state(), ConnectionState::Failed);

    server.set_accepting(true);
    manager.retry().await.unwrap();
    manager.wait_for(ConnectionState::Connected).await.unwrap();
    assert!(server.accept().await.is_some());

    let err = manager.retry().await.unwrap_err();
    assert!(matches!(
        err,
        ConnectionError::InvalidTransition {
            from: ConnectionState::Connected,
            transition: Transition::Retry
        }
    ));
}

#[tokio::test(start_paused = true)]
async fn transient_connect_failures_recover() {
    let (transport, mut server) = memory::pair();
    server.fail_next(2);
    let manager = ConnectionManager::spawn(transport, ConnectionConfig::default());
    assert!(server.accept().await.is_some());
    manager.wait_for(ConnectionState::Connected).await.unwrap();
    assert_eq!(server.connect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn network_loss_goes_offline_and_recovers() {
    let (manager, mut server, mut session) = connected(ConnectionConfig::default()).await;

    manager.set_network_available(false).await.unwrap();
    manager.wait_for(ConnectionState::Offline).await.unwrap();
    assert!(session.recv_frame().await.is_none(), "link dropped");

    tokio::time::advance(Duration::from_secs(30)).await;
    assert_eq!(manager.state(), ConnectionState::Offline);
    assert_eq!(server.connect_count(), 1);

    manager.set_network_available(true).await.unwrap();
    assert!(server.accept().await.is_some());
    manager.wait_for(ConnectionState::Connected).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn close_stops_reconnecting_and_retry_rejoins() {
    let (manager, mut server, mut session) = connected(ConnectionConfig::default()).await;
    manager.join_room("g1").await.unwrap();
    session.recv_frame().await.unwrap();

    manager.close().await.unwrap();
    manager.wait_for(ConnectionState::Disconnected).await.unwrap();
    assert!(session.recv_frame().await.is_none());
    tokio::time::advance(Duration::from_secs(60)).await;
    assert_eq!(server.connect_count(), 1);

    manager.retry().await.unwrap();
    let mut session = server.accept().await.unwrap();
    let frame = session.recv_frame().await.unwrap();
    assert_eq!(frame.event, "join-room");
}

#[tokio::test(start_paused = true)]
async fn acks_are_routed_to_their_request() {
    let (manager, _server, mut session) = connected(ConnectionConfig::default()).await;
    let first = manager
        .emit_with_ack(OutboundEvent::MarkRead { message_id: "a".into() })
        .await
        .unwrap();
    let second = manager
        .emit_with_ack(OutboundEvent::MarkRead { message_id: "b".into() })
        .await
        .unwrap();
    let f1 = session.recv_frame().await.unwrap();
    let f2 = session.recv_frame().await.unwrap();
    assert_ne!(f1.ack_id, f2.ack_id);

    let reply = |id: &str| AckPayload {
        success: true,
        message_id: Some(id.to_string()),
        error: None,
    };
    session.ack(f2.ack_id.unwrap(), reply("b")).await;
    session.ack(f1.ack_id.unwrap(), reply("a")).await;
    assert_eq!(first.await.unwrap().message_id.as_deref(), Some("a"));
    assert_eq!(second.await.unwrap().message_id.as_deref(), Some("b"));
}

#[tokio::test(start_paused = true)]
async fn pending_ack_fails_when_link_drops() {
    let (manager, _server, mut session) = connected(ConnectionConfig::default()).await;
    let rx = manager
        .emit_with_ack(OutboundEvent::MarkRead { message_id: "a".into() })
        .await
        .unwrap();
    session.recv_frame().await.unwrap();
    drop(session);
    assert!(rx.await.is_err());
}

#[tokio::test(start_paused = true)]
async fn room_leave_is_sent_when_last_registration_is_released() {
    let (manager, _server, mut session) = connected(ConnectionConfig::default()).await;
    manager.join_room("g1").await.unwrap();
    manager.join_room("g1").await.unwrap();
    assert_eq!(session.recv_frame().await.unwrap().event, "join-room");
    assert_eq!(session.recv_frame().await.unwrap().event, "join-room");

    manager.leave_room("g1").await.unwrap();
    manager
        .emit(OutboundEvent::MarkRead {
            message_id: "marker".into(),
        })
        .await
        .unwrap();
    manager.leave_room("g1").await.unwrap();

    assert_eq!(session.recv_frame().await.unwrap().event, "chat:mark-read");
    let leave = session.recv_frame().await.unwrap();
    assert_eq!(leave.event, "leave-room");
    assert_eq!(leave.data["roomId"], "g1");
}

#[tokio::test(start_paused = true)]
async fn inbound_events_are_decoded_and_broadcast() {
    let (manager, _server, session) = connected(ConnectionConfig::default()).await;
    let mut events = manager.subscribe();

    session.push("user-offline", json!({ "userId": "u1" })).await;
    session.push("user-offline", json!({})).await;
    session.push_raw("{ nope").await;

    assert_eq!(
        events.recv().await.unwrap(),
        InboundEvent::UserOffline { user_id: "u1".into() }
    );
    assert!(matches!(events.recv().await.unwrap(), InboundEvent::Malformed(f) if f.event == "user-offline"));
    assert!(matches!(events.recv().await.unwrap(), InboundEvent::Malformed(f) if f.event == "frame"));
}

#[tokio::test(start_paused = true)]
async fn server_errors_are_recorded_as_last_error() {
    let (manager, _server, session) = connected(ConnectionConfig::default()).await;
    let mut events = manager.subscribe();
    let mut status = manager.watch_status();

    session.push("error", json!({ "message": "not a member" })).await;
    assert_eq!(
        events.recv().await.unwrap(),
        InboundEvent::ServerError {
            message: "not a member".into()
        }
    );
    let status = status
        .wait_for(|s| s.last_error.is_some())
        .await
        .unwrap()
        .clone();
    assert_eq!(status.last_error.as_deref(), Some("not a member"));
    assert_eq!(status.state, ConnectionState::Connected);
}

/// Connects that never complete on their own.
struct StalledTransport;

impl Transport for StalledTransport {
    fn connect(&self) -> impl Future<Output = Result<Link, TransportError>> + Send {
        std::future::pending()
    }
}

fn stalled_config() -> ConnectionConfig {
    ConnectionConfig {
        connect_timeout_ms: 60_000,
        ..ConnectionConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn close_does_not_wait_for_a_stalled_connect() {
    let manager = ConnectionManager::spawn(StalledTransport, stalled_config());
    let started = Instant::now();
    manager.close().await.unwrap();
    manager.wait_for(ConnectionState::Disconnected).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));

    // The abandoned attempt never resolves into a state change.
    tokio::time::advance(Duration::from_secs(120)).await;
    assert_eq!(manager.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn network_loss_does_not_wait_for_a_stalled_connect() {
    let manager = ConnectionManager::spawn(StalledTransport, stalled_config());
    let started = Instant::now();
    manager.set_network_available(false).await.unwrap();
    manager.wait_for(ConnectionState::Offline).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));

    tokio::time::advance(Duration::from_secs(120)).await;
    assert_eq!(manager.state(), ConnectionState::Offline);
}
