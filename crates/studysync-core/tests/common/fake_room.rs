//! Helpers for driving a room over the in-memory transport.

use std::time::Duration;

use serde_json::json;
use studysync_core::config::ConnectionConfig;
use studysync_core::connection::memory::{self, MemoryServer, ServerSession};
use studysync_core::connection::{ConnectionManager, ConnectionState};
use studysync_core::protocol::Frame;
use tokio::sync::broadcast;

/// A manager connected to a fresh in-memory server.
pub async fn connect() -> (ConnectionManager, MemoryServer, ServerSession) {
    let (transport, mut server) = memory::pair();
    let manager = ConnectionManager::spawn(transport, ConnectionConfig::default());
    let session = server.accept().await.expect("client connects");
    manager
        .wait_for(ConnectionState::Connected)
        .await
        .expect("manager running");
    (manager, server, session)
}

/// Next client frame named `event`, skipping any others.
pub async fn expect_event(session: &mut ServerSession, event: &str) -> Frame {
    loop {
        let frame = session
            .recv_frame()
            .await
            .unwrap_or_else(|| panic!("link closed while waiting for {event}"));
        if frame.event == event {
            return frame;
        }
    }
}

pub async fn push_snapshot(session: &ServerSession, room_id: &str, user_ids: &[&str]) {
    let users: Vec<_> = user_ids.iter().map(|id| json!({ "id": id })).collect();
    session
        .push("room-users", json!({ "roomId": room_id, "users": users }))
        .await;
}

/// Next broadcast value, failing the test if none arrives within a minute
/// of (paused) time.
pub async fn next<T: Clone>(rx: &mut broadcast::Receiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(60), rx.recv())
        .await
        .expect("timed out waiting for update")
        .expect("channel open")
}
