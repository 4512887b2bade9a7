//! `studysync simulate` – drive a room over the in-memory transport and
//! force the server to drop the link, showing the manager re-syncing.

use anyhow::{Context, Result};
use serde_json::json;
use std::time::Duration;
use studysync_core::chat::{ChatSync, MessageDraft};
use studysync_core::config::SyncConfig;
use studysync_core::connection::memory::{self, MemoryServer, ServerSession};
use studysync_core::connection::ConnectionManager;
use studysync_core::presence::{PresenceSync, PresenceUpdate};
use studysync_core::protocol::{names, AckPayload};
use tokio::sync::broadcast;

const ROOM: &str = "study-group-1";
const NAMES: [&str; 3] = ["ada", "bo", "cy"];
const SETTLE: Duration = Duration::from_secs(30);

/// Roster served in `round`; consecutive rounds differ in size.
fn roster(round: u32) -> &'static [&'static str] {
    &NAMES[..(round as usize % NAMES.len()) + 1]
}

pub async fn run_simulate(cfg: &SyncConfig, drops: u32) -> Result<()> {
    let (transport, mut server) = memory::pair();
    let manager = ConnectionManager::spawn(transport, cfg.connection.clone());

    let mut status = manager.watch_status();
    let printer = tokio::spawn(async move {
        loop {
            {
                let s = status.borrow_and_update();
                match &s.last_error {
                    Some(err) => println!("state: {} (attempt {}, last error: {})", s.state, s.reconnect_attempt, err),
                    None => println!("state: {} (attempt {})", s.state, s.reconnect_attempt),
                }
            }
            if status.changed().await.is_err() {
                break;
            }
        }
    });

    let mut serving = tokio::spawn(serve(accept(&mut server).await?, roster(0)));
    let presence = PresenceSync::start(&manager, ROOM).await?;
    let mut updates = presence.updates();
    let chat = ChatSync::start(&manager, ROOM, "you", cfg.chat.clone()).await?;
    settle(&presence, &mut updates, roster(0).len()).await?;
    print_presence(&presence);

    for round in 1..=drops {
        println!("-- server drops the link (round {round})");
        serving.abort();
        serving = tokio::spawn(serve(accept(&mut server).await?, roster(round)));
        settle(&presence, &mut updates, roster(round).len()).await?;
        print_presence(&presence);
    }

    let task = chat.send(MessageDraft::text("hello from simulate")).await?;
    println!(
        "message acknowledged: {}",
        task.message_id.as_deref().unwrap_or("-")
    );

    chat.leave().await?;
    presence.leave().await?;
    manager.close().await?;
    serving.abort();
    // Let the printer show the final state.
    tokio::time::sleep(Duration::from_millis(50)).await;
    printer.abort();
    Ok(())
}

async fn accept(server: &mut MemoryServer) -> Result<ServerSession> {
    tokio::time::timeout(SETTLE, server.accept())
        .await
        .context("client did not connect")?
        .context("transport closed")
}

async fn settle(
    presence: &PresenceSync,
    updates: &mut broadcast::Receiver<PresenceUpdate>,
    expected: usize,
) -> Result<()> {
    tokio::time::timeout(SETTLE, async {
        while presence.len() != expected {
            updates.recv().await?;
        }
        Ok::<_, broadcast::error::RecvError>(())
    })
    .await
    .context("presence did not settle")??;
    Ok(())
}

fn print_presence(presence: &PresenceSync) {
    let users: Vec<String> = presence.users().into_iter().map(|u| u.id).collect();
    println!("presence in {}: [{}]", presence.room_id(), users.join(", "));
}

/// Fake server side of one link: answers joins with a snapshot and acks sends.
async fn serve(mut session: ServerSession, roster: &'static [&'static str]) {
    let mut next_id = 1u64;
    while let Some(frame) = session.recv_frame().await {
        match frame.event.as_str() {
            names::JOIN_ROOM => {
                let users: Vec<_> = roster.iter().map(|id| json!({ "id": id, "name": id })).collect();
                session
                    .push(names::ROOM_USERS, json!({ "roomId": frame.data["roomId"], "users": users }))
                    .await;
            }
            names::CHAT_SEND => {
                let message_id = format!("m{next_id}");
                next_id += 1;
                if let Some(ack_id) = frame.ack_id {
                    session
                        .ack(
                            ack_id,
                            AckPayload {
                                success: true,
                                message_id: Some(message_id.clone()),
                                error: None,
                            },
                        )
                        .await;
                }
                let mut message = frame.data.clone();
                message["id"] = json!(message_id);
                session.push(names::CHAT_NEW_MESSAGE, message).await;
            }
            _ => {}
        }
    }
}
