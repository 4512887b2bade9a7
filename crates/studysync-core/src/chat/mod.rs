//! Room chat: acknowledged sends, the local message stream, read receipts
//! and typing indicators.
//!
//! Sends are validated before the connection is touched and resolve exactly
//! once: acknowledged, rejected by the server, or failed on the network.
//! Inbound handling is best effort; a malformed event is reported on
//! [`ChatSync::failures`] and skipped.

mod send;
mod view;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::ChatConfig;
use crate::connection::{ConnectionError, ConnectionManager, EventStream};
use crate::protocol::{names, ChatMessage, InboundEvent, OutboundEvent, SyncFailure};

pub use send::{MessageDraft, MessageSendTask, NetworkFailure, SendError, SendStatus, ValidationError};
pub use view::{ChatUpdate, ChatView, TypingSet};

const UPDATE_BUFFER: usize = 128;
const TYPING_SWEEP: Duration = Duration::from_secs(1);

fn is_chat_event(name: &str) -> bool {
    matches!(
        name,
        names::CHAT_NEW_MESSAGE | names::CHAT_MESSAGE_READ | names::CHAT_TYPING
    )
}

/// Live chat for one room.
#[derive(Debug)]
pub struct ChatSync {
    room_id: String,
    config: ChatConfig,
    manager: ConnectionManager,
    view: Arc<Mutex<ChatView>>,
    updates: broadcast::Sender<ChatUpdate>,
    failures: broadcast::Sender<SyncFailure>,
    last_typing: Mutex<Option<Instant>>,
    task: JoinHandle<()>,
}

impl ChatSync {
    /// Join `room_id` as `local_user_id` and start applying chat events.
    pub async fn start(
        manager: &ConnectionManager,
        room_id: impl Into<String>,
        local_user_id: impl Into<String>,
        config: ChatConfig,
    ) -> Result<Self, ConnectionError> {
        let room_id = room_id.into();
        let events = manager.subscribe();
        manager.join_room(&room_id).await?;

        let view = Arc::new(Mutex::new(ChatView::new(
            room_id.clone(),
            local_user_id,
            config.typing_ttl(),
        )));
        let (updates, _) = broadcast::channel(UPDATE_BUFFER);
        let (failures, _) = broadcast::channel(UPDATE_BUFFER);
        let task = tokio::spawn(consume(
            room_id.clone(),
            events,
            Arc::clone(&view),
            updates.clone(),
            failures.clone(),
        ));
        tracing::debug!(room_id = %room_id, "chat sync started");

        Ok(Self {
            room_id,
            config,
            manager: manager.clone(),
            view,
            updates,
            failures,
            last_typing: Mutex::new(None),
            task,
        })
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    fn view(&self) -> MutexGuard<'_, ChatView> {
        self.view.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Send a message and wait for the server's acknowledgement.
    ///
    /// Invalid drafts fail with [`SendError::Invalid`] without any network
    /// activity. An acknowledgement arriving after `ack_timeout` is discarded.
    pub async fn send(&self, draft: MessageDraft) -> Result<MessageSendTask, SendError> {
        draft.validate(self.config.max_message_len)?;
        let task = MessageSendTask::pending(&draft);

        let event = OutboundEvent::SendMessage {
            room_id: self.room_id.clone(),
            content: draft.content,
            file_id: draft.file_id,
        };
        let ack = match self.manager.emit_with_ack(event).await {
            Ok(rx) => rx,
            Err(ConnectionError::NotConnected(_)) => return Err(self.network_failure(NetworkFailure::NotConnected, task)),
            Err(_) => return Err(self.network_failure(NetworkFailure::Disconnected, task)),
        };

        let timeout = self.config.ack_timeout();
        match tokio::time::timeout(timeout, ack).await {
            Err(_) => Err(self.network_failure(NetworkFailure::Timeout(timeout), task)),
            Ok(Err(_)) => Err(self.network_failure(NetworkFailure::Disconnected, task)),
            Ok(Ok(reply)) if reply.success => {
                tracing::debug!(room_id = %self.room_id, message_id = ?reply.message_id, "message acknowledged");
                Ok(task.acknowledged(reply.message_id))
            }
            Ok(Ok(reply)) => {
                let reason = reply.error.unwrap_or_else(|| "message rejected".to_string());
                tracing::warn!(room_id = %self.room_id, reason = %reason, "message rejected by server");
                Err(SendError::Rejected {
                    reason,
                    task: task.failed(),
                })
            }
        }
    }

    fn network_failure(&self, failure: NetworkFailure, task: MessageSendTask) -> SendError {
        tracing::warn!(room_id = %self.room_id, error = %failure, "message send failed");
        SendError::Network {
            failure,
            task: task.failed(),
        }
    }

    pub async fn mark_read(&self, message_id: &str) -> Result<(), ConnectionError> {
        self.manager
            .emit(OutboundEvent::MarkRead {
                message_id: message_id.to_string(),
            })
            .await
    }

    /// Signal typing. Repeated `true` signals within `typing_emit_interval`
    /// are dropped; `false` is always sent. Returns whether anything was sent.
    ///
    /// Only a `true` signal that actually went out starts the throttle window.
    pub async fn set_typing(&self, is_typing: bool) -> Result<bool, ConnectionError> {
        let now = Instant::now();
        {
            let mut last = self.typing_stamp();
            if !is_typing {
                *last = None;
            } else if last.is_some_and(|at| now.duration_since(at) < self.config.typing_emit_interval()) {
                return Ok(false);
            }
        }
        self.manager
            .emit(OutboundEvent::Typing {
                room_id: self.room_id.clone(),
                is_typing,
            })
            .await?;
        if is_typing {
            *self.typing_stamp() = Some(now);
        }
        Ok(true)
    }

    fn typing_stamp(&self) -> MutexGuard<'_, Option<Instant>> {
        self.last_typing.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn updates(&self) -> broadcast::Receiver<ChatUpdate> {
        self.updates.subscribe()
    }

    /// Malformed chat events, reported instead of applied.
    pub fn failures(&self) -> broadcast::Receiver<SyncFailure> {
        self.failures.subscribe()
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.view().messages().to_vec()
    }

    pub fn is_read(&self, message_id: &str) -> bool {
        self.view().is_read(message_id)
    }

    pub fn typing_users(&self) -> Vec<String> {
        self.view().typing_users()
    }

    /// Stop applying events and release the room.
    pub async fn leave(self) -> Result<(), ConnectionError> {
        self.task.abort();
        tracing::debug!(room_id = %self.room_id, "chat sync stopped");
        self.manager.leave_room(&self.room_id).await
    }
}

impl Drop for ChatSync {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn consume(
    room_id: String,
    mut events: EventStream,
    view: Arc<Mutex<ChatView>>,
    updates: broadcast::Sender<ChatUpdate>,
    failures: broadcast::Sender<SyncFailure>,
) {
    let mut sweep = tokio::time::interval(TYPING_SWEEP);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            received = events.recv() => {
                let event = match received {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(room_id = %room_id, skipped, "chat events lagged");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                if let InboundEvent::Malformed(failure) = &event {
                    if is_chat_event(&failure.event) {
                        tracing::warn!(room_id = %room_id, event = %failure.event, reason = %failure.reason, "chat event skipped");
                        let _ = failures.send(failure.clone());
                    }
                    continue;
                }
                let update = view
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .apply(&event, Instant::now());
                if let Some(update) = update {
                    let _ = updates.send(update);
                }
            }
            _ = sweep.tick() => {
                let expired = view
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .expire_typing(Instant::now());
                for update in expired {
                    tracing::debug!(room_id = %room_id, update = ?update, "typing indicator expired");
                    let _ = updates.send(update);
                }
            }
        }
    }
}
