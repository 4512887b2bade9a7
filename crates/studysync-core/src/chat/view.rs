use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use tokio::time::Instant;

use crate::protocol::{ChatMessage, InboundEvent};

/// Users currently typing, each with the time of their last typing signal.
#[derive(Debug, Clone)]
pub struct TypingSet {
    ttl: Duration,
    entries: BTreeMap<String, Instant>,
}

impl TypingSet {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: BTreeMap::new(),
        }
    }

    /// Returns whether the set of typing users changed.
    pub fn set(&mut self, user_id: &str, is_typing: bool, now: Instant) -> bool {
        if is_typing {
            self.entries.insert(user_id.to_string(), now).is_none()
        } else {
            self.entries.remove(user_id).is_some()
        }
    }

    /// Remove entries silent for longer than the ttl; returns their ids.
    pub fn expire(&mut self, now: Instant) -> Vec<String> {
        let ttl = self.ttl;
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, seen)| now.saturating_duration_since(**seen) >= ttl)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            self.entries.remove(id);
        }
        expired
    }

    pub fn users(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.entries.contains_key(user_id)
    }
}

/// Change to a [`ChatView`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatUpdate {
    MessageAdded(ChatMessage),
    MessageRead { message_id: String },
    TypingChanged { user_id: String, is_typing: bool },
}

/// Local view of one room's chat.
#[derive(Debug, Clone)]
pub struct ChatView {
    room_id: String,
    local_user_id: String,
    messages: Vec<ChatMessage>,
    seen: HashSet<String>,
    read: HashSet<String>,
    typing: TypingSet,
}

impl ChatView {
    pub fn new(room_id: impl Into<String>, local_user_id: impl Into<String>, typing_ttl: Duration) -> Self {
        Self {
            room_id: room_id.into(),
            local_user_id: local_user_id.into(),
            messages: Vec::new(),
            seen: HashSet::new(),
            read: HashSet::new(),
            typing: TypingSet::new(typing_ttl),
        }
    }

    pub fn apply(&mut self, event: &InboundEvent, now: Instant) -> Option<ChatUpdate> {
        match event {
            InboundEvent::NewMessage(message) if message.room_id == self.room_id => {
                if !self.seen.insert(message.id.clone()) {
                    return None;
                }
                self.messages.push(message.clone());
                Some(ChatUpdate::MessageAdded(message.clone()))
            }
            // Receipts may arrive before the message they refer to.
            InboundEvent::MessageRead { message_id } => {
                self.read
                    .insert(message_id.clone())
                    .then(|| ChatUpdate::MessageRead {
                        message_id: message_id.clone(),
                    })
            }
            InboundEvent::Typing { user_id, is_typing } if *user_id != self.local_user_id => self
                .typing
                .set(user_id, *is_typing, now)
                .then(|| ChatUpdate::TypingChanged {
                    user_id: user_id.clone(),
                    is_typing: *is_typing,
                }),
            _ => None,
        }
    }

    pub fn expire_typing(&mut self, now: Instant) -> Vec<ChatUpdate> {
        self.typing
            .expire(now)
            .into_iter()
            .map(|user_id| ChatUpdate::TypingChanged {
                user_id,
                is_typing: false,
            })
            .collect()
    }

    /// Messages in arrival order.
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn is_read(&self, message_id: &str) -> bool {
        self.read.contains(message_id)
    }

    pub fn typing_users(&self) -> Vec<String> {
        self.typing.users()
    }
}
