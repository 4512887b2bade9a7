//! Room-scoped wire events exchanged over the persistent connection.
//!
//! Every frame is a JSON object `{"event": <name>, "data": <payload>}` with an
//! optional `ackId`. Inbound frames are decoded once, at the connection
//! boundary, into [`InboundEvent`]; a payload that does not match its schema
//! becomes [`InboundEvent::Malformed`] instead of reaching a consumer
//! half-parsed.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

/// Event names on the wire.
pub mod names {
    pub const JOIN_ROOM: &str = "join-room";
    pub const LEAVE_ROOM: &str = "leave-room";
    pub const ROOM_USERS: &str = "room-users";
    pub const USER_ONLINE: &str = "user-online";
    pub const USER_OFFLINE: &str = "user-offline";
    pub const CHAT_SEND: &str = "chat:send";
    pub const CHAT_NEW_MESSAGE: &str = "chat:new-message";
    pub const CHAT_MESSAGE_READ: &str = "chat:message-read";
    pub const CHAT_MARK_READ: &str = "chat:mark-read";
    pub const CHAT_TYPING: &str = "chat:typing";
    pub const ERROR: &str = "error";
    pub const ACK: &str = "ack";
}

/// Raw frame envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack_id: Option<u64>,
}

impl Frame {
    pub fn new(event: &str, data: Value) -> Self {
        Self {
            event: event.to_string(),
            data,
            ack_id: None,
        }
    }

    pub fn with_ack(mut self, ack_id: u64) -> Self {
        self.ack_id = Some(ack_id);
        self
    }

    pub fn encode(&self) -> String {
        // A `Frame` holds only strings, integers and JSON values.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// A payload that could not be decoded into its event's schema.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed {event} event: {reason}")]
pub struct SyncFailure {
    pub event: String,
    pub reason: String,
}

impl SyncFailure {
    pub fn new(event: impl Into<String>, reason: impl ToString) -> Self {
        Self {
            event: event.into(),
            reason: reason.to_string(),
        }
    }
}

/// Events sent by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundEvent {
    JoinRoom {
        room_id: String,
    },
    LeaveRoom {
        room_id: String,
    },
    SendMessage {
        room_id: String,
        content: String,
        file_id: Option<String>,
    },
    MarkRead {
        message_id: String,
    },
    Typing {
        room_id: String,
        is_typing: bool,
    },
}

impl OutboundEvent {
    pub fn name(&self) -> &'static str {
        match self {
            OutboundEvent::JoinRoom { .. } => names::JOIN_ROOM,
            OutboundEvent::LeaveRoom { .. } => names::LEAVE_ROOM,
            OutboundEvent::SendMessage { .. } => names::CHAT_SEND,
            OutboundEvent::MarkRead { .. } => names::CHAT_MARK_READ,
            OutboundEvent::Typing { .. } => names::CHAT_TYPING,
        }
    }

    pub fn to_frame(&self) -> Frame {
        let data = match self {
            OutboundEvent::JoinRoom { room_id } | OutboundEvent::LeaveRoom { room_id } => {
                json!({ "roomId": room_id })
            }
            OutboundEvent::SendMessage {
                room_id,
                content,
                file_id,
            } => match file_id {
                Some(file_id) => json!({ "roomId": room_id, "content": content, "fileId": file_id }),
                None => json!({ "roomId": room_id, "content": content }),
            },
            OutboundEvent::MarkRead { message_id } => json!({ "messageId": message_id }),
            OutboundEvent::Typing { room_id, is_typing } => {
                json!({ "roomId": room_id, "isTyping": is_typing })
            }
        };
        Frame::new(self.name(), data)
    }
}

/// A user as listed in a presence snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceUser {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
}

/// Full presence list for a room, sent in response to a join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceSnapshot {
    pub room_id: String,
    pub users: Vec<PresenceUser>,
}

/// A chat message as pushed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub room_id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub file_id: Option<String>,
    #[serde(default)]
    pub sender_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// Server reply to an event sent with an ack id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckPayload {
    pub success: bool,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Decoded inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    PresenceSnapshot(PresenceSnapshot),
    UserOnline { user: PresenceUser },
    UserOffline { user_id: String },
    NewMessage(ChatMessage),
    MessageRead { message_id: String },
    Typing { user_id: String, is_typing: bool },
    ServerError { message: String },
    Ack { ack_id: u64, payload: AckPayload },
    Malformed(SyncFailure),
    Unknown { event: String },
}

impl InboundEvent {
    /// Wire name of the event this was decoded from.
    pub fn event_name(&self) -> &str {
        match self {
            InboundEvent::PresenceSnapshot(_) => names::ROOM_USERS,
            InboundEvent::UserOnline { .. } => names::USER_ONLINE,
            InboundEvent::UserOffline { .. } => names::USER_OFFLINE,
            InboundEvent::NewMessage(_) => names::CHAT_NEW_MESSAGE,
            InboundEvent::MessageRead { .. } => names::CHAT_MESSAGE_READ,
            InboundEvent::Typing { .. } => names::CHAT_TYPING,
            InboundEvent::ServerError { .. } => names::ERROR,
            InboundEvent::Ack { .. } => names::ACK,
            InboundEvent::Malformed(f) => f.event.as_str(),
            InboundEvent::Unknown { event } => event.as_str(),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserOnlinePayload {
    user_id: String,
    #[serde(default)]
    user: Option<UserMeta>,
}

#[derive(Deserialize)]
struct UserMeta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    image: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserIdPayload {
    user_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageIdPayload {
    message_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TypingPayload {
    user_id: String,
    is_typing: bool,
}

#[derive(Deserialize)]
struct ErrorPayload {
    #[serde(default)]
    message: Option<String>,
}

fn payload<T: DeserializeOwned>(frame: &Frame) -> Result<T, SyncFailure> {
    T::deserialize(&frame.data).map_err(|e| SyncFailure::new(frame.event.as_str(), e))
}

fn non_empty(frame: &Frame, field: &str, value: String) -> Result<String, SyncFailure> {
    if value.trim().is_empty() {
        return Err(SyncFailure::new(frame.event.as_str(), format!("empty {field}")));
    }
    Ok(value)
}

/// Decode one raw inbound frame. Never fails: bad input becomes `Malformed`.
pub fn decode(raw: &str) -> InboundEvent {
    let frame: Frame = match serde_json::from_str(raw) {
        Ok(frame) => frame,
        Err(e) => return InboundEvent::Malformed(SyncFailure::new("frame", e)),
    };
    decode_frame(&frame).unwrap_or_else(InboundEvent::Malformed)
}

fn decode_frame(frame: &Frame) -> Result<InboundEvent, SyncFailure> {
    let event = match frame.event.as_str() {
        names::ROOM_USERS => {
            let snapshot: PresenceSnapshot = payload(frame)?;
            for user in &snapshot.users {
                non_empty(frame, "user id", user.id.clone())?;
            }
            InboundEvent::PresenceSnapshot(snapshot)
        }
        names::USER_ONLINE => {
            let p: UserOnlinePayload = payload(frame)?;
            let id = non_empty(frame, "userId", p.user_id)?;
            let (name, image) = p.user.map(|u| (u.name, u.image)).unwrap_or((None, None));
            InboundEvent::UserOnline {
                user: PresenceUser { id, name, image },
            }
        }
        names::USER_OFFLINE => {
            let p: UserIdPayload = payload(frame)?;
            InboundEvent::UserOffline {
                user_id: non_empty(frame, "userId", p.user_id)?,
            }
        }
        names::CHAT_NEW_MESSAGE => {
            let message: ChatMessage = payload(frame)?;
            non_empty(frame, "message id", message.id.clone())?;
            InboundEvent::NewMessage(message)
        }
        names::CHAT_MESSAGE_READ => {
            let p: MessageIdPayload = payload(frame)?;
            InboundEvent::MessageRead {
                message_id: non_empty(frame, "messageId", p.message_id)?,
            }
        }
        names::CHAT_TYPING => {
            let p: TypingPayload = payload(frame)?;
            InboundEvent::Typing {
                user_id: non_empty(frame, "userId", p.user_id)?,
                is_typing: p.is_typing,
            }
        }
        names::ERROR => {
            let p: ErrorPayload = payload(frame)?;
            InboundEvent::ServerError {
                message: p.message.unwrap_or_else(|| "unknown server error".to_string()),
            }
        }
        names::ACK => {
            let ack_id = frame
                .ack_id
                .ok_or_else(|| SyncFailure::new(names::ACK, "missing ackId"))?;
            InboundEvent::Ack {
                ack_id,
                payload: payload(frame)?,
            }
        }
        other => InboundEvent::Unknown {
            event: other.to_string(),
        },
    };
    Ok(event)
}
