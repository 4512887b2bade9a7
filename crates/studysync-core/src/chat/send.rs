use std::time::{Duration, SystemTime};

use thiserror::Error;

/// Outgoing message before validation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MessageDraft {
    pub content: String,
    pub file_id: Option<String>,
}

impl MessageDraft {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            file_id: None,
        }
    }

    pub fn with_file(mut self, file_id: impl Into<String>) -> Self {
        self.file_id = Some(file_id.into());
        self
    }

    /// Content must be non-blank unless a file is attached, and at most
    /// `max_len` characters long.
    pub fn validate(&self, max_len: usize) -> Result<(), ValidationError> {
        let has_file = self.file_id.as_deref().is_some_and(|f| !f.trim().is_empty());
        if self.content.trim().is_empty() && !has_file {
            return Err(ValidationError::Empty);
        }
        let len = self.content.chars().count();
        if len > max_len {
            return Err(ValidationError::TooLong { len, max: max_len });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("message is empty")]
    Empty,
    #[error("message is {len} characters; the limit is {max}")]
    TooLong { len: usize, max: usize },
}

/// Why a send never got a server verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum NetworkFailure {
    #[error("not connected")]
    NotConnected,
    #[error("no acknowledgement within {}ms", .0.as_millis())]
    Timeout(Duration),
    #[error("connection lost before acknowledgement")]
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    Pending,
    Acknowledged,
    Failed,
}

/// One send attempt. Lives only for the duration of the call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSendTask {
    pub content: String,
    pub file_id: Option<String>,
    pub status: SendStatus,
    pub created_at: SystemTime,
    /// Server-assigned id, set once acknowledged.
    pub message_id: Option<String>,
}

impl MessageSendTask {
    pub(super) fn pending(draft: &MessageDraft) -> Self {
        Self {
            content: draft.content.clone(),
            file_id: draft.file_id.clone(),
            status: SendStatus::Pending,
            created_at: SystemTime::now(),
            message_id: None,
        }
    }

    pub(super) fn acknowledged(mut self, message_id: Option<String>) -> Self {
        self.status = SendStatus::Acknowledged;
        self.message_id = message_id;
        self
    }

    pub(super) fn failed(mut self) -> Self {
        self.status = SendStatus::Failed;
        self
    }
}

/// Failure of [`ChatSync::send`](super::ChatSync::send).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    /// Rejected locally; nothing was sent.
    #[error("invalid message: {0}")]
    Invalid(#[from] ValidationError),
    /// Transport-level failure; safe to offer a retry.
    #[error("message not delivered: {failure}")]
    Network {
        failure: NetworkFailure,
        task: MessageSendTask,
    },
    /// The server refused the message; retrying will not help.
    #[error("message rejected by server: {reason}")]
    Rejected { reason: String, task: MessageSendTask },
}

impl SendError {
    pub fn is_network(&self) -> bool {
        matches!(self, SendError::Network { .. })
    }

    pub fn task(&self) -> Option<&MessageSendTask> {
        match self {
            SendError::Invalid(_) => None,
            SendError::Network { task, .. } | SendError::Rejected { task, .. } => Some(task),
        }
    }
}
