use thiserror::Error;

use super::{ConnectionState, Transition};

/// Errors returned by [`ConnectionManager`](super::ConnectionManager) operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    /// The link is not up; nothing was sent.
    #[error("not connected (state: {0})")]
    NotConnected(ConnectionState),
    /// The manager task has shut down.
    #[error("connection manager has shut down")]
    Closed,
    #[error("cannot {transition} while {from}")]
    InvalidTransition {
        from: ConnectionState,
        transition: Transition,
    },
}

/// A failed attempt to open a link.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("connect failed: {0}")]
pub struct TransportError(pub String);
