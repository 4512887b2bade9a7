//! Failure types for remote calls.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use super::codes;

/// Failure returned by the retry engine, the circuit breaker and the aggregator.
///
/// The operation's own error is carried unchanged in `Operation`; the other
/// variants are produced by the resilience layer itself.
#[derive(Debug, Error)]
pub enum CallError<E> {
    /// The remote call failed.
    #[error("{0}")]
    Operation(E),
    /// An attempt did not finish within the per-attempt timeout.
    #[error("operation timed out after {}ms", .0.as_millis())]
    TimedOut(Duration),
    /// The breaker rejected the call without touching the network.
    #[error("service temporarily unavailable (circuit open, retry in {}ms)", .retry_after.as_millis())]
    CircuitOpen { retry_after: Duration },
    /// The task running the operation panicked or was cancelled.
    #[error("operation task failed: {0}")]
    Task(String),
}

impl<E> CallError<E> {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, CallError::CircuitOpen { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, CallError::TimedOut(_))
    }

    /// The remote failure, if this is one.
    pub fn operation(&self) -> Option<&E> {
        match self {
            CallError::Operation(e) => Some(e),
            _ => None,
        }
    }

    pub fn into_operation(self) -> Option<E> {
        match self {
            CallError::Operation(e) => Some(e),
            _ => None,
        }
    }
}

/// A remote failure described by an optional HTTP status, an optional
/// symbolic transport code, and a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFailure {
    pub status: Option<u16>,
    pub code: Option<String>,
    pub message: String,
}

impl RemoteFailure {
    /// Failure carrying an HTTP status.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            code: None,
            message: message.into(),
        }
    }

    /// Failure carrying a transport error code such as `ECONNRESET`.
    pub fn code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: None,
            code: Some(code.into()),
            message: message.into(),
        }
    }

    /// Failure described only by its message.
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            status: None,
            code: None,
            message: message.into(),
        }
    }
}

impl fmt::Display for RemoteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.status, &self.code) {
            (Some(status), _) => write!(f, "{} (HTTP {})", self.message, status),
            (None, Some(code)) => write!(f, "{} ({})", self.message, code),
            (None, None) => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for RemoteFailure {}

impl From<curl::Error> for RemoteFailure {
    fn from(e: curl::Error) -> Self {
        let code = if e.is_operation_timedout() {
            Some(codes::TIMED_OUT)
        } else if e.is_couldnt_resolve_host() || e.is_couldnt_resolve_proxy() {
            Some(codes::DNS_NOT_FOUND)
        } else if e.is_couldnt_connect() {
            Some(codes::CONNECTION_REFUSED)
        } else if e.is_read_error() || e.is_recv_error() || e.is_send_error() {
            Some(codes::CONNECTION_RESET)
        } else if e.is_got_nothing() {
            Some(codes::NETWORK_ERROR)
        } else {
            None
        };
        Self {
            status: None,
            code: code.map(str::to_string),
            message: e.to_string(),
        }
    }
}
