//! Decide whether a failure is transient and worth retrying.

use std::fmt;
use std::io;

use super::codes;
use super::error::{CallError, RemoteFailure};
use crate::config::RetryConfig;

/// Message fragments that mark an otherwise unclassified failure as transient.
const TRANSIENT_MARKERS: [&str; 4] = ["network", "timeout", "connection", "fetch"];

/// A failure the classifier can inspect.
///
/// Implementors expose whatever structure they carry; the `Display` output is
/// used as the message for the last-resort text heuristic.
pub trait Failure: fmt::Display {
    fn status_code(&self) -> Option<u16> {
        None
    }

    fn error_code(&self) -> Option<&str> {
        None
    }
}

/// Classify a failure: status code first, then error code, then message text.
///
/// Conservative on purpose: anything that matches none of the rules is not
/// retried.
pub fn is_retryable<F: Failure + ?Sized>(failure: &F, config: &RetryConfig) -> bool {
    if let Some(status) = failure.status_code() {
        return config.retryable_status_codes.contains(&status);
    }
    if let Some(code) = failure.error_code() {
        return config.retryable_error_codes.iter().any(|c| c == code);
    }
    let message = failure.to_string().to_lowercase();
    TRANSIENT_MARKERS.iter().any(|m| message.contains(m))
}

/// Classify a failure produced by (or passed through) the retry engine.
pub fn is_retryable_call<E: Failure>(failure: &CallError<E>, config: &RetryConfig) -> bool {
    match failure {
        CallError::Operation(e) => is_retryable(e, config),
        CallError::TimedOut(_) => config
            .retryable_error_codes
            .iter()
            .any(|c| c == codes::TIMED_OUT),
        CallError::CircuitOpen { .. } | CallError::Task(_) => false,
    }
}

impl Failure for RemoteFailure {
    fn status_code(&self) -> Option<u16> {
        self.status
    }

    fn error_code(&self) -> Option<&str> {
        self.code.as_deref()
    }
}

impl Failure for io::Error {
    fn error_code(&self) -> Option<&str> {
        match self.kind() {
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => Some(codes::CONNECTION_RESET),
            io::ErrorKind::ConnectionRefused => Some(codes::CONNECTION_REFUSED),
            io::ErrorKind::TimedOut => Some(codes::TIMED_OUT),
            io::ErrorKind::NotConnected => Some(codes::NETWORK_ERROR),
            _ => None,
        }
    }
}

impl Failure for anyhow::Error {
    fn status_code(&self) -> Option<u16> {
        self.downcast_ref::<RemoteFailure>().and_then(|f| f.status)
    }

    fn error_code(&self) -> Option<&str> {
        if let Some(f) = self.downcast_ref::<RemoteFailure>() {
            return f.code.as_deref();
        }
        self.downcast_ref::<io::Error>().and_then(|e| e.error_code())
    }
}
