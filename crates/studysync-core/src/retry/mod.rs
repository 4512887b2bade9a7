//! Retry, backoff and failure classification.
//!
//! This module encapsulates failure classification (status codes, transport
//! error codes, message heuristics), jittered exponential backoff, and the
//! retry engine that runs an async operation under a per-attempt timeout, so
//! that higher layers (breaker, aggregator, CLI probes) share one policy.

pub mod codes;
mod classify;
mod error;
mod policy;
mod run;

pub use crate::config::RetryConfig;
pub use classify::{is_retryable, is_retryable_call, Failure};
pub use error::{CallError, RemoteFailure};
pub use policy::{compute_delay, compute_delay_with, Backoff, RetryDecision, RetryOverrides};
pub use run::{RetryEngine, RetryNotice, RetryOutcome, RetryRecord, RetryState};
