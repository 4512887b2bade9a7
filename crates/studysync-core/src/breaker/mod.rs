//! Circuit breaker around retried remote calls.
//!
//! One breaker guards one remote dependency. It is constructed once (usually
//! through [`BreakerRegistry`]) and shared by `Arc` between every caller of
//! that dependency; there is no process-wide default instance.
//!
//! While half-open the breaker admits exactly one probe at a time; other
//! callers are rejected as if the circuit were still open.

mod key;
mod registry;
mod state;

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::time::Instant;

use crate::config::BreakerConfig;
use crate::retry::{CallError, Failure, RetryEngine};
use state::{Admission, BreakerCore};

pub use key::DependencyKey;
pub use registry::BreakerRegistry;
pub use state::{BreakerSnapshot, CircuitState};

/// Three-state circuit breaker (closed, open, half-open).
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    core: Mutex<BreakerCore>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            core: Mutex::new(BreakerCore::new(config)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn core(&self) -> MutexGuard<'_, BreakerCore> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> CircuitState {
        self.core().state()
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        self.core().snapshot(Instant::now())
    }

    /// Force the breaker back to closed with all counters cleared.
    pub fn reset(&self) {
        self.core().reset();
        tracing::info!(breaker = %self.name, "circuit reset");
    }

    /// Run `operation` through `engine` if the circuit allows it.
    ///
    /// The whole retried call counts as a single outcome. When the circuit is
    /// open the operation is never invoked and `CallError::CircuitOpen` is
    /// returned immediately.
    pub async fn call<T, E, F, Fut>(&self, engine: &RetryEngine, operation: F) -> Result<T, CallError<E>>
    where
        E: Failure,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let probe = match self.try_acquire() {
            Ok(probe) => probe,
            Err(retry_after) => {
                tracing::debug!(
                    breaker = %self.name,
                    operation = %engine.name(),
                    retry_after_ms = retry_after.as_millis() as u64,
                    "call rejected: circuit open"
                );
                return Err(CallError::CircuitOpen { retry_after });
            }
        };

        let mut guard = ProbeGuard {
            breaker: self,
            armed: probe,
        };
        let result = engine.execute(operation).await;
        guard.armed = false;

        match &result {
            Ok(_) => self.record_success_inner(probe),
            Err(e) => self.record_failure_inner(probe, e),
        }
        result
    }

    /// Ask for permission to call outside [`call`](Self::call).
    ///
    /// `Ok(true)` means the caller holds the half-open probe slot and must
    /// report the outcome with [`record_success`](Self::record_success) or
    /// [`record_failure`](Self::record_failure).
    pub fn try_acquire(&self) -> Result<bool, std::time::Duration> {
        let mut core = self.core();
        let before = core.state();
        let admission = core.admit(Instant::now());
        if before != core.state() {
            tracing::info!(breaker = %self.name, "circuit half-open: admitting probe");
        }
        match admission {
            Admission::Allowed { probe } => Ok(probe),
            Admission::Rejected { retry_after } => Err(retry_after),
        }
    }

    /// Report a success for a call admitted by [`try_acquire`](Self::try_acquire).
    pub fn record_success(&self, probe: bool) {
        self.record_success_inner(probe);
    }

    /// Report a failure for a call admitted by [`try_acquire`](Self::try_acquire).
    pub fn record_failure(&self, probe: bool) {
        let changed = self.core().on_failure(probe, Instant::now());
        self.log_change(changed, None);
    }

    fn record_success_inner(&self, probe: bool) {
        let changed = self.core().on_success(probe);
        self.log_change(changed, None);
    }

    fn record_failure_inner<E: Failure>(&self, probe: bool, error: &CallError<E>) {
        let changed = self.core().on_failure(probe, Instant::now());
        self.log_change(changed, Some(error.to_string()));
    }

    fn log_change(&self, changed: Option<CircuitState>, error: Option<String>) {
        match changed {
            Some(CircuitState::Open) => tracing::warn!(
                breaker = %self.name,
                error = error.as_deref().unwrap_or(""),
                "circuit opened"
            ),
            Some(CircuitState::Closed) => {
                tracing::info!(breaker = %self.name, "circuit closed: dependency recovered")
            }
            Some(CircuitState::HalfOpen) | None => {}
        }
    }
}

/// Frees the half-open probe slot if the probe future is dropped mid-flight.
struct ProbeGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.core().release_probe();
        }
    }
}

#[cfg(test)]
mod tests;
