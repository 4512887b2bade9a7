//! Retry loop: run an async operation until success or the policy says stop.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::time::Instant;

use super::classify::{is_retryable_call, Failure};
use super::error::CallError;
use super::policy::{RetryDecision, RetryOverrides};
use crate::config::RetryConfig;

/// One failed attempt, as recorded in [`RetryState`].
#[derive(Debug, Clone)]
pub struct RetryRecord {
    pub message: String,
    pub timestamp: SystemTime,
    /// Delay slept before the next attempt; zero for the final failure.
    pub delay: Duration,
    /// Whether another attempt followed this one. The delay alone cannot
    /// tell: backoff may round down to zero.
    pub retried: bool,
}

/// Statistics for a single `execute` call. Never shared between calls.
#[derive(Debug, Clone)]
pub struct RetryState {
    pub attempts: u32,
    pub total_delay: Duration,
    pub errors: Vec<RetryRecord>,
    pub started_at: Instant,
}

impl RetryState {
    fn new() -> Self {
        Self {
            attempts: 0,
            total_delay: Duration::ZERO,
            errors: Vec::new(),
            started_at: Instant::now(),
        }
    }

    fn record(&mut self, failure: &dyn fmt::Display, delay: Duration, retried: bool) {
        self.total_delay += delay;
        self.errors.push(RetryRecord {
            message: failure.to_string(),
            timestamp: SystemTime::now(),
            delay,
            retried,
        });
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Failed attempts that were followed by another attempt.
    pub fn retries(&self) -> usize {
        self.errors.iter().filter(|r| r.retried).count()
    }
}

/// Result of an `execute` call together with its statistics.
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    pub result: Result<T, CallError<E>>,
    pub state: RetryState,
}

/// Passed to the `on_retry` hook just before the engine sleeps.
#[derive(Debug, Clone)]
pub struct RetryNotice {
    /// 1-based number of the attempt that just failed.
    pub attempt: u32,
    pub status_code: Option<u16>,
    pub error_code: Option<String>,
    pub message: String,
    pub delay: Duration,
}

type RetryHook = Arc<dyn Fn(&RetryNotice) + Send + Sync>;
type JitterSource = Arc<dyn Fn() -> f64 + Send + Sync>;

/// Runs operations under a per-attempt timeout and retries transient failures.
///
/// Cloning is cheap; clones share the hook and jitter source but every call
/// to `execute` owns its own [`RetryState`].
#[derive(Clone)]
pub struct RetryEngine {
    name: Arc<str>,
    config: RetryConfig,
    on_retry: Option<RetryHook>,
    jitter: JitterSource,
}

impl fmt::Debug for RetryEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryEngine")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}

impl RetryEngine {
    /// `name` identifies the operation in logs.
    pub fn new(name: impl Into<String>, config: RetryConfig) -> Self {
        Self {
            name: Arc::from(name.into()),
            config,
            on_retry: None,
            jitter: Arc::new(rand::random::<f64>),
        }
    }

    /// Install a hook called before each retry sleep.
    pub fn on_retry(mut self, hook: impl Fn(&RetryNotice) + Send + Sync + 'static) -> Self {
        self.on_retry = Some(Arc::new(hook));
        self
    }

    /// Replace the random source used for jitter (values in `[0, 1)`).
    pub fn with_jitter_source(mut self, source: impl Fn() -> f64 + Send + Sync + 'static) -> Self {
        self.jitter = Arc::new(source);
        self
    }

    /// A copy of this engine with per-call overrides merged into its config.
    pub fn with_overrides(&self, overrides: &RetryOverrides) -> Self {
        Self {
            config: self.config.merged(overrides),
            ..self.clone()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `operation`, retrying transient failures.
    ///
    /// Non-retryable failures and the failure of the last allowed attempt are
    /// returned unchanged.
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> Result<T, CallError<E>>
    where
        E: Failure,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_with_state(operation).await.result
    }

    /// Like [`execute`](Self::execute) with per-call overrides.
    pub async fn execute_with_overrides<T, E, F, Fut>(
        &self,
        overrides: &RetryOverrides,
        operation: F,
    ) -> Result<T, CallError<E>>
    where
        E: Failure,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.with_overrides(overrides).execute(operation).await
    }

    /// Run `operation` and return the result together with its statistics.
    ///
    /// An attempt that exceeds the timeout is dropped; whatever it would have
    /// produced later is never observed.
    pub async fn execute_with_state<T, E, F, Fut>(&self, mut operation: F) -> RetryOutcome<T, E>
    where
        E: Failure,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut state = RetryState::new();
        let timeout = self.config.timeout();
        let mut attempt = 0u32;

        loop {
            state.attempts = attempt + 1;
            let failure = match tokio::time::timeout(timeout, operation()).await {
                Ok(Ok(value)) => {
                    if attempt > 0 {
                        tracing::info!(
                            operation = %self.name,
                            attempts = state.attempts,
                            elapsed_ms = state.elapsed().as_millis() as u64,
                            "operation recovered after retries"
                        );
                    }
                    return RetryOutcome {
                        result: Ok(value),
                        state,
                    };
                }
                Ok(Err(e)) => CallError::Operation(e),
                Err(_) => CallError::TimedOut(timeout),
            };

            let retryable = is_retryable_call(&failure, &self.config);
            match self.config.decide(attempt, retryable, (self.jitter)()) {
                RetryDecision::NoRetry => {
                    state.record(&failure, Duration::ZERO, false);
                    tracing::warn!(
                        operation = %self.name,
                        attempts = state.attempts,
                        retryable,
                        elapsed_ms = state.elapsed().as_millis() as u64,
                        total_delay_ms = state.total_delay.as_millis() as u64,
                        error = %failure,
                        "operation failed"
                    );
                    return RetryOutcome {
                        result: Err(failure),
                        state,
                    };
                }
                RetryDecision::RetryAfter(delay) => {
                    state.record(&failure, delay, true);
                    tracing::debug!(
                        operation = %self.name,
                        attempt = state.attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %failure,
                        "retrying after transient failure"
                    );
                    if let Some(hook) = &self.on_retry {
                        hook(&notice(state.attempts, &failure, delay));
                    }
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

fn notice<E: Failure>(attempt: u32, failure: &CallError<E>, delay: Duration) -> RetryNotice {
    let (status_code, error_code) = match failure {
        CallError::Operation(e) => (e.status_code(), e.error_code().map(str::to_string)),
        CallError::TimedOut(_) => (None, Some(super::codes::TIMED_OUT.to_string())),
        _ => (None, None),
    };
    RetryNotice {
        attempt,
        status_code,
        error_code,
        message: failure.to_string(),
        delay,
    }
}
