//! Run a batch of retried operations concurrently and keep partial results.
//!
//! Every member runs to completion (success or exhausted retries) before the
//! batch returns; one member failing never cancels the others. Results keep
//! the index of the operation that produced them.

use std::future::Future;
use std::sync::Arc;

use thiserror::Error;

use crate::breaker::CircuitBreaker;
use crate::retry::{CallError, Failure, RetryEngine};

pub use crate::config::AggregateConfig as AggregateOptions;

/// A value tagged with the position of the operation that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Indexed<T> {
    pub index: usize,
    pub value: T,
}

/// Successes and failures of a settled batch, each sorted by index.
#[derive(Debug)]
pub struct AggregateOutcome<T, E> {
    pub successes: Vec<Indexed<T>>,
    pub failures: Vec<Indexed<CallError<E>>>,
}

impl<T, E> AggregateOutcome<T, E> {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Raised when every member of a batch failed.
#[derive(Debug, Error)]
pub enum AggregateError<E> {
    #[error("all {} operations failed", .failures.len())]
    AllFailed { failures: Vec<Indexed<CallError<E>>> },
}

impl<E> AggregateError<E> {
    pub fn failures(&self) -> &[Indexed<CallError<E>>] {
        match self {
            AggregateError::AllFailed { failures } => failures,
        }
    }
}

/// Run every operation concurrently, each wrapped in a clone of `engine`.
pub async fn run_all<T, E, F, Fut>(
    engine: &RetryEngine,
    operations: Vec<F>,
    options: AggregateOptions,
) -> Result<AggregateOutcome<T, E>, AggregateError<E>>
where
    T: Send + 'static,
    E: Failure + Send + 'static,
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
{
    run_members(engine, None, operations, options).await
}

/// Like [`run_all`], with every member routed through `breaker`.
pub async fn run_all_guarded<T, E, F, Fut>(
    engine: &RetryEngine,
    breaker: &Arc<CircuitBreaker>,
    operations: Vec<F>,
    options: AggregateOptions,
) -> Result<AggregateOutcome<T, E>, AggregateError<E>>
where
    T: Send + 'static,
    E: Failure + Send + 'static,
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
{
    run_members(engine, Some(Arc::clone(breaker)), operations, options).await
}

async fn run_members<T, E, F, Fut>(
    engine: &RetryEngine,
    breaker: Option<Arc<CircuitBreaker>>,
    operations: Vec<F>,
    options: AggregateOptions,
) -> Result<AggregateOutcome<T, E>, AggregateError<E>>
where
    T: Send + 'static,
    E: Failure + Send + 'static,
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
{
    let total = operations.len();
    let mut join_set = tokio::task::JoinSet::new();

    for (index, operation) in operations.into_iter().enumerate() {
        let engine = engine.clone();
        let breaker = breaker.clone();
        join_set.spawn(async move {
            let result = match breaker {
                Some(b) => b.call(&engine, operation).await,
                None => engine.execute(operation).await,
            };
            (index, result)
        });
    }

    let mut slots: Vec<Option<Result<T, CallError<E>>>> = (0..total).map(|_| None).collect();
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((index, result)) => slots[index] = Some(result),
            // The slot stays empty and is reported below.
            Err(e) => tracing::warn!(operation = %engine.name(), error = %e, "batch member task failed"),
        }
    }

    let mut outcome = AggregateOutcome {
        successes: Vec::new(),
        failures: Vec::new(),
    };
    for (index, slot) in slots.into_iter().enumerate() {
        match slot {
            Some(Ok(value)) => outcome.successes.push(Indexed { index, value }),
            Some(Err(value)) => outcome.failures.push(Indexed { index, value }),
            None => outcome.failures.push(Indexed {
                index,
                value: CallError::Task("task panicked or was cancelled".to_string()),
            }),
        }
    }

    tracing::info!(
        operation = %engine.name(),
        total,
        succeeded = outcome.successes.len(),
        failed = outcome.failures.len(),
        "batch settled"
    );

    if options.throw_on_all_failed && outcome.successes.is_empty() && !outcome.failures.is_empty() {
        return Err(AggregateError::AllFailed {
            failures: outcome.failures,
        });
    }
    Ok(outcome)
}
