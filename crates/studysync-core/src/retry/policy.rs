use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::RetryConfig;

/// Relative width of the jitter band around the capped delay.
const JITTER_FACTOR: f64 = 0.2;

/// Exponent cap; beyond this every sane multiplier has long hit `max_delay`.
const MAX_EXPONENT: u32 = 32;

/// Exponential growth parameters shared by request retries and reconnects.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Backoff {
    /// `min(base * multiplier^attempt, max)`, before jitter.
    pub fn capped_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.min(MAX_EXPONENT) as i32;
        let raw_ms = self.base_delay.as_millis() as f64 * self.multiplier.max(1.0).powi(exp);
        let capped_ms = raw_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped_ms.max(0.0) as u64)
    }
}

/// Jittered backoff delay for a 0-based attempt, with `unit` drawn from `[0, 1)`.
///
/// Pure: the same inputs always give the same delay.
pub fn compute_delay_with(attempt: u32, backoff: &Backoff, unit: f64) -> Duration {
    let capped = backoff.capped_delay(attempt).as_millis() as f64;
    let unit = unit.clamp(0.0, 1.0);
    let jittered = capped + capped * JITTER_FACTOR * (unit - 0.5);
    Duration::from_millis(jittered.max(0.0).floor() as u64)
}

/// Jittered backoff delay using the thread-local random source.
pub fn compute_delay(attempt: u32, backoff: &Backoff) -> Duration {
    compute_delay_with(attempt, backoff, rand::random::<f64>())
}

/// Decision returned by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Do not retry this failure.
    NoRetry,
    /// Retry after the given delay.
    RetryAfter(Duration),
}

impl RetryConfig {
    /// Decide what to do after `attempt` (0-based) failed.
    ///
    /// Returns `NoRetry` when the failure is not retryable or when this was
    /// the last allowed attempt.
    pub fn decide(&self, attempt: u32, retryable: bool, unit: f64) -> RetryDecision {
        if !retryable || attempt >= self.max_retries {
            return RetryDecision::NoRetry;
        }
        RetryDecision::RetryAfter(compute_delay_with(attempt, &self.backoff(), unit))
    }

    /// Apply per-call overrides on top of this config.
    pub fn merged(&self, overrides: &RetryOverrides) -> RetryConfig {
        RetryConfig {
            max_retries: overrides.max_retries.unwrap_or(self.max_retries),
            base_delay_ms: overrides.base_delay_ms.unwrap_or(self.base_delay_ms),
            max_delay_ms: overrides.max_delay_ms.unwrap_or(self.max_delay_ms),
            backoff_multiplier: overrides
                .backoff_multiplier
                .unwrap_or(self.backoff_multiplier),
            timeout_ms: overrides.timeout_ms.unwrap_or(self.timeout_ms),
            retryable_status_codes: overrides
                .retryable_status_codes
                .clone()
                .unwrap_or_else(|| self.retryable_status_codes.clone()),
            retryable_error_codes: overrides
                .retryable_error_codes
                .clone()
                .unwrap_or_else(|| self.retryable_error_codes.clone()),
        }
    }
}

/// Per-call overrides; `None` keeps the engine's configured value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryOverrides {
    pub max_retries: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub backoff_multiplier: Option<f64>,
    pub timeout_ms: Option<u64>,
    pub retryable_status_codes: Option<Vec<u16>>,
    pub retryable_error_codes: Option<Vec<String>>,
}
