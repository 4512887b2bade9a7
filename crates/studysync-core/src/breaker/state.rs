//! Breaker state transitions, kept free of I/O so they can be driven with explicit instants.

use std::time::Duration;

use tokio::time::Instant;

use crate::config::BreakerConfig;

/// The three breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls pass through.
    Closed,
    /// Calls are rejected until the cooldown elapses.
    Open,
    /// One probe at a time is admitted to test recovery.
    HalfOpen,
}

/// Outcome of asking the breaker for permission to call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Admission {
    Allowed { probe: bool },
    Rejected { retry_after: Duration },
}

/// Point-in-time view of a breaker, for status output and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    /// Time left before an open breaker admits a probe.
    pub cooldown_remaining: Option<Duration>,
    pub probe_in_flight: bool,
}

#[derive(Debug)]
pub(super) struct BreakerCore {
    config: BreakerConfig,
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_at: Option<Instant>,
    probe_in_flight: bool,
}

impl BreakerCore {
    pub(super) fn new(config: BreakerConfig) -> Self {
        Self {
            config: BreakerConfig {
                failure_threshold: config.failure_threshold.max(1),
                success_threshold: config.success_threshold.max(1),
                reset_timeout_ms: config.reset_timeout_ms,
            },
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_at: None,
            probe_in_flight: false,
        }
    }

    pub(super) fn state(&self) -> CircuitState {
        self.state
    }

    fn cooldown_remaining(&self, now: Instant) -> Duration {
        let since = self
            .last_failure_at
            .map(|at| now.saturating_duration_since(at))
            .unwrap_or(Duration::MAX);
        self.config.reset_timeout().saturating_sub(since)
    }

    /// Ask to make a call at `now`. An open breaker whose cooldown has
    /// elapsed moves to half-open here, before the probe runs.
    pub(super) fn admit(&mut self, now: Instant) -> Admission {
        match self.state {
            CircuitState::Closed => Admission::Allowed { probe: false },
            CircuitState::Open => {
                let remaining = self.cooldown_remaining(now);
                if remaining.is_zero() {
                    self.state = CircuitState::HalfOpen;
                    self.success_count = 0;
                    self.probe_in_flight = true;
                    Admission::Allowed { probe: true }
                } else {
                    Admission::Rejected {
                        retry_after: remaining,
                    }
                }
            }
            CircuitState::HalfOpen => {
                if self.probe_in_flight {
                    Admission::Rejected {
                        retry_after: Duration::ZERO,
                    }
                } else {
                    self.probe_in_flight = true;
                    Admission::Allowed { probe: true }
                }
            }
        }
    }

    /// Record a success. Returns the new state when it changed.
    pub(super) fn on_success(&mut self, probe: bool) -> Option<CircuitState> {
        match self.state {
            CircuitState::Closed => {
                self.failure_count = 0;
                None
            }
            CircuitState::HalfOpen if probe => {
                self.probe_in_flight = false;
                self.success_count += 1;
                if self.success_count >= self.config.success_threshold {
                    self.state = CircuitState::Closed;
                    self.failure_count = 0;
                    self.success_count = 0;
                    self.last_failure_at = None;
                    Some(CircuitState::Closed)
                } else {
                    None
                }
            }
            // Late results of calls admitted before the circuit opened.
            CircuitState::HalfOpen | CircuitState::Open => None,
        }
    }

    /// Record a failure at `now`. Returns the new state when it changed.
    pub(super) fn on_failure(&mut self, probe: bool, now: Instant) -> Option<CircuitState> {
        match self.state {
            CircuitState::Closed => {
                self.failure_count += 1;
                if self.failure_count >= self.config.failure_threshold {
                    self.state = CircuitState::Open;
                    self.last_failure_at = Some(now);
                    Some(CircuitState::Open)
                } else {
                    None
                }
            }
            CircuitState::HalfOpen if probe => {
                self.probe_in_flight = false;
                self.state = CircuitState::Open;
                self.success_count = 0;
                self.last_failure_at = Some(now);
                Some(CircuitState::Open)
            }
            CircuitState::HalfOpen | CircuitState::Open => None,
        }
    }

    /// A probe ended without a result (its future was dropped).
    pub(super) fn release_probe(&mut self) {
        if self.state == CircuitState::HalfOpen {
            self.probe_in_flight = false;
        }
    }

    pub(super) fn reset(&mut self) {
        *self = Self::new(self.config.clone());
    }

    pub(super) fn snapshot(&self, now: Instant) -> BreakerSnapshot {
        BreakerSnapshot {
            state: self.state,
            failure_count: self.failure_count,
            success_count: self.success_count,
            cooldown_remaining: (self.state == CircuitState::Open)
                .then(|| self.cooldown_remaining(now)),
            probe_in_flight: self.probe_in_flight,
        }
    }
}
