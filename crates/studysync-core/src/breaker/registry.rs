//! One shared breaker per remote dependency.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;

use super::{BreakerSnapshot, CircuitBreaker, DependencyKey};
use crate::config::BreakerConfig;

/// Hands out the breaker for a dependency, creating it on first use.
///
/// Created once by the owner of the outgoing calls (e.g. the CLI `probe`
/// command) and passed down, so every call to the same origin shares state.
#[derive(Debug)]
pub struct BreakerRegistry {
    config: BreakerConfig,
    breakers: Mutex<BTreeMap<DependencyKey, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(BTreeMap::new()),
        }
    }

    /// Breaker for the origin of `url`.
    pub fn for_url(&self, url: &str) -> Result<Arc<CircuitBreaker>> {
        Ok(self.for_key(DependencyKey::from_url(url)?))
    }

    pub fn for_key(&self, key: DependencyKey) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().unwrap_or_else(PoisonError::into_inner);
        let config = &self.config;
        Arc::clone(
            breakers
                .entry(key)
                .or_insert_with_key(|k| Arc::new(CircuitBreaker::new(k.to_string(), config.clone()))),
        )
    }

    /// Snapshots of every breaker created so far, ordered by key.
    pub fn snapshots(&self) -> Vec<(DependencyKey, BreakerSnapshot)> {
        let breakers = self.breakers.lock().unwrap_or_else(PoisonError::into_inner);
        breakers
            .iter()
            .map(|(k, b)| (k.clone(), b.snapshot()))
            .collect()
    }
}
