//! `studysync probe` – HEAD-probe URLs through retries and per-origin breakers.

use anyhow::{bail, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use studysync_core::aggregate::{run_all_guarded, AggregateOptions, Indexed};
use studysync_core::breaker::{BreakerRegistry, CircuitBreaker, DependencyKey};
use studysync_core::config::SyncConfig;
use studysync_core::probe::{probe_async, ProbeResult};
use studysync_core::retry::{CallError, RemoteFailure, RetryEngine, RetryOverrides};

pub async fn run_probe(
    cfg: &SyncConfig,
    urls: &[String],
    overrides: &RetryOverrides,
    allow_partial: bool,
) -> Result<()> {
    let retry = cfg.retry.merged(overrides);
    let timeout = retry.timeout();
    let engine = RetryEngine::new("probe", retry).on_retry(|notice| {
        eprintln!(
            "retry #{} in {}ms: {}",
            notice.attempt,
            notice.delay.as_millis(),
            notice.message
        );
    });
    let registry = BreakerRegistry::new(cfg.breaker.clone());

    // Group by origin so each group shares one breaker; keep original positions.
    let mut groups: BTreeMap<DependencyKey, Vec<usize>> = BTreeMap::new();
    for (index, url) in urls.iter().enumerate() {
        groups
            .entry(DependencyKey::from_url(url)?)
            .or_default()
            .push(index);
    }

    // Report on the whole batch, not per origin.
    let options = AggregateOptions {
        throw_on_all_failed: false,
    };
    let mut successes: Vec<Indexed<ProbeResult>> = Vec::new();
    let mut failures: Vec<Indexed<CallError<RemoteFailure>>> = Vec::new();
    for (key, members) in groups {
        let breaker: Arc<CircuitBreaker> = registry.for_key(key);
        let ops: Vec<_> = members
            .iter()
            .map(|&i| {
                let url = urls[i].clone();
                move || probe_async(url.clone(), timeout)
            })
            .collect();
        let outcome = run_all_guarded(&engine, &breaker, ops, options).await?;
        successes.extend(outcome.successes.into_iter().map(|s| Indexed {
            index: members[s.index],
            value: s.value,
        }));
        failures.extend(outcome.failures.into_iter().map(|f| Indexed {
            index: members[f.index],
            value: f.value,
        }));
    }
    successes.sort_by_key(|s| s.index);
    failures.sort_by_key(|f| f.index);

    println!("{:<6} {:<8} {:<10} {}", "INDEX", "STATUS", "TIME_MS", "URL / ERROR");
    for s in &successes {
        println!(
            "{:<6} {:<8} {:<10} {}",
            s.index,
            s.value.status,
            s.value.elapsed.as_millis(),
            s.value.url
        );
    }
    for f in &failures {
        println!("{:<6} {:<8} {:<10} {}: {}", f.index, "FAILED", "-", urls[f.index], f.value);
    }
    for (key, snapshot) in registry.snapshots() {
        tracing::debug!(dependency = %key, state = ?snapshot.state, failures = snapshot.failure_count, "breaker after probe");
    }

    if failures.is_empty() {
        return Ok(());
    }
    if successes.is_empty() && cfg.aggregate.throw_on_all_failed {
        bail!("all {} probes failed", failures.len());
    }
    if !allow_partial {
        bail!("{} of {} probes failed", failures.len(), urls.len());
    }
    Ok(())
}
