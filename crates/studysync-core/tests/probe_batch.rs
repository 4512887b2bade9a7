//! Integration test: HEAD probes against a local scripted server, batched
//! through the aggregator and guarded by a per-origin breaker.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use studysync_core::aggregate::{run_all, run_all_guarded, AggregateOptions};
use studysync_core::breaker::BreakerRegistry;
use studysync_core::config::{BreakerConfig, RetryConfig};
use studysync_core::probe::probe_async;
use studysync_core::retry::{CallError, RetryEngine};

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

fn engine(max_retries: u32) -> RetryEngine {
    let cfg = RetryConfig {
        max_retries,
        base_delay_ms: 10,
        max_delay_ms: 50,
        timeout_ms: 10_000,
        ..RetryConfig::default()
    };
    RetryEngine::new("probe", cfg)
}

#[tokio::test]
async fn batch_keeps_partial_results_and_retries_only_transient_failures() {
    let server = common::status_server::start(&[
        ("/ok", &[200]),
        ("/gone", &[404]),
        ("/flaky", &[503, 200]),
    ]);
    let retries = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&retries);
    let engine = engine(2).on_retry(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let ops: Vec<_> = ["/ok", "/gone", "/flaky"]
        .iter()
        .map(|path| {
            let url = server.url(path);
            move || probe_async(url.clone(), PROBE_TIMEOUT)
        })
        .collect();
    let outcome = run_all(&engine, ops, AggregateOptions::default())
        .await
        .expect("two probes succeed");

    assert_eq!(
        outcome.successes.iter().map(|s| s.index).collect::<Vec<_>>(),
        vec![0, 2]
    );
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].index, 1);
    let failure = outcome.failures[0].value.operation().expect("operation failure");
    assert_eq!(failure.status, Some(404));

    assert_eq!(server.hits("/gone"), 1, "404 is not retried");
    assert_eq!(server.hits("/flaky"), 2);
    assert_eq!(retries.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn all_failed_batch_raises() {
    let server = common::status_server::start(&[("/a", &[500]), ("/b", &[404])]);
    let ops: Vec<_> = ["/a", "/b"]
        .iter()
        .map(|path| {
            let url = server.url(path);
            move || probe_async(url.clone(), PROBE_TIMEOUT)
        })
        .collect();
    let err = run_all(&engine(1), ops, AggregateOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.failures().len(), 2);
    assert_eq!(server.hits("/a"), 2);
    assert_eq!(server.hits("/b"), 1);
}

#[tokio::test]
async fn breaker_stops_probing_a_failing_origin() {
    let server = common::status_server::start(&[("/down", &[500])]);
    let registry = BreakerRegistry::new(BreakerConfig {
        failure_threshold: 2,
        ..BreakerConfig::default()
    });
    let url = server.url("/down");
    let breaker = registry.for_url(&url).unwrap();
    let engine = engine(0);

    for _ in 0..2 {
        let err = breaker
            .call(&engine, || probe_async(url.clone(), PROBE_TIMEOUT))
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::Operation(_)));
    }
    let err = breaker
        .call(&engine, || probe_async(url.clone(), PROBE_TIMEOUT))
        .await
        .unwrap_err();
    assert!(err.is_circuit_open());
    assert_eq!(server.hits("/down"), 2);

    let ops = vec![{
        let url = url.clone();
        move || probe_async(url.clone(), PROBE_TIMEOUT)
    }];
    let batch = run_all_guarded(&engine, &breaker, ops, AggregateOptions::default())
        .await
        .unwrap_err();
    assert!(batch.failures()[0].value.is_circuit_open());
    assert_eq!(server.hits("/down"), 2);
}
