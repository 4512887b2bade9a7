//! Tests for the circuit breaker and its registry.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::*;
use crate::config::RetryConfig;
use crate::retry::RemoteFailure;

fn no_retry_engine() -> RetryEngine {
    let mut cfg = RetryConfig::default();
    cfg.max_retries = 0;
    RetryEngine::new("breaker-test", cfg)
}

fn breaker() -> CircuitBreaker {
    CircuitBreaker::new("api", BreakerConfig::default())
}

async fn fail(b: &CircuitBreaker, engine: &RetryEngine) -> CallError<RemoteFailure> {
    b.call(engine, || async { Err::<(), _>(RemoteFailure::http(500, "boom")) })
        .await
        .unwrap_err()
}

async fn succeed(b: &CircuitBreaker, engine: &RetryEngine) -> Result<u32, CallError<RemoteFailure>> {
    b.call(engine, || async { Ok::<_, RemoteFailure>(7) }).await
}

async fn open(b: &CircuitBreaker, engine: &RetryEngine) {
    for _ in 0..5 {
        fail(b, engine).await;
    }
    assert_eq!(b.state(), CircuitState::Open);
}

#[tokio::test(start_paused = true)]
async fn opens_after_threshold_failures() {
    let b = breaker();
    let engine = no_retry_engine();
    for i in 0..4 {
        fail(&b, &engine).await;
        assert_eq!(b.state(), CircuitState::Closed, "after {} failures", i + 1);
    }
    fail(&b, &engine).await;
    assert_eq!(b.state(), CircuitState::Open);
    assert_eq!(b.snapshot().failure_count, 5);
}

#[tokio::test(start_paused = true)]
async fn success_resets_failure_count_while_closed() {
    let b = breaker();
    let engine = no_retry_engine();
    for _ in 0..4 {
        fail(&b, &engine).await;
    }
    succeed(&b, &engine).await.unwrap();
    assert_eq!(b.snapshot().failure_count, 0);
    for _ in 0..4 {
        fail(&b, &engine).await;
    }
    assert_eq!(b.state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn open_circuit_rejects_without_invoking_operation() {
    let b = breaker();
    let engine = no_retry_engine();
    open(&b, &engine).await;

    let calls = AtomicU32::new(0);
    let err = b
        .call(&engine, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, RemoteFailure>(()) }
        })
        .await
        .unwrap_err();
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    match err {
        CallError::CircuitOpen { retry_after } => {
            assert!(retry_after <= Duration::from_secs(60));
            assert!(retry_after > Duration::ZERO);
        }
        other => panic!("expected CircuitOpen, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn admits_probe_after_reset_timeout() {
    let b = breaker();
    let engine = no_retry_engine();
    open(&b, &engine).await;

    tokio::time::advance(Duration::from_secs(59)).await;
    assert!(succeed(&b, &engine).await.unwrap_err().is_circuit_open());

    tokio::time::advance(Duration::from_secs(1)).await;
    assert_eq!(succeed(&b, &engine).await.unwrap(), 7);
    assert_eq!(b.state(), CircuitState::HalfOpen);
    assert_eq!(b.snapshot().success_count, 1);
}

#[tokio::test(start_paused = true)]
async fn two_successful_probes_close_the_circuit() {
    let b = breaker();
    let engine = no_retry_engine();
    open(&b, &engine).await;
    tokio::time::advance(Duration::from_secs(60)).await;

    succeed(&b, &engine).await.unwrap();
    succeed(&b, &engine).await.unwrap();
    let snap = b.snapshot();
    assert_eq!(snap.state, CircuitState::Closed);
    assert_eq!(snap.failure_count, 0);
    assert_eq!(snap.success_count, 0);
}

#[tokio::test(start_paused = true)]
async fn failed_probe_reopens_and_restarts_cooldown() {
    let b = breaker();
    let engine = no_retry_engine();
    open(&b, &engine).await;
    tokio::time::advance(Duration::from_secs(60)).await;

    succeed(&b, &engine).await.unwrap();
    fail(&b, &engine).await;
    assert_eq!(b.state(), CircuitState::Open);

    let remaining = b.snapshot().cooldown_remaining.unwrap();
    assert_eq!(remaining, Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn only_one_probe_in_flight() {
    let b = Arc::new(breaker());
    let engine = no_retry_engine();
    open(&b, &engine).await;
    tokio::time::advance(Duration::from_secs(60)).await;

    let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
    let probe = {
        let b = Arc::clone(&b);
        let engine = engine.clone();
        tokio::spawn(async move {
            let mut rx = Some(release_rx);
            b.call(&engine, move || {
                let rx = rx.take();
                async move {
                    if let Some(rx) = rx {
                        let _ = rx.await;
                    }
                    Ok::<_, RemoteFailure>(())
                }
            })
            .await
        })
    };
    tokio::task::yield_now().await;
    assert!(b.snapshot().probe_in_flight);

    let calls = AtomicU32::new(0);
    let err = b
        .call(&engine, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, RemoteFailure>(()) }
        })
        .await
        .unwrap_err();
    assert!(err.is_circuit_open());
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    release_tx.send(()).unwrap();
    probe.await.unwrap().unwrap();
    assert!(!b.snapshot().probe_in_flight);
    assert_eq!(b.state(), CircuitState::HalfOpen);
}

#[tokio::test(start_paused = true)]
async fn dropped_probe_frees_the_slot() {
    let b = breaker();
    let engine = no_retry_engine();
    open(&b, &engine).await;
    tokio::time::advance(Duration::from_secs(60)).await;

    let hung = b.call(&engine, || async {
        std::future::pending::<()>().await;
        Ok::<_, RemoteFailure>(())
    });
    let _ = tokio::time::timeout(Duration::from_millis(10), hung).await;
    assert!(!b.snapshot().probe_in_flight);
    assert_eq!(succeed(&b, &engine).await.unwrap(), 7);
}

#[tokio::test(start_paused = true)]
async fn retried_call_counts_as_one_outcome() {
    let b = breaker();
    let mut cfg = RetryConfig::default();
    cfg.max_retries = 2;
    cfg.base_delay_ms = 1;
    let engine = RetryEngine::new("retried", cfg);
    fail(&b, &engine).await;
    assert_eq!(b.snapshot().failure_count, 1);
}

#[test]
fn manual_acquire_and_record() {
    let b = CircuitBreaker::new(
        "manual",
        BreakerConfig {
            failure_threshold: 1,
            success_threshold: 1,
            reset_timeout_ms: 0,
        },
    );
    assert_eq!(b.try_acquire(), Ok(false));
    b.record_failure(false);
    assert_eq!(b.state(), CircuitState::Open);

    assert_eq!(b.try_acquire(), Ok(true));
    assert_eq!(b.state(), CircuitState::HalfOpen);
    b.record_success(true);
    assert_eq!(b.state(), CircuitState::Closed);
}

#[test]
fn reset_clears_everything() {
    let b = CircuitBreaker::new(
        "reset",
        BreakerConfig {
            failure_threshold: 1,
            ..BreakerConfig::default()
        },
    );
    b.record_failure(false);
    assert_eq!(b.state(), CircuitState::Open);
    b.reset();
    let snap = b.snapshot();
    assert_eq!(snap.state, CircuitState::Closed);
    assert_eq!(snap.failure_count, 0);
    assert!(snap.cooldown_remaining.is_none());
}

#[test]
fn registry_shares_breaker_per_origin() {
    let registry = BreakerRegistry::new(BreakerConfig::default());
    let a = registry.for_url("https://api.example.com/groups").unwrap();
    let b = registry.for_url("https://api.example.com:443/users/1").unwrap();
    let c = registry.for_url("https://files.example.com/upload").unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert!(!Arc::ptr_eq(&a, &c));
    assert_eq!(a.name(), "https://api.example.com:443");
    assert_eq!(registry.snapshots().len(), 2);
}

#[test]
fn registry_rejects_bad_urls() {
    let registry = BreakerRegistry::new(BreakerConfig::default());
    assert!(registry.for_url("not a url").is_err());
}

#[test]
fn dependency_key_uses_default_port_when_missing() {
    let key = DependencyKey::from_url("http://example.com/path").unwrap();
    assert_eq!(key.scheme, "http");
    assert_eq!(key.host, "example.com");
    assert_eq!(key.port, 80);
}
