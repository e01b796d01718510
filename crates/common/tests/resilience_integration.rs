//! Integration tests for the resilience control plane
//!
//! Exercises the rate limiter, circuit breaker, and timeout controller
//! together the way the scan workers drive them: admission first, then
//! gated execution, then deadline-bounded work.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use vulnscan_common::resilience::{
    CircuitBreakerConfig, CircuitBreakerRegistry, RateLimitConfig, RateLimiter, ResilienceError,
    TimeoutConfig, TimeoutController,
};

/// Downstream failure used to drive breaker transitions.
#[derive(Debug)]
struct ProbeError(&'static str);

impl std::fmt::Display for ProbeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ProbeError {}

/// Burst admission: a capacity-3 bucket admits three serial requests and
/// rejects the fourth; resetting the key recreates a full bucket.
#[tokio::test]
async fn test_rate_limit_under_burst() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let config = RateLimitConfig::builder().capacity(3.0).rate(0.1).build().unwrap();
    let limiter = RateLimiter::new(config).unwrap();

    assert!(limiter.check("a").await);
    assert!(limiter.check("a").await);
    assert!(limiter.check("a").await);
    assert!(!limiter.check("a").await);

    limiter.reset("a");
    assert!(limiter.check("a").await);
}

/// Waiting callers are admitted once the refill catches up.
#[tokio::test]
async fn test_rate_limit_wait_admits_after_refill() {
    let config = RateLimitConfig::builder().capacity(2.0).rate(100.0).build().unwrap();
    let limiter = RateLimiter::new(config).unwrap();

    assert!(limiter.check_n("worker", 2.0).await);
    // 1 token at 100/s arrives in ~10ms.
    limiter.wait("worker").await;
}

/// Full recovery cycle against the wall clock: two failures open the
/// circuit, the recovery window admits a half-open probe, and two
/// successes close it again.
#[tokio::test]
async fn test_circuit_recovery_cycle() {
    let registry = CircuitBreakerRegistry::new();
    let config = CircuitBreakerConfig::builder()
        .failure_threshold(2)
        .success_threshold(2)
        .recovery_timeout(Duration::from_millis(100))
        .build()
        .unwrap();
    let breaker = registry.get("flaky-target", config).unwrap();

    breaker.record_failure();
    breaker.record_failure();
    assert!(breaker.is_open());

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(breaker.can_execute());
    assert!(breaker.is_half_open());

    breaker.record_success();
    breaker.record_success();
    assert!(breaker.is_closed());
}

/// Gated execution distinguishes rejection from downstream failure, and a
/// rejected call never reaches the downstream.
#[tokio::test]
async fn test_breaker_execute_gates_probes() {
    let registry = CircuitBreakerRegistry::new();
    let config = CircuitBreakerConfig::builder()
        .failure_threshold(1)
        .recovery_timeout(Duration::from_secs(60))
        .build()
        .unwrap();
    let breaker = registry.get("target", config).unwrap();
    let calls = Arc::new(AtomicU32::new(0));

    let counted = Arc::clone(&calls);
    let result = breaker
        .execute(|| async move {
            counted.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(ProbeError("connection refused"))
        })
        .await;
    assert!(matches!(result, Err(ResilienceError::OperationFailed { .. })));

    let counted = Arc::clone(&calls);
    let result = breaker
        .execute(|| async move {
            counted.fetch_add(1, Ordering::SeqCst);
            Ok::<_, ProbeError>(())
        })
        .await;
    assert!(matches!(result, Err(ResilienceError::CircuitOpen { .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

/// The registry serves one shared breaker per name across workers.
#[tokio::test]
async fn test_registry_shared_across_workers() {
    let registry = Arc::new(CircuitBreakerRegistry::new());
    let config =
        CircuitBreakerConfig::builder().failure_threshold(4).build().unwrap();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let registry = Arc::clone(&registry);
        handles.push(tokio::spawn(async move {
            registry.get("shared", config).unwrap().record_failure();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let stats = registry.get_all_stats();
    assert!(stats["shared"].state == vulnscan_common::resilience::CircuitState::Open);
}

/// A probe that overruns its deadline is reported as a timeout and does
/// not count as a circuit success.
#[tokio::test]
async fn test_timeout_bounded_probe() {
    let timeouts = TimeoutController::new(TimeoutConfig {
        connect: Duration::from_millis(10),
        read: Duration::from_millis(10),
        total: Duration::from_millis(50),
    });
    let registry = CircuitBreakerRegistry::new();
    let breaker = registry.get("slow-target", CircuitBreakerConfig::default()).unwrap();

    let outcome = timeouts
        .execute_with_timeout(tokio::time::sleep(Duration::from_secs(30)), None, None)
        .await;
    assert!(outcome.is_err());

    // The worker records nothing on timeout; the breaker is untouched.
    assert_eq!(breaker.stats().failure_count, 0);
    assert_eq!(breaker.stats().success_count, 0);
}

/// Admission pipeline in worker order: rate limit, then breaker, then
/// deadline-bounded execution.
#[tokio::test]
async fn test_admission_pipeline() -> anyhow::Result<()> {
    let limiter = RateLimiter::new(RateLimitConfig::builder().capacity(5.0).rate(10.0).build()?)?;
    let registry = CircuitBreakerRegistry::new();
    let timeouts = TimeoutController::new(TimeoutConfig::default());

    let target = "198.51.100.7";
    assert!(limiter.check(target).await);

    let breaker = registry.get(target, CircuitBreakerConfig::default())?;
    let result = breaker
        .execute(|| async {
            timeouts
                .execute_with_timeout(async { "probe result" }, Some(Duration::from_secs(1)), None)
                .await
        })
        .await;

    assert_eq!(result.map_err(|e| anyhow::anyhow!(e.to_string()))?, "probe result");
    assert!(breaker.is_closed());
    Ok(())
}
