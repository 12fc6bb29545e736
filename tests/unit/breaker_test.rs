//! Circuit breaker and retry through the public API

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use admissions_gateway::config::{RetryBackoff, RetryConfig};
use admissions_gateway::resilience::{
    BreakerError, CircuitBreaker, CircuitBreakerConfig, CircuitState, retry,
};

fn config() -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        timeout: Duration::from_secs(1),
        error_threshold_percentage: 50,
        reset_timeout: Duration::from_secs(30),
        buckets: 10,
        window: Duration::from_secs(10),
        volume_threshold: 10,
    }
}

async fn succeed(calls: &AtomicU32) -> Result<(), &'static str> {
    calls.fetch_add(1, Ordering::SeqCst);
    Ok(())
}

async fn fail(calls: &AtomicU32) -> Result<(), &'static str> {
    calls.fetch_add(1, Ordering::SeqCst);
    Err("connection reset")
}

#[tokio::test(start_paused = true)]
async fn test_open_breaker_never_invokes_operation() {
    let breaker = CircuitBreaker::new("grades.simple", config());
    let calls = AtomicU32::new(0);

    for i in 0..10 {
        let _ = if i < 6 {
            breaker.call(fail(&calls)).await
        } else {
            breaker.call(succeed(&calls)).await
        };
    }
    assert_eq!(calls.load(Ordering::SeqCst), 10);
    assert_eq!(breaker.state(), CircuitState::Open);

    let before = calls.load(Ordering::SeqCst);
    let result = breaker.call(succeed(&calls)).await;
    assert!(matches!(result, Err(BreakerError::Open { ref name }) if name == "grades.simple"));
    assert_eq!(calls.load(Ordering::SeqCst), before, "open breaker must not poll the operation");

    let stats = breaker.stats();
    assert_eq!(stats.state, CircuitState::Open);
    assert!(stats.reopens_in_ms.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_recovers_through_half_open_trial() {
    let breaker = CircuitBreaker::new("grades.simple", config());
    let calls = AtomicU32::new(0);

    for _ in 0..10 {
        let _ = breaker.call(fail(&calls)).await;
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    tokio::time::advance(Duration::from_secs(29)).await;
    assert!(breaker.call(succeed(&calls)).await.is_err());

    tokio::time::advance(Duration::from_secs(1)).await;
    assert!(breaker.call(succeed(&calls)).await.is_ok());
    assert_eq!(breaker.state(), CircuitState::Closed);

    // The window was reset on close, so a single failure does not reopen
    let _ = breaker.call(fail(&calls)).await;
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_slow_operation_times_out() {
    let breaker = CircuitBreaker::new("grades.write", config());

    let result = breaker
        .call(async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, &'static str>(())
        })
        .await;

    assert!(matches!(result, Err(BreakerError::Timeout { .. })));
    assert_eq!(breaker.stats().window.timeouts, 1);
}

#[tokio::test]
async fn test_breaker_is_shared_across_tasks() {
    let breaker = Arc::new(CircuitBreaker::new("grades.medium", config()));

    let handles: Vec<_> = (0..20)
        .map(|_| {
            let breaker = breaker.clone();
            tokio::spawn(async move { breaker.call(async { Ok::<_, &'static str>(()) }).await })
        })
        .collect();

    for handle in handles {
        assert!(handle.await.unwrap().is_ok());
    }
    assert_eq!(breaker.stats().window.successes, 20);
}

fn retry_config(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        enabled: true,
        max_attempts,
        backoff: RetryBackoff::Constant,
        initial_delay: 10,
        max_delay: 10,
        multiplier: 1.0,
    }
}

#[tokio::test(start_paused = true)]
async fn test_retry_stops_at_first_success() {
    let counter = AtomicU32::new(0);
    let calls = &counter;

    let result: Result<u32, String> = retry(&retry_config(5), || async move {
        let attempt = calls.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt < 3 {
            Err(format!("attempt {} failed", attempt))
        } else {
            Ok(attempt)
        }
    })
    .await;

    assert_eq!(result.unwrap(), 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_retry_gives_up_after_max_attempts() {
    let counter = AtomicU32::new(0);
    let calls = &counter;

    let result: Result<(), String> = retry(&retry_config(3), || async move {
        calls.fetch_add(1, Ordering::SeqCst);
        Err("still locked".to_string())
    })
    .await;

    assert!(result.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}
