//! Circuit Breaker
//!
//! Guards a remote dependency with three states:
//! - Closed: calls pass through, consecutive failures are counted
//! - Open: calls are rejected immediately
//! - HalfOpen: trial calls pass through, consecutive successes are counted
//!
//! Transitions:
//! - Closed → Open: consecutive failures reach `failure_threshold`
//! - Open → HalfOpen: on the first call after `open_duration` has elapsed since
//!   the last failure (checked lazily, there is no timer)
//! - HalfOpen → Closed: `half_open_success_target` consecutive successes
//! - HalfOpen → Open: any failure
//!
//! One breaker instance exists per dependency kind for the whole process and is
//! shared by every session through an `Arc`.

use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Thresholds for one breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit. Clamped to at least 1.
    pub failure_threshold: u32,
    /// How long the circuit stays open after the last failure.
    pub open_duration: Duration,
    /// Consecutive half-open successes needed to close the circuit.
    pub half_open_success_target: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration: Duration::from_secs(60),
            half_open_success_target: 3,
        }
    }
}

/// Error returned by [`CircuitBreaker::guard`].
#[derive(Debug, thiserror::Error)]
pub enum CircuitError<E> {
    /// The breaker is open and the operation was not invoked.
    #[error("circuit breaker is open")]
    Open,
    /// The operation ran and failed.
    #[error("{0}")]
    Inner(E),
}

/// Point-in-time view of a breaker, served by the health endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<Instant>,
}

/// Thread-safe circuit breaker. All read-check-write cycles happen under one
/// mutex that is never held across an `.await`.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state, without triggering the lazy open → half-open check.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
        }
    }

    /// Runs `operation` unless the circuit is open, recording its outcome.
    pub async fn guard<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.try_acquire() {
            debug!(breaker = %self.name, "Circuit open, rejecting call");
            return Err(CircuitError::Open);
        }
        match operation().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(CircuitError::Inner(e))
            }
        }
    }

    /// Decides whether a call may proceed, moving Open → HalfOpen once the
    /// open duration has passed.
    pub fn try_acquire(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let expired = inner
                    .last_failure
                    .is_none_or(|at| at.elapsed() > self.config.open_duration);
                if expired {
                    inner.state = CircuitState::HalfOpen;
                    inner.success_count = 0;
                    info!(breaker = %self.name, "Circuit breaker half-open, allowing trial call");
                }
                expired
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => inner.failure_count = 0,
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.half_open_success_target {
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    info!(breaker = %self.name, "Circuit breaker recovered, closed");
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure = Some(Instant::now());
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.success_count = 0;
                warn!(breaker = %self.name, "Trial call failed in half-open, circuit open again");
            }
            CircuitState::Closed if inner.failure_count >= self.config.failure_threshold.max(1) => {
                inner.state = CircuitState::Open;
                error!(
                    breaker = %self.name,
                    failures = inner.failure_count,
                    "Failure threshold reached, circuit open"
                );
            }
            _ => {}
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn breaker(failure_threshold: u32, open_ms: u64, successes: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold,
                open_duration: Duration::from_millis(open_ms),
                half_open_success_target: successes,
            },
        )
    }

    async fn fail(cb: &CircuitBreaker) -> Result<(), CircuitError<&'static str>> {
        cb.guard(|| async { Err::<(), _>("down") }).await
    }

    async fn succeed(cb: &CircuitBreaker) -> Result<(), CircuitError<&'static str>> {
        cb.guard(|| async { Ok::<_, &'static str>(()) }).await
    }

    #[tokio::test]
    async fn test_initial_state_is_closed() {
        let cb = breaker(3, 1000, 2);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(succeed(&cb).await.is_ok());
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_opens_after_threshold_and_fails_fast() {
        for threshold in 1..=5 {
            let cb = breaker(threshold, 60_000, 2);
            for _ in 0..threshold {
                assert!(matches!(fail(&cb).await, Err(CircuitError::Inner("down"))));
            }
            assert_eq!(cb.state(), CircuitState::Open);

            let invoked = AtomicU32::new(0);
            let counter = &invoked;
            let result = cb
                .guard(move || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, &str>(())
                })
                .await;
            assert!(matches!(result, Err(CircuitError::Open)));
            assert_eq!(invoked.load(Ordering::SeqCst), 0);
        }
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let cb = breaker(3, 60_000, 2);
        let _ = fail(&cb).await;
        let _ = fail(&cb).await;
        assert_eq!(cb.snapshot().failure_count, 2);

        succeed(&cb).await.unwrap();
        assert_eq!(cb.snapshot().failure_count, 0);

        let _ = fail(&cb).await;
        let _ = fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_after_open_duration() {
        let cb = breaker(1, 100, 2);
        let _ = fail(&cb).await;
        assert!(matches!(succeed(&cb).await, Err(CircuitError::Open)));

        tokio::time::advance(Duration::from_millis(101)).await;

        assert!(cb.try_acquire());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stays_open_before_duration_elapses() {
        let cb = breaker(1, 100, 2);
        let _ = fail(&cb).await;

        tokio::time::advance(Duration::from_millis(50)).await;
        assert!(!cb.try_acquire());
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_closes_after_success_target() {
        let cb = breaker(2, 100, 3);
        let _ = fail(&cb).await;
        let _ = fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_millis(150)).await;

        succeed(&cb).await.unwrap();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        succeed(&cb).await.unwrap();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        succeed(&cb).await.unwrap();

        let snapshot = cb.snapshot();
        assert_eq!(snapshot.state, CircuitState::Closed);
        assert_eq!(snapshot.failure_count, 0);
        assert_eq!(snapshot.success_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let cb = breaker(1, 100, 3);
        let _ = fail(&cb).await;
        tokio::time::advance(Duration::from_millis(150)).await;

        succeed(&cb).await.unwrap();
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        assert!(matches!(fail(&cb).await, Err(CircuitError::Inner(_))));
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(matches!(succeed(&cb).await, Err(CircuitError::Open)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_never_skips_half_open() {
        let cb = breaker(1, 100, 1);
        let _ = fail(&cb).await;
        tokio::time::advance(Duration::from_millis(150)).await;

        // The state only moves when a call arrives.
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.try_acquire());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_zero_threshold_opens_on_first_failure() {
        let cb = breaker(0, 1000, 1);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_state_display_and_serialization() {
        assert_eq!(CircuitState::HalfOpen.to_string(), "half_open");
        assert_eq!(
            serde_json::to_string(&CircuitState::Open).unwrap(),
            "\"open\""
        );
    }

    #[test]
    fn test_thread_safety() {
        let cb = Arc::new(breaker(5, 60_000, 2));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cb = Arc::clone(&cb);
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        if cb.try_acquire() {
                            if i % 2 == 0 {
                                cb.record_success();
                            } else {
                                cb.record_failure();
                            }
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let state = cb.state();
        assert!(matches!(
            state,
            CircuitState::Closed | CircuitState::Open | CircuitState::HalfOpen
        ));
    }
}
