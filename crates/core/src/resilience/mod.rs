//! Resilience primitives shared by every remote dependency of the bridge.
//!
//! - `retry`: bounded exponential backoff around a fallible async operation.
//! - `circuit_breaker`: a three-state gate that fails fast while a dependency
//!   is known to be unhealthy.
//!
//! The two compose as `breaker.guard(|| policy.execute(op))`, so one exhausted
//! retry sequence counts as a single breaker failure.

pub mod circuit_breaker;
pub mod retry;

pub use circuit_breaker::{
    BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig, CircuitError, CircuitState,
};
pub use retry::{RetryExhausted, RetryPolicy};
