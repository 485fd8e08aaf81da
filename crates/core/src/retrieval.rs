//! Knowledge-base retrieval seam.

use crate::resilience::{CircuitError, RetryExhausted};
use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RetrievalError {
    #[error("retrieval circuit breaker is open")]
    CircuitOpen,
    #[error("retrieval failed after {attempts} attempt(s): {message}")]
    Exhausted { attempts: u32, message: String },
    #[error("retrieval request failed: {0}")]
    Request(String),
    #[error("retrieval service returned status {0}")]
    Status(u16),
}

impl From<CircuitError<RetryExhausted<RetrievalError>>> for RetrievalError {
    fn from(err: CircuitError<RetryExhausted<RetrievalError>>) -> Self {
        match err {
            CircuitError::Open => RetrievalError::CircuitOpen,
            CircuitError::Inner(exhausted) => RetrievalError::Exhausted {
                attempts: exhausted.attempts,
                message: exhausted.source.to_string(),
            },
        }
    }
}

/// Searches a namespaced knowledge base.
///
/// Implementations return `Ok(None)` when the search succeeded but found
/// nothing relevant, and an error when the search itself could not run.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Retrieval: Send + Sync {
    async fn search(&self, query: &str, namespace: &str) -> Result<Option<String>, RetrievalError>;
}
