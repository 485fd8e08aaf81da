//! Error types of the WebSocket bridge.

use axum::extract::ws::close_code;
use kbvoice_core::resilience::{CircuitError, RetryExhausted};
use std::time::Duration;

/// Failure of a single upstream connect attempt.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("upstream connection timed out after {0:?}")]
    Timeout(Duration),
    #[error("upstream connection refused: {0}")]
    Refused(String),
}

impl ConnectError {
    /// Error counter name for this failure kind.
    pub fn metric(&self) -> &'static str {
        match self {
            ConnectError::Timeout(_) => "upstream_timeout",
            ConnectError::Refused(_) => "upstream_connection_failed",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Connection timeout")]
    HandshakeTimeout,
    #[error("Invalid init message: {0}")]
    InvalidInit(String),
    #[error("Upstream connection failed: circuit breaker is open")]
    CircuitOpen,
    #[error("Upstream connection failed after {attempts} attempt(s): {source}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: ConnectError,
    },
    #[error("Upstream send timed out")]
    SendTimeout,
    #[error("Upstream disconnected")]
    UpstreamDisconnected,
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<CircuitError<RetryExhausted<ConnectError>>> for BridgeError {
    fn from(err: CircuitError<RetryExhausted<ConnectError>>) -> Self {
        match err {
            CircuitError::Open => BridgeError::CircuitOpen,
            CircuitError::Inner(exhausted) => BridgeError::RetryExhausted {
                attempts: exhausted.attempts,
                source: exhausted.source,
            },
        }
    }
}

impl BridgeError {
    /// Close code sent to the client after the error frame.
    pub fn close_code(&self) -> u16 {
        match self {
            BridgeError::CircuitOpen | BridgeError::RetryExhausted { .. } => close_code::AGAIN,
            _ => close_code::ERROR,
        }
    }
}
