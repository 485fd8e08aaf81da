//! Shared Application State
//!
//! `AppState` is built once at startup and shared by every session. The two
//! circuit breakers and the metrics registry live here for the life of the
//! process; nothing else is shared between sessions.

use crate::config::{Config, ResilienceConfig};
use crate::ws::upstream::{UpstreamConnector, UpstreamEndpoint};
use kbvoice_core::resilience::{CircuitBreaker, CircuitBreakerConfig};
use kbvoice_core::{
    ConversationRecorder, Metrics, Pricing, Retrieval, SessionProfile, ToolCallInterceptor,
};
use std::sync::Arc;
use std::time::Duration;

/// Per-session limits.
#[derive(Clone, Debug)]
pub struct SessionSettings {
    pub default_kb_id: String,
    pub client_init_timeout: Duration,
    pub send_timeout: Duration,
    pub max_upstream_reconnects: u32,
}

/// The process-wide circuit breakers.
#[derive(Clone, Debug)]
pub struct Breakers {
    pub upstream: Arc<CircuitBreaker>,
    pub retrieval: Arc<CircuitBreaker>,
}

impl Breakers {
    pub fn from_config(config: &ResilienceConfig) -> Self {
        Self {
            upstream: Arc::new(CircuitBreaker::new(
                "upstream",
                CircuitBreakerConfig {
                    failure_threshold: config.upstream_failure_threshold,
                    open_duration: config.upstream_open_duration,
                    half_open_success_target: config.half_open_successes,
                },
            )),
            retrieval: Arc::new(CircuitBreaker::new(
                "retrieval",
                CircuitBreakerConfig {
                    failure_threshold: config.retrieval_failure_threshold,
                    open_duration: config.retrieval_open_duration,
                    half_open_success_target: config.half_open_successes,
                },
            )),
        }
    }
}

/// The shared application state, created once at startup and passed to all handlers.
pub struct AppState {
    pub environment: String,
    pub session: SessionSettings,
    pub connector: UpstreamConnector,
    pub interceptor: ToolCallInterceptor,
    pub recorder: Arc<dyn ConversationRecorder>,
    pub profile: SessionProfile,
    pub pricing: Pricing,
    pub metrics: Arc<Metrics>,
    pub breakers: Breakers,
}

impl AppState {
    pub fn new(
        config: &Config,
        breakers: Breakers,
        metrics: Arc<Metrics>,
        retrieval: Arc<dyn Retrieval>,
        recorder: Arc<dyn ConversationRecorder>,
        profile: SessionProfile,
    ) -> Self {
        let connector = UpstreamConnector::new(
            UpstreamEndpoint::from_config(&config.upstream),
            config.upstream.connect_timeout,
            config.resilience.retry_policy(),
            breakers.upstream.clone(),
            metrics.clone(),
        );
        Self {
            environment: config.environment.clone(),
            session: SessionSettings {
                default_kb_id: config.session.default_kb_id.clone(),
                client_init_timeout: config.session.client_init_timeout,
                send_timeout: config.upstream.send_timeout,
                max_upstream_reconnects: config.session.max_upstream_reconnects,
            },
            connector,
            interceptor: ToolCallInterceptor::new(retrieval, metrics.clone()),
            recorder,
            profile,
            pricing: Pricing::default(),
            metrics,
            breakers,
        }
    }
}
