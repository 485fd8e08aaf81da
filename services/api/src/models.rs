//! API Models
//!
//! Response bodies of the HTTP endpoints, documented with `utoipa`.

use chrono::{DateTime, Utc};
use kbvoice_core::metrics::{LatencyStats, MetricsSnapshot};
use kbvoice_core::resilience::{BreakerSnapshot, CircuitState};
use serde::Serialize;
use std::collections::BTreeMap;
use utoipa::ToSchema;

#[derive(Serialize, ToSchema, Debug, Clone)]
pub struct BreakerStatus {
    #[schema(example = "upstream")]
    pub name: String,
    #[schema(example = "closed")]
    pub state: String,
    pub failure_count: u32,
    pub success_count: u32,
}

impl From<BreakerSnapshot> for BreakerStatus {
    fn from(snapshot: BreakerSnapshot) -> Self {
        Self {
            name: snapshot.name,
            state: snapshot.state.to_string(),
            failure_count: snapshot.failure_count,
            success_count: snapshot.success_count,
        }
    }
}

#[derive(Serialize, ToSchema, Debug, Clone, PartialEq)]
pub struct LatencySummary {
    pub count: usize,
    pub avg_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
}

impl From<LatencyStats> for LatencySummary {
    fn from(stats: LatencyStats) -> Self {
        Self {
            count: stats.count,
            avg_ms: stats.avg_ms,
            min_ms: stats.min_ms,
            max_ms: stats.max_ms,
        }
    }
}

#[derive(Serialize, ToSchema, Debug, Clone)]
pub struct MetricsResponse {
    pub uptime_seconds: f64,
    pub timestamp: DateTime<Utc>,
    pub counters: BTreeMap<String, u64>,
    pub errors: BTreeMap<String, u64>,
    pub latencies: BTreeMap<String, LatencySummary>,
}

impl From<MetricsSnapshot> for MetricsResponse {
    fn from(snapshot: MetricsSnapshot) -> Self {
        Self {
            uptime_seconds: snapshot.uptime_seconds,
            timestamp: snapshot.timestamp,
            counters: snapshot.counters,
            errors: snapshot.errors,
            latencies: snapshot
                .latencies
                .into_iter()
                .map(|(name, stats)| (name, stats.into()))
                .collect(),
        }
    }
}

#[derive(Serialize, ToSchema, Debug, Clone)]
pub struct HealthResponse {
    /// `healthy`, or `degraded` while any circuit breaker is open.
    #[schema(example = "healthy")]
    pub status: String,
    #[schema(example = "dev")]
    pub environment: String,
    pub circuit_breakers: Vec<BreakerStatus>,
    pub metrics: MetricsResponse,
}

impl HealthResponse {
    pub fn new(
        environment: String,
        breakers: Vec<BreakerSnapshot>,
        metrics: MetricsSnapshot,
    ) -> Self {
        let degraded = breakers.iter().any(|b| b.state == CircuitState::Open);
        Self {
            status: if degraded { "degraded" } else { "healthy" }.to_string(),
            environment,
            circuit_breakers: breakers.into_iter().map(BreakerStatus::from).collect(),
            metrics: metrics.into(),
        }
    }
}
