//! Process-wide counters, error tallies and latency samples.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

/// Latency samples kept per operation.
const LATENCY_WINDOW: usize = 100;

#[derive(Debug)]
pub struct Metrics {
    started: Instant,
    counters: DashMap<String, u64>,
    errors: DashMap<String, u64>,
    latencies: DashMap<String, VecDeque<f64>>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            counters: DashMap::new(),
            errors: DashMap::new(),
            latencies: DashMap::new(),
        }
    }

    pub fn increment(&self, name: &str) {
        *self.counters.entry(name.to_string()).or_insert(0) += 1;
    }

    /// Counts an error of `kind`, and bumps the `total_errors` counter.
    pub fn record_error(&self, kind: &str) {
        *self.errors.entry(kind.to_string()).or_insert(0) += 1;
        self.increment("total_errors");
    }

    pub fn record_latency(&self, operation: &str, elapsed: Duration) {
        let mut samples = self.latencies.entry(operation.to_string()).or_default();
        if samples.len() == LATENCY_WINDOW {
            samples.pop_front();
        }
        samples.push_back(elapsed.as_secs_f64() * 1000.0);
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).map(|v| *v).unwrap_or(0)
    }

    pub fn error_count(&self, kind: &str) -> u64 {
        self.errors.get(kind).map(|v| *v).unwrap_or(0)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let latencies = self
            .latencies
            .iter()
            .filter(|entry| !entry.value().is_empty())
            .map(|entry| {
                let samples = entry.value();
                let count = samples.len();
                let sum: f64 = samples.iter().sum();
                let min = samples.iter().copied().fold(f64::INFINITY, f64::min);
                let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                (
                    entry.key().clone(),
                    LatencyStats {
                        count,
                        avg_ms: sum / count as f64,
                        min_ms: min,
                        max_ms: max,
                    },
                )
            })
            .collect();

        MetricsSnapshot {
            uptime_seconds: self.started.elapsed().as_secs_f64(),
            timestamp: Utc::now(),
            counters: collect(&self.counters),
            errors: collect(&self.errors),
            latencies,
        }
    }
}

fn collect(map: &DashMap<String, u64>) -> BTreeMap<String, u64> {
    map.iter().map(|e| (e.key().clone(), *e.value())).collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatencyStats {
    pub count: usize,
    pub avg_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_seconds: f64,
    pub timestamp: DateTime<Utc>,
    pub counters: BTreeMap<String, u64>,
    pub errors: BTreeMap<String, u64>,
    pub latencies: BTreeMap<String, LatencyStats>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_counters_and_errors() {
        let metrics = Metrics::new();
        metrics.increment("upstream_connections");
        metrics.increment("upstream_connections");
        metrics.record_error("rag_search_failed");

        assert_eq!(metrics.counter("upstream_connections"), 2);
        assert_eq!(metrics.counter("missing"), 0);
        assert_eq!(metrics.error_count("rag_search_failed"), 1);
        assert_eq!(metrics.counter("total_errors"), 1);
    }

    #[test]
    fn test_latency_window_keeps_last_samples() {
        let metrics = Metrics::new();
        for ms in 0..150u64 {
            metrics.record_latency("rag_search", Duration::from_millis(ms));
        }

        let snapshot = metrics.snapshot();
        let stats = &snapshot.latencies["rag_search"];
        assert_eq!(stats.count, LATENCY_WINDOW);
        assert_eq!(stats.min_ms, 50.0);
        assert_eq!(stats.max_ms, 149.0);
    }

    #[test]
    fn test_concurrent_increments() {
        let metrics = Arc::new(Metrics::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let metrics = metrics.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        metrics.increment("frames");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(metrics.counter("frames"), 8000);
    }
}
