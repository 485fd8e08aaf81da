//! Axum Handlers for the REST API
//!
//! Service health and metrics. Both are documented with `utoipa`.

use axum::{extract::State, response::Json};
use std::sync::Arc;

use crate::{
    models::{HealthResponse, MetricsResponse},
    state::AppState,
};

/// Service health, circuit breaker states and a metrics snapshot.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service health", body = HealthResponse)
    )
)]
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse::new(
        state.environment.clone(),
        vec![
            state.breakers.upstream.snapshot(),
            state.breakers.retrieval.snapshot(),
        ],
        state.metrics.snapshot(),
    ))
}

/// Process-wide counters, error counts and latency statistics.
#[utoipa::path(
    get,
    path = "/metrics",
    responses(
        (status = 200, description = "Metrics snapshot", body = MetricsResponse)
    )
)]
pub async fn metrics(State(state): State<Arc<AppState>>) -> Json<MetricsResponse> {
    Json(state.metrics.snapshot().into())
}
