//! Axum Router Configuration
//!
//! HTTP routing for the service: the WebSocket bridge, health and metrics
//! endpoints, and the OpenAPI documentation.

use crate::{
    handlers,
    models::{BreakerStatus, HealthResponse, LatencySummary, MetricsResponse},
    state::AppState,
    ws::ws_handler,
};

use axum::{Router, routing::get};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(handlers::health, handlers::metrics),
    components(
        schemas(HealthResponse, BreakerStatus, MetricsResponse, LatencySummary)
    ),
    tags(
        (name = "Knowledge Voice API", description = "Realtime voice bridge with knowledge-base retrieval")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let api_router = Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route("/ws", get(ws_handler))
        .with_state(app_state);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}
