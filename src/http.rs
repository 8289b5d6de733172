//! HTTP Server for Health and Metrics Endpoints
//!
//! Admin endpoints for monitoring, separate from the relay protocol.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};

use crate::metrics::RelayMetrics;
use crate::relay::RelayCore;

/// Shared state for HTTP handlers.
#[derive(Clone)]
pub struct HttpState {
    pub core: Arc<RelayCore>,
    pub metrics: RelayMetrics,
    /// Port of the plaintext relay listener, advertised in the health body.
    pub service_port: u16,
}

/// Liveness payload with load counters. Shared with the in-band health
/// answer the transport listeners serve on the relay ports.
pub fn health_json(core: &RelayCore, service_port: u16) -> serde_json::Value {
    let stats = core.stats();
    serde_json::json!({
        "status": "ok",
        "service": "orgchat-relay",
        "version": env!("CARGO_PKG_VERSION"),
        "port": service_port,
        "connections": stats.connections,
        "rooms": stats.rooms,
    })
}

/// Creates the HTTP router with health and metrics endpoints.
pub fn create_router(state: HttpState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/", get(root_handler))
        .with_state(state)
}

async fn health_handler(State(state): State<HttpState>) -> impl IntoResponse {
    Json(health_json(&state.core, state.service_port))
}

async fn metrics_handler(State(state): State<HttpState>) -> impl IntoResponse {
    // Gauge follows the live room count at scrape time.
    state.metrics.rooms_active.set(state.core.stats().rooms as i64);

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        state.metrics.encode(),
    )
}

async fn root_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "service": "orgchat-relay",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": ["/health", "/metrics"]
    }))
}
