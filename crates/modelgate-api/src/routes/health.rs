//! Liveness endpoints

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// Configured providers
    pub providers: usize,
    /// Providers the router would currently consider
    pub eligible_providers: usize,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    metrics::counter!("modelgate_health_checks_total").increment(1);

    let eligible = state
        .health
        .snapshot_all()
        .iter()
        .filter(|s| s.eligible)
        .count();

    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        providers: state.registry.len(),
        eligible_providers: eligible,
    })
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
}
