//! API routes

mod gateway;
mod health;
mod management;
pub mod metrics;

use std::sync::Arc;

use axum::{Router, extract::DefaultBodyLimit};

use crate::state::{AppState, MetricsHandle};

/// Audio uploads dominate body sizes; 100 MB covers the transcription
/// payloads the upstream APIs themselves accept
const MAX_BODY_BYTES: usize = 100 * 1024 * 1024;

/// Assemble the full application router: data plane, management plane,
/// liveness, and (when a recorder is installed) the metrics endpoint
pub fn create_router(state: AppState, metrics_handle: Option<Arc<MetricsHandle>>) -> Router {
    let mut router = Router::new()
        .merge(health::routes())
        .merge(gateway::routes())
        .merge(management::routes())
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES));

    if let Some(handle) = metrics_handle {
        router = router.merge(metrics::routes(handle));
    }

    router
}
