//! Management API routes

mod providers;
mod types;

use axum::Router;

use crate::state::AppState;

/// Create management routes
pub fn routes() -> Router<AppState> {
    providers::routes()
}
