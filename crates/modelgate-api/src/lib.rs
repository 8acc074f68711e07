//! Modelgate REST API
//!
//! This crate provides the Axum-based HTTP API for Modelgate,
//! implementing both the OpenAI-compatible data plane and the
//! provider management API.

pub mod error;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::create_router;
pub use state::{AppState, MetricsHandle};
