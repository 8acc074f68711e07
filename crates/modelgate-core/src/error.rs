//! Core error types
//!
//! Every failure the gateway can surface to a caller is one of these
//! variants; raw transport errors never cross this boundary.

use thiserror::Error;

use crate::config::Capability;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("provider {provider} is rate limited")]
    RateLimited { provider: String },

    #[error("provider {provider} returned server error {status}")]
    ServerError { provider: String, status: u16 },

    #[error("provider {provider} timed out")]
    Timeout { provider: String },

    #[error("failed to reach provider {provider}: {message}")]
    Connect { provider: String, message: String },

    #[error("provider {provider} rejected credentials")]
    Unauthorized { provider: String },

    #[error("provider {provider} rejected the request ({status}): {message}")]
    InvalidRequest {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("no provider available for capability {capability}")]
    NoProviderAvailable { capability: Capability },

    #[error("all {attempts} attempts failed, last error: {last}")]
    AttemptsExhausted { attempts: u32, last: Box<CoreError> },

    #[error("request cancelled")]
    Cancelled,

    #[error("provider not found: {name}")]
    ProviderNotFound { name: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl CoreError {
    /// Whether an alternate provider may still be tried after this failure
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::RateLimited { .. }
                | CoreError::ServerError { .. }
                | CoreError::Timeout { .. }
                | CoreError::Connect { .. }
        )
    }
}
