//! Provider routing and failover
//!
//! - [`registry`]: which providers exist and what they can serve
//! - [`router`]: which provider should take the next attempt
//! - [`health`]: per-provider circuit and rate-limit state
//! - [`failover`]: the dispatch loop tying the above together

pub mod failover;
pub mod health;
pub mod registry;
pub mod router;

use std::time::Duration;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::Capability;

pub use failover::FailoverExecutor;
pub use health::{CircuitState, HealthSnapshot, HealthTracker};
pub use registry::ProviderRegistry;
pub use router::Router;

/// The logical unit of work submitted to the gateway
///
/// Created once by the caller and passed by reference through selection and
/// dispatch; the body is opaque to the core.
#[derive(Debug)]
pub struct RequestEnvelope {
    /// Request id, used for log correlation
    pub id: Uuid,
    /// Capability this request needs
    pub capability: Capability,
    /// Content type of the body, forwarded verbatim
    pub content_type: String,
    /// Opaque request body
    pub body: Bytes,
    /// Overall deadline for the request across all attempts
    pub deadline: Option<Duration>,
    /// Caller-controlled cancellation signal
    pub cancel: CancellationToken,
}

impl RequestEnvelope {
    pub fn new(capability: Capability, content_type: impl Into<String>, body: Bytes) -> Self {
        Self {
            id: Uuid::new_v4(),
            capability,
            content_type: content_type.into(),
            body,
            deadline: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Response handed back to the caller after a successful dispatch
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    /// Provider that served the request
    pub provider: String,
    /// Upstream HTTP status
    pub status: u16,
    /// Upstream content type
    pub content_type: String,
    /// Upstream body, unparsed
    pub body: Bytes,
    /// Providers tried before this response was obtained
    pub attempts: u32,
}

/// Classified result of a single provider attempt, as fed to the
/// [`HealthTracker`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Retryable(RetryReason),
    Fatal(FatalReason),
}

/// Why an attempt failed in a way another provider may recover from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    RateLimited,
    ServerError,
    Timeout,
    Connect,
}

impl std::fmt::Display for RetryReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetryReason::RateLimited => write!(f, "rate limited"),
            RetryReason::ServerError => write!(f, "server error"),
            RetryReason::Timeout => write!(f, "timeout"),
            RetryReason::Connect => write!(f, "connection failed"),
        }
    }
}

/// Why an attempt failed in a way no other provider can recover from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalReason {
    /// Provider rejected our credentials; requires operator intervention
    Unauthorized,
    /// Provider rejected the caller's request; not a provider fault
    InvalidRequest,
}
