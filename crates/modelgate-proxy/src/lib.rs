//! Modelgate upstream transport
//!
//! This crate owns the outbound HTTP leg of the gateway: it delivers an
//! opaque request body to a provider endpoint and hands back the status,
//! content type and body without interpreting either. Classification of
//! the result is the caller's job.

pub mod client;
pub mod error;

pub use client::{HttpTransport, ProviderTransport, TransportReply, TransportRequest};
pub use error::TransportError;
