//! Provider transport client

use std::time::Duration;

use bytes::Bytes;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use tracing::debug;

use crate::error::TransportError;

/// A single outbound dispatch: everything the transport needs to deliver
/// one request body to one provider endpoint.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    /// Fully resolved endpoint URL
    pub url: String,
    /// Bearer credential, if the provider requires one
    pub api_key: Option<String>,
    /// Content type of the body, forwarded verbatim
    pub content_type: String,
    /// Opaque request body
    pub body: Bytes,
    /// Per-attempt timeout
    pub timeout: Duration,
}

/// Raw reply from a provider. Non-2xx statuses are replies, not errors;
/// only failures to obtain a status at all surface as [`TransportError`].
#[derive(Debug, Clone)]
pub struct TransportReply {
    pub status: u16,
    pub content_type: String,
    pub body: Bytes,
}

/// Outbound transport contract.
#[async_trait::async_trait]
pub trait ProviderTransport: Send + Sync {
    /// Deliver a request body and return the provider's reply.
    async fn send(&self, request: TransportRequest) -> Result<TransportReply, TransportError>;

    /// Probe a provider base URL for reachability. Returns the HTTP status
    /// of the model-listing endpoint.
    async fn probe(
        &self,
        base_url: &str,
        api_key: Option<&str>,
        timeout: Duration,
    ) -> Result<u16, TransportError>;
}

/// reqwest-backed transport shared by all providers
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Create a new transport with a shared connection pool
    pub fn new() -> Result<Self, TransportError> {
        let client = Client::builder()
            .user_agent(concat!("modelgate/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client })
    }
}

/// Build the reachability-probe URL for a provider base address
fn probe_url(base_url: &str) -> String {
    format!("{}/v1/models", base_url.trim_end_matches('/'))
}

#[async_trait::async_trait]
impl ProviderTransport for HttpTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportReply, TransportError> {
        debug!("Dispatching to {}", request.url);

        let mut builder = self
            .client
            .post(&request.url)
            .header(CONTENT_TYPE, &request.content_type)
            .timeout(request.timeout)
            .body(request.body);

        if let Some(key) = &request.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|h| h.to_str().ok())
            .unwrap_or("application/json")
            .to_string();

        let body = response.bytes().await?;

        Ok(TransportReply {
            status,
            content_type,
            body,
        })
    }

    async fn probe(
        &self,
        base_url: &str,
        api_key: Option<&str>,
        timeout: Duration,
    ) -> Result<u16, TransportError> {
        let url = probe_url(base_url);
        debug!("Probing {}", url);

        let mut builder = self.client.get(&url).timeout(timeout);
        if let Some(key) = api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        Ok(response.status().as_u16())
    }
}
