//! Failover executor
//!
//! Dispatches a request to the selected provider, classifies the result and
//! retries alternates on retryable failures, feeding every outcome back into
//! the health tracker. Retries are sequential; the excluded set grows with
//! every attempt so no provider is tried twice for the same request.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use modelgate_proxy::{ProviderTransport, TransportError, TransportReply, TransportRequest};

use crate::config::{FailoverConfig, ProviderConfig};
use crate::error::CoreError;
use crate::provider::router::Router;
use crate::provider::{
    FatalReason, HealthTracker, Outcome, ProviderResponse, RequestEnvelope, RetryReason,
};

/// Longest upstream error body echoed into an error message
const MAX_ERROR_BODY: usize = 256;

/// Result of one guarded dispatch
enum Dispatched {
    Reply(TransportReply),
    Transport(TransportError),
    Cancelled,
}

/// Executes requests against providers with bounded failover
pub struct FailoverExecutor {
    router: Arc<Router>,
    health: Arc<HealthTracker>,
    transport: Arc<dyn ProviderTransport>,
    config: FailoverConfig,
}

impl FailoverExecutor {
    pub fn new(
        router: Arc<Router>,
        health: Arc<HealthTracker>,
        transport: Arc<dyn ProviderTransport>,
        config: FailoverConfig,
    ) -> Self {
        Self {
            router,
            health,
            transport,
            config,
        }
    }

    /// Execute a request, trying up to `max_attempts` distinct providers.
    ///
    /// Returns the first successful reply, or the terminal error once no
    /// further attempt is allowed. The caller's cancellation token and
    /// deadline are honored at every suspension point.
    pub async fn execute(&self, envelope: &RequestEnvelope) -> Result<ProviderResponse, CoreError> {
        let started = Instant::now();
        let mut tried: HashSet<String> = HashSet::new();
        let mut attempts: u32 = 0;
        let mut last_error: Option<CoreError> = None;

        metrics::counter!("modelgate_requests_total", "capability" => envelope.capability.to_string())
            .increment(1);

        while attempts < self.config.max_attempts {
            let selection = match self.router.select(envelope.capability, &tried) {
                Ok(selection) => selection,
                Err(err) => {
                    if let Some(last) = &last_error {
                        warn!(
                            request = %envelope.id,
                            "No further provider available after {} attempts, last error: {}",
                            attempts, last
                        );
                    }
                    return Err(err);
                }
            };

            let provider = selection.provider;
            // Held for exactly this attempt; released on drop at the end of
            // the loop body, including the cancellation paths
            let _permit = selection.permit;

            attempts += 1;
            tried.insert(provider.name.clone());
            metrics::counter!("modelgate_attempts_total", "provider" => provider.name.clone())
                .increment(1);

            debug!(
                request = %envelope.id,
                provider = %provider.name,
                attempt = attempts,
                "Dispatching {} request",
                envelope.capability
            );

            match self.dispatch(&provider, envelope, started).await {
                Dispatched::Cancelled => {
                    // Caller-initiated; never counted against the provider
                    debug!(request = %envelope.id, "Request cancelled during dispatch");
                    return Err(CoreError::Cancelled);
                }
                Dispatched::Transport(err) => {
                    let (reason, error) = classify_transport(&provider.name, err);
                    self.health
                        .record(&provider.name, &Outcome::Retryable(reason));
                    metrics::counter!(
                        "modelgate_attempt_failures_total",
                        "provider" => provider.name.clone()
                    )
                    .increment(1);
                    warn!(
                        request = %envelope.id,
                        provider = %provider.name,
                        "Attempt {} failed: {}",
                        attempts, error
                    );
                    last_error = Some(error);
                }
                Dispatched::Reply(reply) => match classify_status(reply.status) {
                    Classified::Success => {
                        self.health.record(&provider.name, &Outcome::Success);
                        metrics::histogram!("modelgate_request_duration_seconds")
                            .record(started.elapsed().as_secs_f64());
                        if attempts > 1 {
                            info!(
                                request = %envelope.id,
                                provider = %provider.name,
                                "Request served after {} attempts",
                                attempts
                            );
                            metrics::counter!("modelgate_failovers_total").increment(1);
                        }
                        return Ok(ProviderResponse {
                            provider: provider.name,
                            status: reply.status,
                            content_type: reply.content_type,
                            body: reply.body,
                            attempts,
                        });
                    }
                    Classified::Retryable(reason) => {
                        self.health
                            .record(&provider.name, &Outcome::Retryable(reason));
                        metrics::counter!(
                            "modelgate_attempt_failures_total",
                            "provider" => provider.name.clone()
                        )
                        .increment(1);
                        let error = retryable_error(&provider.name, reason, reply.status);
                        warn!(
                            request = %envelope.id,
                            provider = %provider.name,
                            "Attempt {} failed: {}",
                            attempts, error
                        );
                        last_error = Some(error);
                    }
                    Classified::Unauthorized => {
                        self.health
                            .record(&provider.name, &Outcome::Fatal(FatalReason::Unauthorized));
                        return Err(CoreError::Unauthorized {
                            provider: provider.name,
                        });
                    }
                    Classified::InvalidRequest => {
                        // The caller's request was rejected; no health record,
                        // no alternate attempt
                        return Err(CoreError::InvalidRequest {
                            provider: provider.name,
                            status: reply.status,
                            message: truncate_body(&reply.body),
                        });
                    }
                },
            }
        }

        let last = last_error.unwrap_or(CoreError::NoProviderAvailable {
            capability: envelope.capability,
        });
        Err(CoreError::AttemptsExhausted {
            attempts,
            last: Box::new(last),
        })
    }

    /// One dispatch, guarded by the envelope's cancellation token and the
    /// remaining overall deadline. Dropping the transport future aborts the
    /// in-flight HTTP call.
    async fn dispatch(
        &self,
        provider: &ProviderConfig,
        envelope: &RequestEnvelope,
        started: Instant,
    ) -> Dispatched {
        let remaining = envelope
            .deadline
            .map(|deadline| deadline.saturating_sub(started.elapsed()));
        if remaining.is_some_and(|r| r.is_zero()) {
            return Dispatched::Cancelled;
        }

        let request = TransportRequest {
            url: format!(
                "{}{}",
                provider.url.trim_end_matches('/'),
                envelope.capability.endpoint_path()
            ),
            api_key: provider.api_key.clone(),
            content_type: envelope.content_type.clone(),
            body: envelope.body.clone(),
            timeout: self.config.request_timeout(),
        };

        let send = self.transport.send(request);

        match remaining {
            Some(remaining) => {
                tokio::select! {
                    _ = envelope.cancel.cancelled() => Dispatched::Cancelled,
                    _ = tokio::time::sleep(remaining) => Dispatched::Cancelled,
                    result = send => match result {
                        Ok(reply) => Dispatched::Reply(reply),
                        Err(err) => Dispatched::Transport(err),
                    },
                }
            }
            None => {
                tokio::select! {
                    _ = envelope.cancel.cancelled() => Dispatched::Cancelled,
                    result = send => match result {
                        Ok(reply) => Dispatched::Reply(reply),
                        Err(err) => Dispatched::Transport(err),
                    },
                }
            }
        }
    }
}

enum Classified {
    Success,
    Retryable(RetryReason),
    Unauthorized,
    InvalidRequest,
}

fn classify_status(status: u16) -> Classified {
    match status {
        200..=299 => Classified::Success,
        429 => Classified::Retryable(RetryReason::RateLimited),
        401 | 403 => Classified::Unauthorized,
        400..=499 => Classified::InvalidRequest,
        _ => Classified::Retryable(RetryReason::ServerError),
    }
}

fn classify_transport(provider: &str, err: TransportError) -> (RetryReason, CoreError) {
    match err {
        TransportError::Timeout => (
            RetryReason::Timeout,
            CoreError::Timeout {
                provider: provider.to_string(),
            },
        ),
        TransportError::Connect(message) => (
            RetryReason::Connect,
            CoreError::Connect {
                provider: provider.to_string(),
                message,
            },
        ),
        TransportError::Http(message) | TransportError::InvalidUrl(message) => (
            RetryReason::Connect,
            CoreError::Connect {
                provider: provider.to_string(),
                message,
            },
        ),
    }
}

fn retryable_error(provider: &str, reason: RetryReason, status: u16) -> CoreError {
    match reason {
        RetryReason::RateLimited => CoreError::RateLimited {
            provider: provider.to_string(),
        },
        _ => CoreError::ServerError {
            provider: provider.to_string(),
            status,
        },
    }
}

fn truncate_body(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    if text.len() <= MAX_ERROR_BODY {
        return text.into_owned();
    }
    let mut end = MAX_ERROR_BODY;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use bytes::Bytes;
    use tokio_util::sync::CancellationToken;

    use crate::config::Capability;
    use crate::provider::registry::ProviderRegistry;

    /// One scripted transport result for a provider
    enum Scripted {
        Status(u16),
        Body(u16, &'static str),
        Error(TransportError),
        Hang,
    }

    /// Transport that replays scripted results per provider and counts calls
    struct ScriptedTransport {
        scripts: Mutex<std::collections::HashMap<String, VecDeque<Scripted>>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        fn new(scripts: Vec<(&str, Vec<Scripted>)>) -> Self {
            Self {
                scripts: Mutex::new(
                    scripts
                        .into_iter()
                        .map(|(name, replies)| (name.to_string(), replies.into()))
                        .collect(),
                ),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn provider_for(&self, url: &str) -> String {
            // Provider base URLs in tests are https://{name}.test
            let host = url
                .trim_start_matches("https://")
                .split('.')
                .next()
                .unwrap_or_default();
            host.to_string()
        }
    }

    #[async_trait::async_trait]
    impl ProviderTransport for ScriptedTransport {
        async fn send(&self, request: TransportRequest) -> Result<TransportReply, TransportError> {
            let provider = self.provider_for(&request.url);
            self.calls.lock().unwrap().push(provider.clone());

            let next = self
                .scripts
                .lock()
                .unwrap()
                .get_mut(&provider)
                .and_then(|queue| queue.pop_front());

            match next {
                Some(Scripted::Status(status)) => Ok(TransportReply {
                    status,
                    content_type: "application/json".to_string(),
                    body: Bytes::new(),
                }),
                Some(Scripted::Body(status, body)) => Ok(TransportReply {
                    status,
                    content_type: "application/json".to_string(),
                    body: Bytes::from_static(body.as_bytes()),
                }),
                Some(Scripted::Error(err)) => Err(err),
                Some(Scripted::Hang) => {
                    std::future::pending::<()>().await;
                    unreachable!()
                }
                None => Ok(TransportReply {
                    status: 200,
                    content_type: "application/json".to_string(),
                    body: Bytes::new(),
                }),
            }
        }

        async fn probe(
            &self,
            _base_url: &str,
            _api_key: Option<&str>,
            _timeout: Duration,
        ) -> Result<u16, TransportError> {
            Ok(200)
        }
    }

    fn make_provider(name: &str, priority: i32) -> ProviderConfig {
        ProviderConfig {
            name: name.to_string(),
            display_name: None,
            url: format!("https://{}.test", name),
            api_key: Some("sk-test".to_string()),
            capabilities: vec![Capability::Chat],
            max_concurrent: 4,
            priority,
            enabled: true,
        }
    }

    struct Harness {
        executor: FailoverExecutor,
        health: Arc<HealthTracker>,
        transport: Arc<ScriptedTransport>,
    }

    fn make_harness(
        providers: Vec<ProviderConfig>,
        config: FailoverConfig,
        scripts: Vec<(&str, Vec<Scripted>)>,
    ) -> Harness {
        let registry = Arc::new(ProviderRegistry::new(providers.clone()));
        let health = Arc::new(HealthTracker::new(config.clone()));
        health.sync(&providers);
        let router = Arc::new(Router::new(registry, Arc::clone(&health)));
        let transport = Arc::new(ScriptedTransport::new(scripts));
        let executor = FailoverExecutor::new(
            router,
            Arc::clone(&health),
            Arc::clone(&transport) as Arc<dyn ProviderTransport>,
            config,
        );
        Harness {
            executor,
            health,
            transport,
        }
    }

    fn chat_envelope() -> RequestEnvelope {
        RequestEnvelope::new(
            Capability::Chat,
            "application/json",
            Bytes::from_static(b"{}"),
        )
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let harness = make_harness(
            vec![make_provider("alpha", 10)],
            FailoverConfig::default(),
            vec![("alpha", vec![Scripted::Body(200, r#"{"ok":true}"#)])],
        );

        let response = harness.executor.execute(&chat_envelope()).await.unwrap();
        assert_eq!(response.provider, "alpha");
        assert_eq!(response.status, 200);
        assert_eq!(response.attempts, 1);
    }

    #[tokio::test]
    async fn test_fails_over_to_next_provider() {
        let harness = make_harness(
            vec![make_provider("alpha", 10), make_provider("beta", 100)],
            FailoverConfig::default(),
            vec![
                ("alpha", vec![Scripted::Status(500)]),
                ("beta", vec![Scripted::Body(200, r#"{"ok":true}"#)]),
            ],
        );

        let response = harness.executor.execute(&chat_envelope()).await.unwrap();
        assert_eq!(response.provider, "beta");
        assert_eq!(response.attempts, 2);
        assert_eq!(harness.transport.calls(), vec!["alpha", "beta"]);
    }

    #[tokio::test]
    async fn test_two_rate_limited_then_success() {
        // Three providers, first two return 429, third serves the payload
        let harness = make_harness(
            vec![
                make_provider("alpha", 10),
                make_provider("beta", 20),
                make_provider("gamma", 30),
            ],
            FailoverConfig::default(),
            vec![
                ("alpha", vec![Scripted::Status(429)]),
                ("beta", vec![Scripted::Status(429)]),
                ("gamma", vec![Scripted::Body(200, r#"{"payload":"P"}"#)]),
            ],
        );

        let response = harness.executor.execute(&chat_envelope()).await.unwrap();
        assert_eq!(response.provider, "gamma");
        assert_eq!(response.attempts, 3);
        assert_eq!(response.body, Bytes::from_static(br#"{"payload":"P"}"#));
        assert_eq!(harness.transport.calls(), vec!["alpha", "beta", "gamma"]);
    }

    #[tokio::test]
    async fn test_rate_limited_provider_not_retried_for_same_request() {
        // A single provider that answers 429 is excluded for the remainder
        // of the request, even though attempts remain
        let harness = make_harness(
            vec![make_provider("alpha", 10)],
            FailoverConfig::default(),
            vec![("alpha", vec![Scripted::Status(429), Scripted::Status(200)])],
        );

        let result = harness.executor.execute(&chat_envelope()).await;
        assert!(matches!(
            result,
            Err(CoreError::NoProviderAvailable { .. })
        ));
        assert_eq!(harness.transport.calls(), vec!["alpha"]);
    }

    #[tokio::test]
    async fn test_unauthorized_makes_exactly_one_attempt() {
        let harness = make_harness(
            vec![make_provider("alpha", 10), make_provider("beta", 100)],
            FailoverConfig::default(),
            vec![
                ("alpha", vec![Scripted::Status(401)]),
                ("beta", vec![Scripted::Status(200)]),
            ],
        );

        let result = harness.executor.execute(&chat_envelope()).await;
        assert!(matches!(result, Err(CoreError::Unauthorized { .. })));
        assert_eq!(harness.transport.calls(), vec!["alpha"]);

        // Credential lockout persists until operator reset
        assert!(!harness.health.is_eligible("alpha"));
        assert_eq!(
            harness.health.get_snapshot("alpha").unwrap().circuit,
            "disabled"
        );
    }

    #[tokio::test]
    async fn test_invalid_request_passes_through_without_health_record() {
        let harness = make_harness(
            vec![make_provider("alpha", 10), make_provider("beta", 100)],
            FailoverConfig::default(),
            vec![(
                "alpha",
                vec![Scripted::Body(400, r#"{"error":"bad model"}"#)],
            )],
        );

        let result = harness.executor.execute(&chat_envelope()).await;
        match result {
            Err(CoreError::InvalidRequest {
                provider, status, ..
            }) => {
                assert_eq!(provider, "alpha");
                assert_eq!(status, 400);
            }
            other => panic!("unexpected result: {:?}", other.err()),
        }

        // The caller's bad request is not held against the provider
        let snapshot = harness.health.get_snapshot("alpha").unwrap();
        assert_eq!(snapshot.consecutive_failures, 0);
        assert!(harness.health.is_eligible("alpha"));
    }

    #[tokio::test]
    async fn test_attempts_exhausted_carries_last_error() {
        let harness = make_harness(
            vec![
                make_provider("alpha", 10),
                make_provider("beta", 20),
                make_provider("gamma", 30),
                make_provider("delta", 40),
            ],
            FailoverConfig::default(),
            vec![
                ("alpha", vec![Scripted::Status(500)]),
                ("beta", vec![Scripted::Status(503)]),
                ("gamma", vec![Scripted::Status(502)]),
            ],
        );

        let result = harness.executor.execute(&chat_envelope()).await;
        match result {
            Err(CoreError::AttemptsExhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert!(matches!(
                    *last,
                    CoreError::ServerError { status: 502, .. }
                ));
            }
            other => panic!("unexpected result: {:?}", other.err()),
        }
        // The fourth provider is never touched once max_attempts is reached
        assert_eq!(harness.transport.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_transport_errors_are_retryable() {
        let harness = make_harness(
            vec![make_provider("alpha", 10), make_provider("beta", 100)],
            FailoverConfig::default(),
            vec![
                ("alpha", vec![Scripted::Error(TransportError::Timeout)]),
                ("beta", vec![Scripted::Status(200)]),
            ],
        );

        let response = harness.executor.execute(&chat_envelope()).await.unwrap();
        assert_eq!(response.provider, "beta");
        assert_eq!(response.attempts, 2);
    }

    #[tokio::test]
    async fn test_cancellation_yields_cancelled_without_health_record() {
        let harness = make_harness(
            vec![make_provider("alpha", 10)],
            FailoverConfig::default(),
            vec![("alpha", vec![Scripted::Hang])],
        );

        let cancel = CancellationToken::new();
        let envelope = chat_envelope().with_cancel(cancel.clone());

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result = harness.executor.execute(&envelope).await;
        assert!(matches!(result, Err(CoreError::Cancelled)));

        // The in-flight attempt leaves no trace in the health table
        let snapshot = harness.health.get_snapshot("alpha").unwrap();
        assert_eq!(snapshot.total_requests, 0);
        assert_eq!(snapshot.in_flight, 0);
    }

    #[tokio::test]
    async fn test_deadline_bounds_the_request() {
        let harness = make_harness(
            vec![make_provider("alpha", 10)],
            FailoverConfig::default(),
            vec![("alpha", vec![Scripted::Hang])],
        );

        let envelope = chat_envelope().with_deadline(Duration::from_millis(50));

        let started = Instant::now();
        let result = harness.executor.execute(&envelope).await;
        assert!(matches!(result, Err(CoreError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_circuit_open_excludes_provider_from_later_requests() {
        let config = FailoverConfig {
            failure_threshold: 2,
            open_cooldown_secs: 60,
            max_attempts: 1,
            ..Default::default()
        };
        let harness = make_harness(
            vec![make_provider("alpha", 10)],
            config,
            vec![(
                "alpha",
                vec![Scripted::Status(500), Scripted::Status(500)],
            )],
        );

        for _ in 0..2 {
            let result = harness.executor.execute(&chat_envelope()).await;
            assert!(result.is_err());
        }
        assert_eq!(harness.transport.calls().len(), 2);

        // Circuit is open now; the next request never reaches the transport
        let result = harness.executor.execute(&chat_envelope()).await;
        assert!(matches!(
            result,
            Err(CoreError::NoProviderAvailable { .. })
        ));
        assert_eq!(harness.transport.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_saturated_provider_is_skipped() {
        let mut alpha = make_provider("alpha", 10);
        alpha.max_concurrent = 1;
        let harness = make_harness(
            vec![alpha, make_provider("beta", 100)],
            FailoverConfig::default(),
            vec![("beta", vec![Scripted::Status(200)])],
        );

        // Hold alpha's only permit so selection falls through to beta
        let _permit = harness.health.try_acquire("alpha").unwrap();

        let response = harness.executor.execute(&chat_envelope()).await.unwrap();
        assert_eq!(response.provider, "beta");
        assert_eq!(harness.transport.calls(), vec!["beta"]);
    }
}
