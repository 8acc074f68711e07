//! Per-provider health tracking
//!
//! Owns the mutable circuit and rate-limit state for every provider. State
//! is sharded per provider: the outer map takes a short read lock and each
//! slot carries its own mutex, so churn on one provider never blocks
//! decisions about another.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::{debug, info, warn};

use crate::config::{FailoverConfig, ProviderConfig};
use crate::provider::{FatalReason, Outcome, RetryReason};

/// Circuit status gating provider eligibility
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Requests flow normally
    Closed,
    /// Cool-down elapsed; the next attempt probes the provider
    HalfOpen,
    /// Provider is excluded from selection until `reopen_at`
    Open { reopen_at: Instant },
    /// Credential lockout; excluded until an operator resets it
    Disabled,
}

impl CircuitState {
    /// Selection preference class: closed beats half-open
    fn rank(self) -> u8 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::HalfOpen => 1,
            CircuitState::Open { .. } | CircuitState::Disabled => u8::MAX,
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::HalfOpen => write!(f, "half-open"),
            CircuitState::Open { .. } => write!(f, "open"),
            CircuitState::Disabled => write!(f, "disabled"),
        }
    }
}

/// Mutable health state for one provider
#[derive(Debug, Clone)]
struct ProviderHealth {
    circuit: CircuitState,
    consecutive_failures: u32,
    rate_limited_until: Option<Instant>,
    times_opened: u32,
    last_error: Option<String>,
    last_change: DateTime<Utc>,
    total_requests: u64,
    total_failures: u64,
}

impl ProviderHealth {
    fn new() -> Self {
        Self {
            circuit: CircuitState::Closed,
            consecutive_failures: 0,
            rate_limited_until: None,
            times_opened: 0,
            last_error: None,
            last_change: Utc::now(),
            total_requests: 0,
            total_failures: 0,
        }
    }
}

struct ProviderSlot {
    health: Mutex<ProviderHealth>,
    limiter: Arc<Semaphore>,
    max_concurrent: usize,
}

/// Serializable health view for the management API
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub provider: String,
    pub circuit: String,
    pub eligible: bool,
    pub consecutive_failures: u32,
    pub rate_limited: bool,
    pub in_flight: usize,
    pub total_requests: u64,
    pub total_failures: u64,
    pub last_error: Option<String>,
    pub last_change: DateTime<Utc>,
}

/// Tracks success/failure/rate-limit signals per provider and gates
/// selection through [`HealthTracker::is_eligible`]
pub struct HealthTracker {
    slots: RwLock<HashMap<String, Arc<ProviderSlot>>>,
    config: FailoverConfig,
}

impl HealthTracker {
    pub fn new(config: FailoverConfig) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Align tracked state with a new provider set: create slots for new
    /// providers, keep state for surviving ones, drop removed ones.
    pub fn sync(&self, providers: &[ProviderConfig]) {
        let mut slots = self.slots.write();
        let mut next: HashMap<String, Arc<ProviderSlot>> = HashMap::with_capacity(providers.len());

        for provider in providers {
            let slot = match slots.remove(&provider.name) {
                Some(existing) if existing.max_concurrent == provider.max_concurrent => existing,
                Some(existing) => {
                    // Concurrency limit changed; carry the health state over
                    // to a slot with a fresh semaphore
                    let health = existing.health.lock().clone();
                    Arc::new(ProviderSlot {
                        health: Mutex::new(health),
                        limiter: Arc::new(Semaphore::new(provider.max_concurrent)),
                        max_concurrent: provider.max_concurrent,
                    })
                }
                None => {
                    debug!("Tracking health for new provider {}", provider.name);
                    Arc::new(ProviderSlot {
                        health: Mutex::new(ProviderHealth::new()),
                        limiter: Arc::new(Semaphore::new(provider.max_concurrent)),
                        max_concurrent: provider.max_concurrent,
                    })
                }
            };
            next.insert(provider.name.clone(), slot);
        }

        for removed in slots.keys() {
            debug!("Dropping health state for removed provider {}", removed);
        }

        *slots = next;
    }

    fn slot(&self, provider: &str) -> Option<Arc<ProviderSlot>> {
        self.slots.read().get(provider).cloned()
    }

    /// Record the outcome of one dispatch attempt
    pub fn record(&self, provider: &str, outcome: &Outcome) {
        let Some(slot) = self.slot(provider) else {
            // Provider was removed while the attempt was in flight
            return;
        };

        let mut health = slot.health.lock();
        health.total_requests += 1;

        match outcome {
            Outcome::Success => {
                if health.circuit != CircuitState::Closed {
                    info!("Provider {} recovered, closing circuit", provider);
                }
                health.circuit = CircuitState::Closed;
                health.consecutive_failures = 0;
                health.rate_limited_until = None;
                health.times_opened = 0;
                health.last_error = None;
                health.last_change = Utc::now();
            }
            Outcome::Retryable(reason) => {
                health.total_failures += 1;
                health.consecutive_failures += 1;
                health.last_error = Some(reason.to_string());
                health.last_change = Utc::now();

                if *reason == RetryReason::RateLimited {
                    health.rate_limited_until =
                        Some(Instant::now() + self.config.rate_limit_cooldown());
                }

                match health.circuit {
                    CircuitState::HalfOpen => self.open_circuit(provider, &mut health),
                    CircuitState::Closed
                        if health.consecutive_failures >= self.config.failure_threshold =>
                    {
                        self.open_circuit(provider, &mut health)
                    }
                    _ => {}
                }
            }
            Outcome::Fatal(FatalReason::Unauthorized) => {
                health.total_failures += 1;
                health.consecutive_failures += 1;
                health.last_error = Some("credentials rejected".to_string());
                health.circuit = CircuitState::Disabled;
                health.last_change = Utc::now();
                metrics::counter!("modelgate_circuit_opens_total", "provider" => provider.to_string())
                    .increment(1);
                warn!(
                    "Provider {} disabled until operator reset: credentials rejected",
                    provider
                );
            }
            Outcome::Fatal(FatalReason::InvalidRequest) => {
                // Caller error, not a provider fault; leave the circuit alone
            }
        }
    }

    fn open_circuit(&self, provider: &str, health: &mut ProviderHealth) {
        health.times_opened += 1;
        let cooldown = self.cooldown(health.times_opened);
        health.circuit = CircuitState::Open {
            reopen_at: Instant::now() + cooldown,
        };
        health.last_change = Utc::now();
        metrics::counter!("modelgate_circuit_opens_total", "provider" => provider.to_string())
            .increment(1);
        warn!(
            "Provider {} circuit opened for {:?} after {} consecutive failures",
            provider, cooldown, health.consecutive_failures
        );
    }

    /// Cool-down for the nth consecutive open: exponential, capped
    fn cooldown(&self, times_opened: u32) -> Duration {
        let exponent = times_opened.saturating_sub(1).min(16);
        let cooldown = self
            .config
            .open_cooldown()
            .checked_mul(1u32 << exponent)
            .unwrap_or_else(|| self.config.open_cooldown_max());
        cooldown.min(self.config.open_cooldown_max())
    }

    /// Advance an expired open circuit to half-open, then report whether
    /// the provider may be selected right now
    fn eligible_locked(provider: &str, health: &mut ProviderHealth) -> bool {
        if let CircuitState::Open { reopen_at } = health.circuit
            && reopen_at <= Instant::now()
        {
            info!("Provider {} cool-down elapsed, circuit half-open", provider);
            health.circuit = CircuitState::HalfOpen;
            health.last_change = Utc::now();
        }

        match health.circuit {
            CircuitState::Open { .. } | CircuitState::Disabled => false,
            CircuitState::Closed | CircuitState::HalfOpen => health
                .rate_limited_until
                .is_none_or(|until| until <= Instant::now()),
        }
    }

    /// Whether the router may select this provider
    pub fn is_eligible(&self, provider: &str) -> bool {
        let Some(slot) = self.slot(provider) else {
            return false;
        };
        let mut health = slot.health.lock();
        Self::eligible_locked(provider, &mut health)
    }

    /// Selection key for an eligible provider: `(circuit rank, consecutive
    /// failures)`, lower is preferred. `None` means ineligible.
    pub fn selection_key(&self, provider: &str) -> Option<(u8, u32)> {
        let slot = self.slot(provider)?;
        let mut health = slot.health.lock();
        if !Self::eligible_locked(provider, &mut health) {
            return None;
        }
        Some((health.circuit.rank(), health.consecutive_failures))
    }

    /// Try to take a concurrency permit for one dispatch attempt. The permit
    /// releases on drop, on every exit path.
    pub fn try_acquire(&self, provider: &str) -> Option<OwnedSemaphorePermit> {
        let slot = self.slot(provider)?;
        match Arc::clone(&slot.limiter).try_acquire_owned() {
            Ok(permit) => Some(permit),
            Err(TryAcquireError::NoPermits) => {
                debug!("Provider {} concurrency limit reached", provider);
                None
            }
            Err(TryAcquireError::Closed) => None,
        }
    }

    /// Operator intervention: close the circuit and clear failure state
    pub fn reset(&self, provider: &str) -> bool {
        let Some(slot) = self.slot(provider) else {
            return false;
        };
        let mut health = slot.health.lock();
        health.circuit = CircuitState::Closed;
        health.consecutive_failures = 0;
        health.rate_limited_until = None;
        health.times_opened = 0;
        health.last_error = None;
        health.last_change = Utc::now();
        info!("Provider {} circuit reset by operator", provider);
        true
    }

    /// Health view for a single provider
    pub fn get_snapshot(&self, provider: &str) -> Option<HealthSnapshot> {
        let slot = self.slot(provider)?;
        let mut health = slot.health.lock();
        let eligible = Self::eligible_locked(provider, &mut health);
        Some(Self::snapshot_locked(provider, &slot, &health, eligible))
    }

    /// Health views for all tracked providers, ordered by name
    pub fn snapshot_all(&self) -> Vec<HealthSnapshot> {
        let slots: Vec<(String, Arc<ProviderSlot>)> = {
            let map = self.slots.read();
            map.iter().map(|(k, v)| (k.clone(), Arc::clone(v))).collect()
        };

        let mut snapshots: Vec<HealthSnapshot> = slots
            .into_iter()
            .map(|(name, slot)| {
                let mut health = slot.health.lock();
                let eligible = Self::eligible_locked(&name, &mut health);
                Self::snapshot_locked(&name, &slot, &health, eligible)
            })
            .collect();

        snapshots.sort_by(|a, b| a.provider.cmp(&b.provider));
        snapshots
    }

    fn snapshot_locked(
        provider: &str,
        slot: &ProviderSlot,
        health: &ProviderHealth,
        eligible: bool,
    ) -> HealthSnapshot {
        HealthSnapshot {
            provider: provider.to_string(),
            circuit: health.circuit.to_string(),
            eligible,
            consecutive_failures: health.consecutive_failures,
            rate_limited: health
                .rate_limited_until
                .is_some_and(|until| until > Instant::now()),
            in_flight: slot.max_concurrent - slot.limiter.available_permits(),
            total_requests: health.total_requests,
            total_failures: health.total_failures,
            last_error: health.last_error.clone(),
            last_change: health.last_change,
        }
    }
}
