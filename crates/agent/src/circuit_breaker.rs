//! Per-endpoint failure isolation.
//!
//! Each [`CircuitBreaker`] owns the state of exactly one [`Endpoint`] behind
//! its own mutex, so concurrent turns reporting against different endpoints
//! never contend. Transitions follow a fixed state machine:
//!
//! - `Closed`: calls pass; `failure_threshold` consecutive failures open it.
//! - `Open`: calls fail fast. Once `reset_timeout` has elapsed since the last
//!   failure, the next caller is admitted as a trial (`HalfOpen`).
//! - `HalfOpen`: one trial in flight at a time. Any failure reopens;
//!   `half_open_trial_count` consecutive successes close.
//!
//! The `Open -> HalfOpen` edge is evaluated lazily on [`CircuitBreaker::try_acquire`].

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use concierge_core::capability::Endpoint;
use concierge_core::config::{BreakerSettings, CircuitBreakerConfig};
use concierge_core::errors::CapabilityError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of one breaker, for health reporting.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CircuitSnapshot {
    pub endpoint: Endpoint,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub half_open_successes: u32,
    pub trial_in_flight: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub millis_since_last_failure: Option<u64>,
}

#[derive(Debug)]
struct CircuitCounters {
    state: CircuitState,
    consecutive_failures: u32,
    half_open_successes: u32,
    last_failure_at: Option<Instant>,
    trial_in_flight: bool,
    // Bumped on every state change; reports from permits issued under an
    // older generation are discarded.
    generation: u64,
}

impl CircuitCounters {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            half_open_successes: 0,
            last_failure_at: None,
            trial_in_flight: false,
            generation: 0,
        }
    }

    fn transition(&mut self, to: CircuitState) {
        self.state = to;
        self.generation += 1;
        self.trial_in_flight = false;
    }
}

#[derive(Debug)]
pub struct CircuitBreaker {
    endpoint: Endpoint,
    settings: BreakerSettings,
    counters: Mutex<CircuitCounters>,
}

impl CircuitBreaker {
    pub fn new(endpoint: Endpoint, settings: BreakerSettings) -> Self {
        Self { endpoint, settings, counters: Mutex::new(CircuitCounters::closed()) }
    }

    pub fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    pub fn settings(&self) -> BreakerSettings {
        self.settings
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    fn lock(&self) -> MutexGuard<'_, CircuitCounters> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admits a call or refuses it without touching the network.
    pub fn try_acquire(&self) -> Result<CallPermit<'_>, CapabilityError> {
        let mut counters = self.lock();
        match counters.state {
            CircuitState::Closed => Ok(self.permit(counters.generation, false)),
            CircuitState::Open => {
                let elapsed_enough = counters
                    .last_failure_at
                    .map(|at| at.elapsed() > self.settings.reset_timeout())
                    .unwrap_or(true);
                if !elapsed_enough {
                    return Err(CapabilityError::CircuitOpen { endpoint: self.endpoint });
                }

                counters.transition(CircuitState::HalfOpen);
                counters.half_open_successes = 0;
                counters.trial_in_flight = true;
                info!(
                    event_name = "circuit.half_open",
                    endpoint = %self.endpoint,
                    "reset timeout elapsed, admitting trial call"
                );
                Ok(self.permit(counters.generation, true))
            }
            CircuitState::HalfOpen => {
                if counters.trial_in_flight {
                    return Err(CapabilityError::CircuitOpen { endpoint: self.endpoint });
                }
                counters.trial_in_flight = true;
                Ok(self.permit(counters.generation, true))
            }
        }
    }

    fn permit(&self, generation: u64, trial: bool) -> CallPermit<'_> {
        CallPermit { breaker: self, generation, trial, settled: false }
    }

    fn record_success(&self, generation: u64) {
        let mut counters = self.lock();
        if counters.generation != generation {
            debug!(
                event_name = "circuit.stale_report_ignored",
                endpoint = %self.endpoint,
                outcome = "success",
                "discarding result reported under a previous breaker state"
            );
            return;
        }

        match counters.state {
            CircuitState::Closed => counters.consecutive_failures = 0,
            CircuitState::HalfOpen => {
                counters.trial_in_flight = false;
                counters.half_open_successes += 1;
                if counters.half_open_successes >= self.settings.half_open_trial_count {
                    counters.transition(CircuitState::Closed);
                    counters.consecutive_failures = 0;
                    counters.half_open_successes = 0;
                    info!(
                        event_name = "circuit.closed",
                        endpoint = %self.endpoint,
                        "endpoint recovered"
                    );
                }
            }
            CircuitState::Open => {}
        }
    }

    fn record_failure(&self, generation: u64) {
        let mut counters = self.lock();
        if counters.generation != generation {
            debug!(
                event_name = "circuit.stale_report_ignored",
                endpoint = %self.endpoint,
                outcome = "failure",
                "discarding result reported under a previous breaker state"
            );
            return;
        }

        match counters.state {
            CircuitState::Closed => {
                counters.consecutive_failures += 1;
                counters.last_failure_at = Some(Instant::now());
                if counters.consecutive_failures >= self.settings.failure_threshold {
                    counters.transition(CircuitState::Open);
                    warn!(
                        event_name = "circuit.opened",
                        endpoint = %self.endpoint,
                        consecutive_failures = counters.consecutive_failures,
                        reset_timeout_secs = self.settings.reset_timeout_secs,
                        "failure threshold reached"
                    );
                }
            }
            CircuitState::HalfOpen => {
                counters.last_failure_at = Some(Instant::now());
                counters.half_open_successes = 0;
                counters.transition(CircuitState::Open);
                warn!(
                    event_name = "circuit.opened",
                    endpoint = %self.endpoint,
                    "trial call failed, reopening"
                );
            }
            CircuitState::Open => {}
        }
    }

    fn release_trial(&self, generation: u64) {
        let mut counters = self.lock();
        if counters.generation == generation && counters.state == CircuitState::HalfOpen {
            counters.trial_in_flight = false;
        }
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let counters = self.lock();
        CircuitSnapshot {
            endpoint: self.endpoint,
            state: counters.state,
            consecutive_failures: counters.consecutive_failures,
            half_open_successes: counters.half_open_successes,
            trial_in_flight: counters.trial_in_flight,
            millis_since_last_failure: counters
                .last_failure_at
                .map(|at| u64::try_from(at.elapsed().as_millis()).unwrap_or(u64::MAX)),
        }
    }
}

/// Admission ticket for one call. Consume it with [`CallPermit::succeed`] or
/// [`CallPermit::fail`]; dropping it unsettled (a cancelled call) frees the
/// half-open trial slot without counting either way.
#[must_use = "a permit must be settled with succeed() or fail()"]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    trial: bool,
    settled: bool,
}

impl CallPermit<'_> {
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn succeed(mut self) {
        self.settled = true;
        self.breaker.record_success(self.generation);
    }

    pub fn fail(mut self) {
        self.settled = true;
        self.breaker.record_failure(self.generation);
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.trial {
            self.breaker.release_trial(self.generation);
        }
    }
}

/// One breaker per endpoint, built once at startup and never resized.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    breakers: [Arc<CircuitBreaker>; 5],
}

impl CircuitBreakerRegistry {
    pub fn from_config(config: &CircuitBreakerConfig) -> Self {
        Self {
            breakers: Endpoint::ALL.map(|endpoint| {
                Arc::new(CircuitBreaker::new(endpoint, config.settings_for(endpoint)))
            }),
        }
    }

    pub fn uniform(settings: BreakerSettings) -> Self {
        Self {
            breakers: Endpoint::ALL
                .map(|endpoint| Arc::new(CircuitBreaker::new(endpoint, settings))),
        }
    }

    pub fn breaker(&self, endpoint: Endpoint) -> &Arc<CircuitBreaker> {
        let slot = match endpoint {
            Endpoint::OrderLookup => 0,
            Endpoint::RefundInitiate => 1,
            Endpoint::Generate => 2,
            Endpoint::Escalate => 3,
            Endpoint::ConversationAppend => 4,
        };
        &self.breakers[slot]
    }

    pub fn snapshots(&self) -> Vec<CircuitSnapshot> {
        self.breakers.iter().map(|breaker| breaker.snapshot()).collect()
    }

    pub fn any_open(&self) -> bool {
        self.breakers.iter().any(|breaker| breaker.state() == CircuitState::Open)
    }
}
