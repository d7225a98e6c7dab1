use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use concierge_core::capability::Endpoint;
use concierge_core::config::CapabilitiesConfig;
use concierge_core::errors::CapabilityError;

use crate::circuit_breaker::CircuitBreakerRegistry;

#[derive(Clone, Debug)]
pub struct CallTimeouts {
    default: Duration,
    per_endpoint: BTreeMap<Endpoint, Duration>,
}

impl CallTimeouts {
    pub fn uniform(timeout: Duration) -> Self {
        Self { default: timeout, per_endpoint: BTreeMap::new() }
    }

    pub fn from_config(config: &CapabilitiesConfig) -> Self {
        let per_endpoint =
            Endpoint::ALL.into_iter().map(|endpoint| (endpoint, config.timeout_for(endpoint)));
        Self { default: Duration::from_secs(10), per_endpoint: per_endpoint.collect() }
    }

    pub fn with(mut self, endpoint: Endpoint, timeout: Duration) -> Self {
        self.per_endpoint.insert(endpoint, timeout);
        self
    }

    pub fn get(&self, endpoint: Endpoint) -> Duration {
        self.per_endpoint.get(&endpoint).copied().unwrap_or(self.default)
    }
}

/// Wraps every downstream call: breaker admission, timeout, outcome
/// accounting and call logging all happen here and nowhere else.
#[derive(Clone, Debug)]
pub struct CapabilityGuard {
    registry: Arc<CircuitBreakerRegistry>,
    timeouts: Arc<CallTimeouts>,
}

impl CapabilityGuard {
    pub fn new(registry: Arc<CircuitBreakerRegistry>, timeouts: CallTimeouts) -> Self {
        Self { registry, timeouts: Arc::new(timeouts) }
    }

    pub fn registry(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.registry
    }

    pub async fn call<T, F, Fut>(&self, endpoint: Endpoint, op: F) -> Result<T, CapabilityError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, CapabilityError>>,
    {
        let breaker = self.registry.breaker(endpoint);
        let permit = match breaker.try_acquire() {
            Ok(permit) => permit,
            Err(error) => {
                debug!(
                    event_name = "capability.call.short_circuited",
                    endpoint = %endpoint,
                    "breaker refused call"
                );
                return Err(error);
            }
        };

        let timeout = self.timeouts.get(endpoint);
        let started = Instant::now();
        let outcome = match tokio::time::timeout(timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(CapabilityError::Timeout {
                endpoint,
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        };
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let trial = permit.is_trial();

        match &outcome {
            Ok(_) => {
                permit.succeed();
                debug!(
                    event_name = "capability.call.succeeded",
                    endpoint = %endpoint,
                    elapsed_ms,
                    trial,
                    "capability call completed"
                );
            }
            Err(error) => {
                permit.fail();
                warn!(
                    event_name = "capability.call.failed",
                    endpoint = %endpoint,
                    error_kind = error.kind(),
                    error = %error,
                    elapsed_ms,
                    trial,
                    "capability call failed"
                );
            }
        }

        outcome
    }
}
