pub mod circuit_breaker;
pub mod escalation;
pub mod guard;
pub mod handoff;
pub mod http;
pub mod orchestrator;

pub use circuit_breaker::{
    CallPermit, CircuitBreaker, CircuitBreakerRegistry, CircuitSnapshot, CircuitState,
};
pub use escalation::EscalationDetector;
pub use guard::{CallTimeouts, CapabilityGuard};
pub use handoff::{forward_handoffs, handoff_queue, HandoffQueue, QueuedEscalationNotifier};
pub use http::HttpCapabilities;
pub use orchestrator::{
    route, Capabilities, GenerativeReason, Orchestrator, OrchestratorSettings, Route,
};
