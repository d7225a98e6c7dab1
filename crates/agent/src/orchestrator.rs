//! Turn routing and result composition.
//!
//! A turn flows through four steps: route, run the selected handler through
//! the [`CapabilityGuard`], apply the escalation override, then hand the
//! escalation notice and the conversation entry to the side-effect runner.
//! [`Orchestrator::handle`] never fails; capability faults become degraded
//! answers.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use concierge_core::capability::{
    ConversationRecorder, Endpoint, EscalationNotifier, OrderLookup, RefundInitiation,
    ResponseGenerator,
};
use concierge_core::config::{AppConfig, SideEffectMode, DEFAULT_HOLD_MESSAGE};
use concierge_core::domain::capability::{
    ConversationEntry, EscalationNotice, GenerationRequest, OrderLookupOutcome, RefundRequest,
};
use concierge_core::domain::result::{OrchestrationResult, ResponseSource};
use concierge_core::domain::turn::{Intent, Turn, ORDER_ID_LABEL};

use crate::escalation::EscalationDetector;
use crate::guard::CapabilityGuard;

pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.7;

pub const ORDER_ID_PROMPT: &str =
    "Could you please provide your order ID? It should look like 'AB12345678'.";
pub const ORDER_LOOKUP_APOLOGY: &str =
    "I'm sorry, I can't check order status right now. Please try again in a few minutes.";
pub const REFUND_APOLOGY: &str =
    "I'm sorry, I can't start a refund right now. Please try again in a few minutes.";
pub const GENERATION_APOLOGY: &str =
    "I'm sorry, I'm having trouble answering right now. Please try again shortly.";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GenerativeReason {
    RequiresLlm,
    LowConfidence,
    UnmappedIntent,
}

impl GenerativeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RequiresLlm => "requires_llm",
            Self::LowConfidence => "low_confidence",
            Self::UnmappedIntent => "unmapped_intent",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Route {
    OrderStatus,
    RefundRequest,
    Generative(GenerativeReason),
}

impl Route {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OrderStatus => "order_status",
            Self::RefundRequest => "refund_request",
            Self::Generative(_) => "generative",
        }
    }
}

/// Routing policy. The generative override is checked before the intent.
pub fn route(turn: &Turn, confidence_threshold: f64) -> Route {
    if turn.requires_llm() {
        return Route::Generative(GenerativeReason::RequiresLlm);
    }
    if turn.confidence() < confidence_threshold {
        return Route::Generative(GenerativeReason::LowConfidence);
    }
    match turn.intent() {
        Intent::OrderStatus => Route::OrderStatus,
        Intent::RefundRequest => Route::RefundRequest,
        _ => Route::Generative(GenerativeReason::UnmappedIntent),
    }
}

#[derive(Clone)]
pub struct Capabilities {
    pub orders: Arc<dyn OrderLookup>,
    pub refunds: Arc<dyn RefundInitiation>,
    pub generator: Arc<dyn ResponseGenerator>,
    pub escalations: Arc<dyn EscalationNotifier>,
    pub recorder: Arc<dyn ConversationRecorder>,
}

#[derive(Clone, Debug)]
pub struct OrchestratorSettings {
    pub confidence_threshold: f64,
    pub hold_message: String,
    pub side_effects: SideEffectMode,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            hold_message: DEFAULT_HOLD_MESSAGE.to_string(),
            side_effects: SideEffectMode::Detached,
        }
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            confidence_threshold: config.routing.confidence_threshold,
            hold_message: config.escalation.hold_message.clone(),
            side_effects: config.side_effects.mode,
        }
    }
}

pub struct Orchestrator {
    guard: CapabilityGuard,
    capabilities: Capabilities,
    detector: EscalationDetector,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        guard: CapabilityGuard,
        capabilities: Capabilities,
        detector: EscalationDetector,
        settings: OrchestratorSettings,
    ) -> Self {
        Self { guard, capabilities, detector, settings }
    }

    pub fn guard(&self) -> &CapabilityGuard {
        &self.guard
    }

    /// Produces exactly one result for `turn`. Escalation notice and
    /// conversation entry are handed off according to the side-effect mode.
    pub async fn handle(&self, turn: &Turn) -> OrchestrationResult {
        let route = route(turn, self.settings.confidence_threshold);
        let reason = match route {
            Route::Generative(reason) => reason.as_str(),
            Route::OrderStatus | Route::RefundRequest => "intent",
        };
        info!(
            event_name = "orchestrator.turn.routed",
            session_id = %turn.session_id().0,
            message_id = %turn.message_id().0,
            intent = %turn.intent(),
            confidence = turn.confidence(),
            route = route.as_str(),
            reason,
            "turn routed"
        );

        let mut result = match route {
            Route::OrderStatus => self.order_status(turn).await,
            Route::RefundRequest => self.refund_request(turn).await,
            Route::Generative(_) => self.generative(turn).await,
        };

        let mut notice = None;
        if let Some(phrase) = self.detector.detect(turn.text()) {
            info!(
                event_name = "orchestrator.turn.escalated",
                session_id = %turn.session_id().0,
                message_id = %turn.message_id().0,
                trigger_phrase = phrase,
                "escalation phrase matched"
            );
            result = result.escalate(self.settings.hold_message.clone());
            notice = Some(EscalationNotice {
                user_id: turn.user_id().0.clone(),
                session_id: turn.session_id().0.clone(),
                message: turn.text().to_string(),
                context: turn.context().clone(),
            });
        }

        let work = SideEffects {
            guard: self.guard.clone(),
            escalations: self.capabilities.escalations.clone(),
            recorder: self.capabilities.recorder.clone(),
            notice,
            entry: ConversationEntry {
                session_id: turn.session_id().0.clone(),
                message_id: turn.message_id().0.clone(),
                user_id: turn.user_id().0.clone(),
                message: turn.text().to_string(),
                response: result.response.clone(),
                intent: turn.intent().to_string(),
                confidence: turn.confidence(),
                recorded_at: Utc::now(),
            },
        };
        match self.settings.side_effects {
            SideEffectMode::Inline => work.run().await,
            SideEffectMode::Detached => {
                tokio::spawn(work.run());
            }
        }

        result
    }

    async fn order_status(&self, turn: &Turn) -> OrchestrationResult {
        let Some(order_id) = turn.entity(ORDER_ID_LABEL).map(|entity| entity.text.clone()) else {
            debug!(
                event_name = "orchestrator.order_status.missing_entity",
                session_id = %turn.session_id().0,
                label = ORDER_ID_LABEL,
                "asking for order id"
            );
            return OrchestrationResult::clarify(ResponseSource::Deterministic, ORDER_ID_PROMPT);
        };

        let orders = self.capabilities.orders.clone();
        let lookup_id = order_id.clone();
        let outcome = self
            .guard
            .call(Endpoint::OrderLookup, || async move { orders.lookup(&lookup_id).await })
            .await;

        match outcome {
            Ok(OrderLookupOutcome::Found(record)) => {
                let response = format!(
                    "Your order {order_id} is currently {}. Expected delivery: {}.",
                    record.status,
                    record.expected_delivery.as_deref().unwrap_or("TBD"),
                );
                let result = OrchestrationResult::answer(ResponseSource::Deterministic, response);
                match serde_json::to_value(&record) {
                    Ok(data) => result.with_data(data),
                    Err(_) => result,
                }
            }
            Ok(OrderLookupOutcome::NotFound) => OrchestrationResult::clarify(
                ResponseSource::Deterministic,
                format!(
                    "I couldn't find an order with ID {order_id}. Please check and try again."
                ),
            ),
            Err(error) => {
                warn!(
                    event_name = "orchestrator.handler.degraded",
                    session_id = %turn.session_id().0,
                    handler = "order_status",
                    error = %error,
                    "order lookup unavailable"
                );
                OrchestrationResult::degraded(ResponseSource::Deterministic, ORDER_LOOKUP_APOLOGY)
            }
        }
    }

    async fn refund_request(&self, turn: &Turn) -> OrchestrationResult {
        let refunds = self.capabilities.refunds.clone();
        let request =
            RefundRequest { user_id: turn.user_id().0.clone(), entities: turn.entities().to_vec() };
        let outcome = self
            .guard
            .call(Endpoint::RefundInitiate, || async move { refunds.initiate(request).await })
            .await;

        match outcome {
            Ok(receipt) => {
                let result = OrchestrationResult::answer(
                    ResponseSource::Deterministic,
                    receipt.response.clone(),
                );
                match serde_json::to_value(&receipt) {
                    Ok(data) => result.with_data(data),
                    Err(_) => result,
                }
            }
            Err(error) => {
                warn!(
                    event_name = "orchestrator.handler.degraded",
                    session_id = %turn.session_id().0,
                    handler = "refund_request",
                    error = %error,
                    "refund initiation unavailable"
                );
                OrchestrationResult::degraded(ResponseSource::Deterministic, REFUND_APOLOGY)
            }
        }
    }

    async fn generative(&self, turn: &Turn) -> OrchestrationResult {
        let generator = self.capabilities.generator.clone();
        let request = GenerationRequest {
            message: turn.text().to_string(),
            context: turn.context().clone(),
            intent: turn.intent().to_string(),
            entities: turn.entities().to_vec(),
        };
        let outcome = self
            .guard
            .call(Endpoint::Generate, || async move { generator.generate(request).await })
            .await;

        match outcome {
            Ok(reply) => {
                let data = serde_json::json!({
                    "confidence": reply.confidence,
                    "sources": reply.sources,
                });
                OrchestrationResult::answer(ResponseSource::Generative, reply.response)
                    .with_data(data)
            }
            Err(error) => {
                warn!(
                    event_name = "orchestrator.handler.degraded",
                    session_id = %turn.session_id().0,
                    handler = "generative",
                    error = %error,
                    "generation unavailable"
                );
                OrchestrationResult::degraded(ResponseSource::Generative, GENERATION_APOLOGY)
            }
        }
    }
}

/// Best-effort work that follows a computed result. Owns everything it needs
/// so it can outlive the request that produced it.
struct SideEffects {
    guard: CapabilityGuard,
    escalations: Arc<dyn EscalationNotifier>,
    recorder: Arc<dyn ConversationRecorder>,
    notice: Option<EscalationNotice>,
    entry: ConversationEntry,
}

impl SideEffects {
    async fn run(self) {
        let session_id = self.entry.session_id.clone();
        let message_id = self.entry.message_id.clone();

        if let Some(notice) = self.notice {
            let escalations = self.escalations;
            let outcome = if escalations.is_remote() {
                self.guard
                    .call(Endpoint::Escalate, || async move { escalations.notify(notice).await })
                    .await
            } else {
                escalations.notify(notice).await
            };
            match outcome {
                Ok(ack) => debug!(
                    event_name = "orchestrator.escalation.notified",
                    session_id = %session_id,
                    message_id = %message_id,
                    status = %ack.status,
                    "handoff acknowledged"
                ),
                Err(error) => warn!(
                    event_name = "orchestrator.escalation.notify_failed",
                    session_id = %session_id,
                    message_id = %message_id,
                    error = %error,
                    "handoff notification dropped"
                ),
            }
        }

        let recorder = self.recorder;
        let entry = self.entry;
        let outcome = self
            .guard
            .call(Endpoint::ConversationAppend, || async move { recorder.append(entry).await })
            .await;
        match outcome {
            Ok(appended) => debug!(
                event_name = "orchestrator.turn.persisted",
                session_id = %session_id,
                message_id = %message_id,
                outcome = ?appended,
                "conversation entry recorded"
            ),
            Err(error) => warn!(
                event_name = "orchestrator.turn.persist_failed",
                session_id = %session_id,
                message_id = %message_id,
                error = %error,
                "conversation entry dropped"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use concierge_core::domain::turn::{Entity, Intent, Turn, TurnContext, TurnDraft};

    use super::{route, GenerativeReason, Route};

    fn turn(intent: Intent, confidence: f64, requires_llm: bool) -> Turn {
        Turn::new(TurnDraft {
            message_id: Some("m-1".to_string()),
            user_id: "user123".to_string(),
            session_id: "S-1".to_string(),
            text: "where is my order".to_string(),
            intent,
            confidence,
            entities: vec![Entity {
                text: "AB12345678".to_string(),
                label: "ORDER_ID".to_string(),
                start: 0,
                end: 10,
            }],
            requires_llm,
            context: TurnContext::default(),
        })
        .expect("valid turn")
    }

    #[test]
    fn deterministic_intents_route_to_their_handlers() {
        assert_eq!(route(&turn(Intent::OrderStatus, 0.9, false), 0.7), Route::OrderStatus);
        assert_eq!(route(&turn(Intent::RefundRequest, 0.7, false), 0.7), Route::RefundRequest);
    }

    #[test]
    fn requires_llm_overrides_intent() {
        assert_eq!(
            route(&turn(Intent::OrderStatus, 0.99, true), 0.7),
            Route::Generative(GenerativeReason::RequiresLlm)
        );
    }

    #[test]
    fn low_confidence_overrides_intent() {
        assert_eq!(
            route(&turn(Intent::OrderStatus, 0.4, false), 0.7),
            Route::Generative(GenerativeReason::LowConfidence)
        );
        assert_eq!(
            route(&turn(Intent::RefundRequest, 0.69, false), 0.7),
            Route::Generative(GenerativeReason::LowConfidence)
        );
    }

    #[test]
    fn unmapped_intents_fall_back_to_generation() {
        for intent in [
            Intent::ProductInquiry,
            Intent::Complaint,
            Intent::ShippingInfo,
            Intent::CancelOrder,
            Intent::Other("warranty".to_string()),
        ] {
            assert_eq!(
                route(&turn(intent, 0.95, false), 0.7),
                Route::Generative(GenerativeReason::UnmappedIntent)
            );
        }
    }
}
