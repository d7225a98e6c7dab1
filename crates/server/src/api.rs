use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use concierge_agent::Orchestrator;
use concierge_core::domain::capability::ConversationEntry;
use concierge_core::domain::result::OrchestrationResult;
use concierge_core::domain::turn::{Entity, Intent, Turn, TurnContext, TurnDraft};
use concierge_core::errors::{ApplicationError, DomainError, InterfaceError};
use concierge_db::ConversationRepository;
use serde::{Deserialize, Serialize};
use tracing::warn;

const MAX_HISTORY_LIMIT: u32 = 100;

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
    pub conversations: Arc<dyn ConversationRepository>,
    pub history_limit: u32,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/orchestrate", post(orchestrate))
        .route("/conversation/{session_id}", get(conversation))
        .with_state(state)
}

/// A classified turn as the upstream NLU hands it over.
#[derive(Clone, Debug, Deserialize)]
pub struct OrchestrateRequest {
    pub message: String,
    pub user_id: String,
    pub session_id: String,
    #[serde(default)]
    pub message_id: Option<String>,
    pub intent: Intent,
    pub confidence: f64,
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub requires_llm: bool,
    #[serde(default)]
    pub context: TurnContext,
}

impl From<OrchestrateRequest> for TurnDraft {
    fn from(request: OrchestrateRequest) -> Self {
        Self {
            message_id: request.message_id,
            user_id: request.user_id,
            session_id: request.session_id,
            text: request.message,
            intent: request.intent,
            confidence: request.confidence,
            entities: request.entities,
            requires_llm: request.requires_llm,
            context: request.context,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub session_id: String,
    pub messages: Vec<ConversationEntry>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    detail: String,
    correlation_id: String,
}

pub struct ApiError(InterfaceError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let detail = match &self.0 {
            InterfaceError::BadRequest { message, .. }
            | InterfaceError::ServiceUnavailable { message, .. }
            | InterfaceError::Internal { message, .. } => message.clone(),
        };
        let body = ErrorBody {
            error: self.0.user_message(),
            detail,
            correlation_id: self.0.correlation_id().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

fn interface_error(error: impl Into<ApplicationError>) -> ApiError {
    ApiError(error.into().into_interface(uuid::Uuid::new_v4().to_string()))
}

/// Extractor rejections get the same error body as every other client error.
fn malformed(event_name: &'static str, body_text: String) -> ApiError {
    let error = interface_error(DomainError::MalformedRequest(body_text));
    warn!(
        event_name,
        correlation_id = %error.0.correlation_id(),
        error = %error.0,
        "request could not be decoded"
    );
    error
}

pub async fn orchestrate(
    State(state): State<ApiState>,
    payload: Result<Json<OrchestrateRequest>, JsonRejection>,
) -> Result<Json<OrchestrationResult>, ApiError> {
    let Json(request) = payload
        .map_err(|rejection| malformed("api.orchestrate.malformed", rejection.body_text()))?;
    let turn = Turn::new(request.into()).map_err(|error| {
        let error = interface_error(error);
        warn!(
            event_name = "api.orchestrate.rejected",
            correlation_id = %error.0.correlation_id(),
            error = %error.0,
            "turn rejected before routing"
        );
        error
    })?;

    Ok(Json(state.orchestrator.handle(&turn).await))
}

pub async fn conversation(
    State(state): State<ApiState>,
    Path(session_id): Path<String>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let Query(query) =
        query.map_err(|rejection| malformed("api.conversation.malformed", rejection.body_text()))?;
    let limit = query.limit.unwrap_or(state.history_limit).clamp(1, MAX_HISTORY_LIMIT);
    let messages = state.conversations.recent(&session_id, limit).await.map_err(|error| {
        let error = interface_error(ApplicationError::Persistence(error.to_string()));
        warn!(
            event_name = "api.conversation.read_failed",
            correlation_id = %error.0.correlation_id(),
            session_id = %session_id,
            error = %error.0,
            "conversation history unavailable"
        );
        error
    })?;

    Ok(Json(HistoryResponse { session_id, messages }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use axum::Router;
    use chrono::{Duration as ChronoDuration, Utc};
    use concierge_agent::{
        CallTimeouts, Capabilities, CapabilityGuard, CircuitBreakerRegistry, EscalationDetector,
        Orchestrator, OrchestratorSettings,
    };
    use concierge_core::capability::{
        EscalationNotifier, OrderLookup, RefundInitiation, ResponseGenerator,
    };
    use concierge_core::config::{BreakerSettings, SideEffectMode};
    use concierge_core::domain::capability::{
        ConversationEntry, EscalationAck, EscalationNotice, GenerationReply, GenerationRequest,
        OrderLookupOutcome, RefundReceipt, RefundRequest,
    };
    use concierge_core::errors::CapabilityError;
    use concierge_db::{ConversationRepository, InMemoryConversationRepository};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::api::{router, ApiState};

    struct CannedCapabilities;

    #[async_trait]
    impl OrderLookup for CannedCapabilities {
        async fn lookup(&self, _order_id: &str) -> Result<OrderLookupOutcome, CapabilityError> {
            Ok(OrderLookupOutcome::NotFound)
        }
    }

    #[async_trait]
    impl RefundInitiation for CannedCapabilities {
        async fn initiate(&self, _request: RefundRequest) -> Result<RefundReceipt, CapabilityError> {
            Ok(RefundReceipt {
                response: "Refund started.".to_string(),
                refund_id: Some("RF-1".to_string()),
                status: Some("pending".to_string()),
                extra: Default::default(),
            })
        }
    }

    #[async_trait]
    impl ResponseGenerator for CannedCapabilities {
        async fn generate(
            &self,
            request: GenerationRequest,
        ) -> Result<GenerationReply, CapabilityError> {
            Ok(GenerationReply {
                response: format!("About {}: it ships in two days.", request.intent),
                confidence: Some(0.8),
                sources: Vec::new(),
            })
        }
    }

    #[async_trait]
    impl EscalationNotifier for CannedCapabilities {
        async fn notify(&self, _notice: EscalationNotice) -> Result<EscalationAck, CapabilityError> {
            Ok(EscalationAck { status: "queued".to_string(), queue_position: Some(1) })
        }
    }

    fn app() -> (Router, Arc<InMemoryConversationRepository>) {
        let canned = Arc::new(CannedCapabilities);
        let conversations = Arc::new(InMemoryConversationRepository::default());
        let guard = CapabilityGuard::new(
            Arc::new(CircuitBreakerRegistry::uniform(BreakerSettings::default())),
            CallTimeouts::uniform(Duration::from_secs(1)),
        );
        let orchestrator = Orchestrator::new(
            guard,
            Capabilities {
                orders: canned.clone(),
                refunds: canned.clone(),
                generator: canned.clone(),
                escalations: canned,
                recorder: conversations.clone(),
            },
            EscalationDetector::default(),
            OrchestratorSettings {
                side_effects: SideEffectMode::Inline,
                ..OrchestratorSettings::default()
            },
        );
        let state = ApiState {
            orchestrator: Arc::new(orchestrator),
            conversations: conversations.clone(),
            history_limit: 10,
        };
        (router(state), conversations)
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.expect("router responds");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("read body");
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    #[tokio::test]
    async fn orchestrate_answers_and_records_the_turn() {
        let (app, conversations) = app();

        let (status, body) = send(
            app,
            post_json(
                "/orchestrate",
                json!({
                    "message": "Do you ship to Canada?",
                    "user_id": "user123",
                    "session_id": "S-1",
                    "message_id": "m-1",
                    "intent": "shipping_info",
                    "confidence": 0.92
                }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["source"], "generative");
        assert_eq!(body["response"], "About shipping_info: it ships in two days.");
        assert_eq!(body["escalated"], false);
        assert_eq!(conversations.len().await, 1);
    }

    #[tokio::test]
    async fn out_of_range_confidence_is_a_bad_request_with_correlation_id() {
        let (app, conversations) = app();

        let (status, body) = send(
            app,
            post_json(
                "/orchestrate",
                json!({
                    "message": "hello",
                    "user_id": "user123",
                    "session_id": "S-1",
                    "intent": "order_status",
                    "confidence": 1.5
                }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].as_str().is_some_and(|detail| detail.contains("confidence")));
        assert!(body["correlation_id"].as_str().is_some_and(|id| !id.is_empty()));
        assert!(conversations.is_empty().await);
    }

    #[tokio::test]
    async fn missing_field_is_a_bad_request_with_correlation_id() {
        let (app, conversations) = app();

        let (status, body) = send(
            app,
            post_json(
                "/orchestrate",
                json!({
                    "message": "hello",
                    "user_id": "user123",
                    "session_id": "S-1",
                    "intent": "order_status"
                }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "The request could not be processed. Check inputs and try again.");
        assert!(body["detail"].as_str().is_some_and(|detail| detail.contains("confidence")));
        assert!(body["correlation_id"].as_str().is_some_and(|id| !id.is_empty()));
        assert!(conversations.is_empty().await);
    }

    #[tokio::test]
    async fn unparseable_body_and_query_share_the_error_shape() {
        let (app, _) = app();

        let (status, body) = send(
            app.clone(),
            Request::post("/orchestrate")
                .header("content-type", "application/json")
                .body(Body::from("{not json"))
                .expect("request"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["correlation_id"].is_string());

        let (status, body) = send(
            app,
            Request::get("/conversation/S-1?limit=lots").body(Body::empty()).expect("request"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["correlation_id"].is_string());
    }

    #[tokio::test]
    async fn conversation_history_is_clamped_and_oldest_first() {
        let (app, conversations) = app();
        let start = Utc::now() - ChronoDuration::minutes(10);
        for index in 0..3 {
            conversations
                .append(ConversationEntry {
                    session_id: "S-9".to_string(),
                    message_id: format!("m-{index}"),
                    user_id: "user123".to_string(),
                    message: format!("question {index}"),
                    response: format!("answer {index}"),
                    intent: "product_inquiry".to_string(),
                    confidence: 0.9,
                    recorded_at: start + ChronoDuration::minutes(index),
                })
                .await
                .expect("seed history");
        }

        let (status, body) = send(
            app.clone(),
            Request::get("/conversation/S-9?limit=2").body(Body::empty()).expect("request"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["session_id"], "S-9");
        let ids: Vec<&str> = body["messages"]
            .as_array()
            .expect("messages")
            .iter()
            .filter_map(|message| message["message_id"].as_str())
            .collect();
        assert_eq!(ids, vec!["m-1", "m-2"]);

        let (_, body) = send(
            app,
            Request::get("/conversation/S-9?limit=0").body(Body::empty()).expect("request"),
        )
        .await;
        assert_eq!(body["messages"].as_array().map(Vec::len), Some(1));
    }
}
