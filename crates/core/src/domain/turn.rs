use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::DomainError;

pub const ORDER_ID_LABEL: &str = "ORDER_ID";

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl MessageId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

/// Classifier vocabulary. Labels outside the known set are kept verbatim in
/// `Other` so they still reach the generative fallback and the history log.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Intent {
    OrderStatus,
    RefundRequest,
    ProductInquiry,
    Complaint,
    ShippingInfo,
    CancelOrder,
    Other(String),
}

impl Intent {
    pub fn as_str(&self) -> &str {
        match self {
            Self::OrderStatus => "order_status",
            Self::RefundRequest => "refund_request",
            Self::ProductInquiry => "product_inquiry",
            Self::Complaint => "complaint",
            Self::ShippingInfo => "shipping_info",
            Self::CancelOrder => "cancel_order",
            Self::Other(label) => label.as_str(),
        }
    }
}

impl From<String> for Intent {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "order_status" => Self::OrderStatus,
            "refund_request" => Self::RefundRequest,
            "product_inquiry" => Self::ProductInquiry,
            "complaint" => Self::Complaint,
            "shipping_info" => Self::ShippingInfo,
            "cancel_order" => Self::CancelOrder,
            _ => Self::Other(value),
        }
    }
}

impl From<&str> for Intent {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

impl From<Intent> for String {
    fn from(value: Intent) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub text: String,
    pub label: String,
    pub start: usize,
    pub end: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,
    #[serde(default)]
    pub preferences: BTreeMap<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub message: String,
    pub response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationHistory {
    #[serde(default)]
    pub messages: Vec<HistoryMessage>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_profile: Option<UserProfile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_history: Option<ConversationHistory>,
}

/// One classified inbound message. Built once through [`Turn::new`] and never
/// mutated afterwards; every field is read through accessors.
#[derive(Clone, Debug, PartialEq)]
pub struct Turn {
    message_id: MessageId,
    user_id: UserId,
    session_id: SessionId,
    text: String,
    intent: Intent,
    confidence: f64,
    entities: Vec<Entity>,
    requires_llm: bool,
    context: TurnContext,
}

#[derive(Clone, Debug)]
pub struct TurnDraft {
    pub message_id: Option<String>,
    pub user_id: String,
    pub session_id: String,
    pub text: String,
    pub intent: Intent,
    pub confidence: f64,
    pub entities: Vec<Entity>,
    pub requires_llm: bool,
    pub context: TurnContext,
}

impl Turn {
    pub fn new(draft: TurnDraft) -> Result<Self, DomainError> {
        if !draft.confidence.is_finite() || !(0.0..=1.0).contains(&draft.confidence) {
            return Err(DomainError::InvariantViolation(format!(
                "confidence must be within [0, 1], got {}",
                draft.confidence
            )));
        }
        if draft.user_id.trim().is_empty() {
            return Err(DomainError::InvariantViolation("user_id must not be empty".to_owned()));
        }
        if draft.session_id.trim().is_empty() {
            return Err(DomainError::InvariantViolation(
                "session_id must not be empty".to_owned(),
            ));
        }

        let message_id = match draft.message_id {
            Some(id) if !id.trim().is_empty() => MessageId(id),
            _ => MessageId::generate(),
        };

        Ok(Self {
            message_id,
            user_id: UserId(draft.user_id),
            session_id: SessionId(draft.session_id),
            text: draft.text,
            intent: draft.intent,
            confidence: draft.confidence,
            entities: draft.entities,
            requires_llm: draft.requires_llm,
            context: draft.context,
        })
    }

    pub fn message_id(&self) -> &MessageId {
        &self.message_id
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn intent(&self) -> &Intent {
        &self.intent
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn requires_llm(&self) -> bool {
        self.requires_llm
    }

    pub fn context(&self) -> &TurnContext {
        &self.context
    }

    /// First entity carrying `label`, in classifier order.
    pub fn entity(&self, label: &str) -> Option<&Entity> {
        self.entities.iter().find(|entity| entity.label == label)
    }
}

#[cfg(test)]
mod tests {
    use super::{Entity, Intent, Turn, TurnContext, TurnDraft, ORDER_ID_LABEL};
    use crate::errors::DomainError;

    fn draft() -> TurnDraft {
        TurnDraft {
            message_id: Some("msg-1".to_string()),
            user_id: "user123".to_string(),
            session_id: "session-1".to_string(),
            text: "Where is my order AB12345678?".to_string(),
            intent: Intent::OrderStatus,
            confidence: 0.9,
            entities: vec![
                Entity {
                    text: "tomorrow".to_string(),
                    label: "DATE".to_string(),
                    start: 0,
                    end: 8,
                },
                Entity {
                    text: "AB12345678".to_string(),
                    label: ORDER_ID_LABEL.to_string(),
                    start: 18,
                    end: 28,
                },
            ],
            requires_llm: false,
            context: TurnContext::default(),
        }
    }

    #[test]
    fn intent_labels_parse_into_known_variants() {
        assert_eq!(Intent::from("order_status"), Intent::OrderStatus);
        assert_eq!(Intent::from("Refund_Request"), Intent::RefundRequest);
        assert_eq!(Intent::from("warranty_claim"), Intent::Other("warranty_claim".to_string()));
        assert_eq!(Intent::Other("warranty_claim".to_string()).as_str(), "warranty_claim");
    }

    #[test]
    fn intent_serializes_as_plain_label() {
        let encoded = serde_json::to_string(&Intent::ShippingInfo).expect("encode intent");
        assert_eq!(encoded, "\"shipping_info\"");

        let decoded: Intent = serde_json::from_str("\"cancel_order\"").expect("decode intent");
        assert_eq!(decoded, Intent::CancelOrder);
    }

    #[test]
    fn entity_lookup_returns_first_matching_label() {
        let turn = Turn::new(draft()).expect("valid turn");
        let order_id = turn.entity(ORDER_ID_LABEL).map(|entity| entity.text.as_str());
        assert_eq!(order_id, Some("AB12345678"));
        assert!(turn.entity("EMAIL").is_none());
    }

    #[test]
    fn rejects_confidence_outside_unit_interval() {
        let error = Turn::new(TurnDraft { confidence: 1.2, ..draft() }).expect_err("out of range");
        assert!(matches!(error, DomainError::InvariantViolation(ref message) if message.contains("confidence")));

        let error = Turn::new(TurnDraft { confidence: f64::NAN, ..draft() }).expect_err("nan");
        assert!(matches!(error, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn rejects_blank_identifiers() {
        let error = Turn::new(TurnDraft { session_id: "  ".to_string(), ..draft() })
            .expect_err("blank session");
        assert!(matches!(error, DomainError::InvariantViolation(ref message) if message.contains("session_id")));
    }

    #[test]
    fn assigns_message_id_when_missing() {
        let turn = Turn::new(TurnDraft { message_id: None, ..draft() }).expect("valid turn");
        assert!(!turn.message_id().0.is_empty());
        assert_ne!(turn.message_id().0, "msg-1");
    }

    #[test]
    fn context_deserializes_with_named_optional_fields() {
        let context: TurnContext = serde_json::from_str(
            r#"{
                "user_profile": {"name": "Ada", "tier": "gold"},
                "conversation_history": {"messages": [{"message": "hi", "response": "hello"}]}
            }"#,
        )
        .expect("decode context");

        let profile = context.user_profile.expect("profile");
        assert_eq!(profile.name.as_deref(), Some("Ada"));
        assert_eq!(profile.tier.as_deref(), Some("gold"));
        assert!(profile.preferences.is_empty());
        assert_eq!(context.conversation_history.map(|history| history.messages.len()), Some(1));
    }
}
