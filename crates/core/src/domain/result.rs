use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSource {
    Deterministic,
    Generative,
    Escalation,
}

impl ResponseSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deterministic => "deterministic",
            Self::Generative => "generative",
            Self::Escalation => "escalation",
        }
    }
}

/// The single answer produced for a turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationResult {
    pub response: String,
    pub source: ResponseSource,
    #[serde(default)]
    pub escalated: bool,
    #[serde(default)]
    pub requires_input: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Set when a capability was unavailable and a fixed apology was used.
    #[serde(default, skip_serializing_if = "is_false")]
    pub degraded: bool,
}

impl OrchestrationResult {
    pub fn answer(source: ResponseSource, response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            source,
            escalated: false,
            requires_input: false,
            data: None,
            degraded: false,
        }
    }

    pub fn clarify(source: ResponseSource, question: impl Into<String>) -> Self {
        Self { requires_input: true, ..Self::answer(source, question) }
    }

    pub fn degraded(source: ResponseSource, apology: impl Into<String>) -> Self {
        Self { degraded: true, ..Self::answer(source, apology) }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Hands the turn to a human: the hold message replaces whatever the
    /// handler produced. Any capability payload is kept for the agent.
    pub fn escalate(self, hold_message: impl Into<String>) -> Self {
        Self {
            response: hold_message.into(),
            source: ResponseSource::Escalation,
            escalated: true,
            requires_input: false,
            ..self
        }
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{OrchestrationResult, ResponseSource};

    #[test]
    fn escalation_overrides_response_and_source() {
        let result = OrchestrationResult::clarify(ResponseSource::Deterministic, "order id?")
            .escalate("Please hold.");

        assert!(result.escalated);
        assert!(!result.requires_input);
        assert_eq!(result.response, "Please hold.");
        assert_eq!(result.source, ResponseSource::Escalation);
    }

    #[test]
    fn serialization_omits_unset_optional_fields() {
        let value = serde_json::to_value(OrchestrationResult::answer(
            ResponseSource::Generative,
            "hello",
        ))
        .expect("encode result");

        assert_eq!(
            value,
            json!({
                "response": "hello",
                "source": "generative",
                "escalated": false,
                "requires_input": false
            })
        );
    }

    #[test]
    fn degraded_flag_is_serialized_when_set() {
        let value = serde_json::to_value(
            OrchestrationResult::degraded(ResponseSource::Deterministic, "sorry")
                .with_data(json!({"retry": true})),
        )
        .expect("encode result");

        assert_eq!(value["degraded"], json!(true));
        assert_eq!(value["data"]["retry"], json!(true));
    }
}
