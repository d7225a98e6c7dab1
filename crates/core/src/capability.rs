//! Interfaces of the external capabilities a turn may reach.
//!
//! Every capability is a black box behind one of these traits. Implementations
//! only perform the call; timeouts and failure isolation are applied around
//! them by the agent runtime, keyed by [`Endpoint`].

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::capability::{
    AppendOutcome, ConversationEntry, EscalationAck, EscalationNotice, GenerationReply,
    GenerationRequest, OrderLookupOutcome, RefundReceipt, RefundRequest,
};
use crate::errors::CapabilityError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endpoint {
    OrderLookup,
    RefundInitiate,
    Generate,
    Escalate,
    ConversationAppend,
}

impl Endpoint {
    pub const ALL: [Endpoint; 5] = [
        Endpoint::OrderLookup,
        Endpoint::RefundInitiate,
        Endpoint::Generate,
        Endpoint::Escalate,
        Endpoint::ConversationAppend,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OrderLookup => "order_lookup",
            Self::RefundInitiate => "refund_initiate",
            Self::Generate => "generate",
            Self::Escalate => "escalate",
            Self::ConversationAppend => "conversation_append",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Endpoint {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Endpoint::ALL
            .into_iter()
            .find(|endpoint| endpoint.as_str() == value.trim())
            .ok_or_else(|| format!("unknown capability endpoint `{value}`"))
    }
}

#[async_trait]
pub trait OrderLookup: Send + Sync {
    async fn lookup(&self, order_id: &str) -> Result<OrderLookupOutcome, CapabilityError>;
}

#[async_trait]
pub trait RefundInitiation: Send + Sync {
    async fn initiate(&self, request: RefundRequest) -> Result<RefundReceipt, CapabilityError>;
}

#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    async fn generate(&self, request: GenerationRequest)
        -> Result<GenerationReply, CapabilityError>;
}

#[async_trait]
pub trait EscalationNotifier: Send + Sync {
    async fn notify(&self, notice: EscalationNotice) -> Result<EscalationAck, CapabilityError>;

    /// False when `notify` only hands the notice to an in-process queue. The
    /// remote delivery is then guarded by whatever drains that queue.
    fn is_remote(&self) -> bool {
        true
    }
}

/// Append-only conversation sink. Implementations must store a turn at most
/// once per `(session_id, message_id)`.
#[async_trait]
pub trait ConversationRecorder: Send + Sync {
    async fn append(&self, entry: ConversationEntry) -> Result<AppendOutcome, CapabilityError>;
}

#[cfg(test)]
mod tests {
    use super::Endpoint;

    #[test]
    fn endpoint_names_round_trip_through_from_str() {
        for endpoint in Endpoint::ALL {
            assert_eq!(endpoint.as_str().parse::<Endpoint>(), Ok(endpoint));
        }
        assert!("inventory".parse::<Endpoint>().is_err());
    }
}
