pub mod capability;
pub mod config;
pub mod domain;
pub mod errors;

pub use capability::{
    ConversationRecorder, Endpoint, EscalationNotifier, OrderLookup, RefundInitiation,
    ResponseGenerator,
};
pub use domain::capability::{
    AppendOutcome, ConversationEntry, EscalationAck, EscalationNotice, GenerationReply,
    GenerationRequest, OrderLookupOutcome, OrderRecord, RefundReceipt, RefundRequest,
};
pub use domain::result::{OrchestrationResult, ResponseSource};
pub use domain::turn::{
    ConversationHistory, Entity, HistoryMessage, Intent, MessageId, SessionId, Turn,
    TurnContext, TurnDraft, UserId, UserProfile, ORDER_ID_LABEL,
};
pub use errors::{ApplicationError, CapabilityError, DomainError, InterfaceError};
