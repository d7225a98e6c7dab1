use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use concierge_core::capability::Endpoint;
use concierge_core::domain::capability::{AppendOutcome, ConversationEntry};
use concierge_core::errors::CapabilityError;

pub mod conversation;
pub mod memory;

pub use conversation::SqlConversationRepository;
pub use memory::InMemoryConversationRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl RepositoryError {
    /// Conversation storage is reached through the capability seam, so its
    /// failures count against the `conversation_append` breaker.
    pub fn into_capability_error(self) -> CapabilityError {
        CapabilityError::transport(Endpoint::ConversationAppend, self.to_string())
    }
}

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    /// Stores the turn unless `(session_id, message_id)` is already present.
    async fn append(&self, entry: ConversationEntry) -> Result<AppendOutcome, RepositoryError>;

    /// The newest `limit` turns of a session, oldest first.
    async fn recent(
        &self,
        session_id: &str,
        limit: u32,
    ) -> Result<Vec<ConversationEntry>, RepositoryError>;

    /// Deletes turns recorded strictly before `cutoff`; returns how many went.
    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError>;
}
