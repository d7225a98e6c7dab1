use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use concierge_core::capability::ConversationRecorder;
use concierge_core::domain::capability::{AppendOutcome, ConversationEntry};
use concierge_core::errors::CapabilityError;

use super::{ConversationRepository, RepositoryError};

#[derive(Default)]
struct ConversationLog {
    keys: HashSet<(String, String)>,
    entries: Vec<ConversationEntry>,
}

#[derive(Default)]
pub struct InMemoryConversationRepository {
    log: RwLock<ConversationLog>,
}

impl InMemoryConversationRepository {
    pub async fn len(&self) -> usize {
        self.log.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait::async_trait]
impl ConversationRepository for InMemoryConversationRepository {
    async fn append(&self, entry: ConversationEntry) -> Result<AppendOutcome, RepositoryError> {
        let mut log = self.log.write().await;
        let key = (entry.session_id.clone(), entry.message_id.clone());
        if !log.keys.insert(key) {
            return Ok(AppendOutcome::Duplicate);
        }
        log.entries.push(entry);
        Ok(AppendOutcome::Appended)
    }

    async fn recent(
        &self,
        session_id: &str,
        limit: u32,
    ) -> Result<Vec<ConversationEntry>, RepositoryError> {
        let log = self.log.read().await;
        let mut matching: Vec<ConversationEntry> =
            log.entries.iter().filter(|e| e.session_id == session_id).cloned().collect();
        matching.sort_by_key(|e| e.recorded_at);
        let skip = matching.len().saturating_sub(limit as usize);
        Ok(matching.into_iter().skip(skip).collect())
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let mut log = self.log.write().await;
        let before = log.entries.len();
        log.entries.retain(|e| e.recorded_at >= cutoff);
        let ConversationLog { keys, entries } = &mut *log;
        keys.retain(|(session, message)| {
            entries.iter().any(|e| &e.session_id == session && &e.message_id == message)
        });
        Ok((before - log.entries.len()) as u64)
    }
}

#[async_trait::async_trait]
impl ConversationRecorder for InMemoryConversationRepository {
    async fn append(&self, entry: ConversationEntry) -> Result<AppendOutcome, CapabilityError> {
        ConversationRepository::append(self, entry)
            .await
            .map_err(RepositoryError::into_capability_error)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use concierge_core::capability::ConversationRecorder;
    use concierge_core::domain::capability::{AppendOutcome, ConversationEntry};

    use crate::repositories::{ConversationRepository, InMemoryConversationRepository};

    fn entry(message_id: &str, age_hours: i64) -> ConversationEntry {
        ConversationEntry {
            session_id: "S-1".to_string(),
            message_id: message_id.to_string(),
            user_id: "user123".to_string(),
            message: "Where is my order?".to_string(),
            response: "Your order is on its way.".to_string(),
            intent: "order_status".to_string(),
            confidence: 0.95,
            recorded_at: Utc::now() - Duration::hours(age_hours),
        }
    }

    #[tokio::test]
    async fn recorder_seam_deduplicates_by_message_id() {
        let repo = InMemoryConversationRepository::default();

        let first = ConversationRecorder::append(&repo, entry("m-1", 0)).await.expect("first");
        let second = ConversationRecorder::append(&repo, entry("m-1", 0)).await.expect("second");

        assert_eq!(first, AppendOutcome::Appended);
        assert_eq!(second, AppendOutcome::Duplicate);
        assert_eq!(repo.len().await, 1);
    }

    #[tokio::test]
    async fn purge_drops_expired_turns_and_frees_their_keys() {
        let repo = InMemoryConversationRepository::default();
        ConversationRepository::append(&repo, entry("m-old", 48)).await.expect("old");
        ConversationRepository::append(&repo, entry("m-new", 1)).await.expect("new");

        let removed =
            repo.purge_older_than(Utc::now() - Duration::hours(24)).await.expect("purge");

        assert_eq!(removed, 1);
        let remaining = repo.recent("S-1", 10).await.expect("recent");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].message_id, "m-new");

        let again = ConversationRepository::append(&repo, entry("m-old", 0)).await.expect("again");
        assert_eq!(again, AppendOutcome::Appended);
    }
}
