use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::Row;

use concierge_core::capability::ConversationRecorder;
use concierge_core::domain::capability::{AppendOutcome, ConversationEntry};
use concierge_core::errors::CapabilityError;

use super::{ConversationRepository, RepositoryError};
use crate::DbPool;

pub struct SqlConversationRepository {
    pool: DbPool,
}

impl SqlConversationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

// Fixed-width UTC timestamps so that text ordering matches time ordering.
fn timestamp_text(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> Result<ConversationEntry, RepositoryError> {
    let decode = |e: sqlx::Error| RepositoryError::Decode(e.to_string());
    let recorded_at_str: String = row.try_get("recorded_at").map_err(decode)?;
    let recorded_at = DateTime::parse_from_rfc3339(&recorded_at_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("recorded_at `{recorded_at_str}`: {e}")))?;

    Ok(ConversationEntry {
        session_id: row.try_get("session_id").map_err(decode)?,
        message_id: row.try_get("message_id").map_err(decode)?,
        user_id: row.try_get("user_id").map_err(decode)?,
        message: row.try_get("message").map_err(decode)?,
        response: row.try_get("response").map_err(decode)?,
        intent: row.try_get("intent").map_err(decode)?,
        confidence: row.try_get("confidence").map_err(decode)?,
        recorded_at,
    })
}

#[async_trait::async_trait]
impl ConversationRepository for SqlConversationRepository {
    async fn append(&self, entry: ConversationEntry) -> Result<AppendOutcome, RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO conversation_turn (session_id, message_id, user_id, message, response,
                                            intent, confidence, recorded_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(session_id, message_id) DO NOTHING",
        )
        .bind(&entry.session_id)
        .bind(&entry.message_id)
        .bind(&entry.user_id)
        .bind(&entry.message)
        .bind(&entry.response)
        .bind(&entry.intent)
        .bind(entry.confidence)
        .bind(timestamp_text(&entry.recorded_at))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            Ok(AppendOutcome::Duplicate)
        } else {
            Ok(AppendOutcome::Appended)
        }
    }

    async fn recent(
        &self,
        session_id: &str,
        limit: u32,
    ) -> Result<Vec<ConversationEntry>, RepositoryError> {
        let rows: Vec<sqlx::sqlite::SqliteRow> = sqlx::query(
            "SELECT session_id, message_id, user_id, message, response, intent, confidence,
                    recorded_at
             FROM conversation_turn
             WHERE session_id = ?
             ORDER BY recorded_at DESC, id DESC
             LIMIT ?",
        )
        .bind(session_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut entries = rows.iter().map(row_to_entry).collect::<Result<Vec<_>, _>>()?;
        entries.reverse();
        Ok(entries)
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM conversation_turn WHERE recorded_at < ?")
            .bind(timestamp_text(&cutoff))
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait::async_trait]
impl ConversationRecorder for SqlConversationRepository {
    async fn append(&self, entry: ConversationEntry) -> Result<AppendOutcome, CapabilityError> {
        ConversationRepository::append(self, entry)
            .await
            .map_err(RepositoryError::into_capability_error)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use concierge_core::domain::capability::{AppendOutcome, ConversationEntry};

    use super::SqlConversationRepository;
    use crate::repositories::ConversationRepository;
    use crate::{connect_with_settings, migrations, DbPool};

    async fn setup() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    fn entry(session: &str, message_id: &str, minute: u32) -> ConversationEntry {
        ConversationEntry {
            session_id: session.to_string(),
            message_id: message_id.to_string(),
            user_id: "user123".to_string(),
            message: format!("message {message_id}"),
            response: format!("response {message_id}"),
            intent: "order_status".to_string(),
            confidence: 0.9,
            recorded_at: Utc.with_ymd_and_hms(2026, 10, 19, 12, minute, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn append_then_recent_round_trip() {
        let repo = SqlConversationRepository::new(setup().await);
        let first = entry("S-1", "m-1", 0);

        let outcome = repo.append(first.clone()).await.expect("append");
        let stored = repo.recent("S-1", 10).await.expect("recent");

        assert_eq!(outcome, AppendOutcome::Appended);
        assert_eq!(stored, vec![first]);
    }

    #[tokio::test]
    async fn duplicate_message_id_is_stored_once() {
        let repo = SqlConversationRepository::new(setup().await);
        let first = entry("S-1", "m-1", 0);
        let mut replay = first.clone();
        replay.response = "a different response".to_string();

        assert_eq!(repo.append(first.clone()).await.expect("first"), AppendOutcome::Appended);
        assert_eq!(repo.append(replay).await.expect("replay"), AppendOutcome::Duplicate);

        let stored = repo.recent("S-1", 10).await.expect("recent");
        assert_eq!(stored, vec![first]);
    }

    #[tokio::test]
    async fn same_message_id_in_another_session_is_distinct() {
        let repo = SqlConversationRepository::new(setup().await);

        repo.append(entry("S-1", "m-1", 0)).await.expect("first session");
        let outcome = repo.append(entry("S-2", "m-1", 0)).await.expect("second session");

        assert_eq!(outcome, AppendOutcome::Appended);
    }

    #[tokio::test]
    async fn recent_returns_newest_turns_oldest_first() {
        let repo = SqlConversationRepository::new(setup().await);
        for (index, minute) in [0_u32, 1, 2, 3].into_iter().enumerate() {
            repo.append(entry("S-1", &format!("m-{index}"), minute)).await.expect("append");
        }
        repo.append(entry("S-other", "m-x", 5)).await.expect("append other");

        let recent = repo.recent("S-1", 2).await.expect("recent");
        let ids: Vec<&str> = recent.iter().map(|e| e.message_id.as_str()).collect();

        assert_eq!(ids, vec!["m-2", "m-3"]);
    }

    #[tokio::test]
    async fn purge_removes_only_entries_before_cutoff() {
        let repo = SqlConversationRepository::new(setup().await);
        let old = entry("S-1", "m-old", 0);
        let fresh = entry("S-1", "m-new", 30);
        repo.append(old.clone()).await.expect("old");
        repo.append(fresh.clone()).await.expect("fresh");

        let removed =
            repo.purge_older_than(old.recorded_at + Duration::minutes(10)).await.expect("purge");
        let remaining = repo.recent("S-1", 10).await.expect("recent");

        assert_eq!(removed, 1);
        assert_eq!(remaining, vec![fresh]);
    }
}
