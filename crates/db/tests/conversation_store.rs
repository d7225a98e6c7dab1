use chrono::{Duration, Utc};

use concierge_core::capability::ConversationRecorder;
use concierge_core::domain::capability::{AppendOutcome, ConversationEntry};
use concierge_db::migrations;
use concierge_db::{connect_with_settings, ConversationRepository, SqlConversationRepository};

type StoreTestResult<T = ()> = Result<T, String>;

fn entry(message_id: &str) -> ConversationEntry {
    ConversationEntry {
        session_id: "session-42".to_string(),
        message_id: message_id.to_string(),
        user_id: "user123".to_string(),
        message: "I want a refund".to_string(),
        response: "Your refund has been started.".to_string(),
        intent: "refund_request".to_string(),
        confidence: 0.88,
        recorded_at: Utc::now(),
    }
}

#[tokio::test]
async fn file_backed_store_survives_reconnect_and_keeps_at_most_once() -> StoreTestResult {
    let dir = tempfile::tempdir().map_err(|e| e.to_string())?;
    let url = format!("sqlite://{}", dir.path().join("concierge.db").display());

    {
        let pool = connect_with_settings(&url, 2, 5).await.map_err(|e| e.to_string())?;
        migrations::run_pending(&pool).await.map_err(|e| e.to_string())?;
        let repo = SqlConversationRepository::new(pool.clone());

        let outcome =
            ConversationRecorder::append(&repo, entry("m-1")).await.map_err(|e| e.to_string())?;
        if outcome != AppendOutcome::Appended {
            return Err(format!("first append should be stored, got {outcome:?}"));
        }
        pool.close().await;
    }

    let pool = connect_with_settings(&url, 2, 5).await.map_err(|e| e.to_string())?;
    migrations::run_pending(&pool).await.map_err(|e| e.to_string())?;
    let repo = SqlConversationRepository::new(pool);

    let replay =
        ConversationRecorder::append(&repo, entry("m-1")).await.map_err(|e| e.to_string())?;
    if replay != AppendOutcome::Duplicate {
        return Err(format!("replayed append should be a duplicate, got {replay:?}"));
    }

    let stored = repo.recent("session-42", 10).await.map_err(|e| e.to_string())?;
    if stored.len() != 1 {
        return Err(format!("expected exactly one stored turn, found {}", stored.len()));
    }

    let purged = repo
        .purge_older_than(Utc::now() + Duration::seconds(1))
        .await
        .map_err(|e| e.to_string())?;
    if purged != 1 {
        return Err(format!("purge should remove the stored turn, removed {purged}"));
    }

    Ok(())
}
