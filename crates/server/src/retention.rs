use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use concierge_db::{ConversationRepository, RepositoryError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// How often expired turns are swept.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(15 * 60);

const MAX_RETENTION_HOURS: u64 = 24 * 365 * 100;

/// Deletes turns older than `retention_hours`. Zero disables retention.
pub async fn purge_expired(
    conversations: &dyn ConversationRepository,
    retention_hours: u64,
) -> Result<u64, RepositoryError> {
    if retention_hours == 0 {
        return Ok(0);
    }
    let hours = i64::try_from(retention_hours.min(MAX_RETENTION_HOURS)).unwrap_or(0);
    let cutoff = Utc::now() - chrono::Duration::hours(hours);
    conversations.purge_older_than(cutoff).await
}

/// Sweeps on a fixed interval until `shutdown` flips to true or its sender goes
/// away. The first sweep runs immediately.
pub fn spawn(
    conversations: Arc<dyn ConversationRepository>,
    retention_hours: u64,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match purge_expired(conversations.as_ref(), retention_hours).await {
                        Ok(0) => {}
                        Ok(purged) => info!(
                            event_name = "retention.purged",
                            purged,
                            retention_hours,
                            "expired conversation turns removed"
                        ),
                        Err(error) => warn!(
                            event_name = "retention.purge_failed",
                            error = %error,
                            "conversation retention sweep failed"
                        ),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::{Duration as ChronoDuration, Utc};
    use concierge_core::domain::capability::ConversationEntry;
    use concierge_db::{ConversationRepository, InMemoryConversationRepository};
    use tokio::sync::watch;

    use crate::retention::{purge_expired, spawn};

    fn entry(message_id: &str, hours_ago: i64) -> ConversationEntry {
        ConversationEntry {
            session_id: "S-1".to_string(),
            message_id: message_id.to_string(),
            user_id: "user123".to_string(),
            message: "hi".to_string(),
            response: "hello".to_string(),
            intent: "product_inquiry".to_string(),
            confidence: 0.9,
            recorded_at: Utc::now() - ChronoDuration::hours(hours_ago),
        }
    }

    async fn seeded() -> Arc<InMemoryConversationRepository> {
        let repository = Arc::new(InMemoryConversationRepository::default());
        repository.append(entry("old", 30)).await.expect("seed old");
        repository.append(entry("fresh", 1)).await.expect("seed fresh");
        repository
    }

    #[tokio::test]
    async fn purge_keeps_turns_inside_the_window() {
        let repository = seeded().await;

        let purged = purge_expired(repository.as_ref(), 24).await.expect("purge");

        assert_eq!(purged, 1);
        let remaining = repository.recent("S-1", 10).await.expect("recent");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].message_id, "fresh");
    }

    #[tokio::test]
    async fn zero_retention_keeps_everything() {
        let repository = seeded().await;

        assert_eq!(purge_expired(repository.as_ref(), 0).await.expect("purge"), 0);
        assert_eq!(repository.len().await, 2);
    }

    #[tokio::test]
    async fn sweeper_runs_immediately_and_stops_on_shutdown() {
        let repository = seeded().await;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = spawn(repository.clone(), 24, Duration::from_secs(3600), shutdown_rx);
        for _ in 0..50 {
            if repository.len().await == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(repository.len().await, 1);

        shutdown_tx.send(true).expect("sweeper still listening");
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper stops")
            .expect("sweeper task does not panic");
    }
}
