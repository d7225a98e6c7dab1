//! Bounded queue between the orchestrator and the human-handoff capability.
//!
//! The orchestrator only ever holds the sending half. The receiving half is
//! drained by [`forward_handoffs`], which the hosting process spawns and owns.
//! Enqueueing never touches the `escalate` breaker; delivery does.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{info, warn};

use concierge_core::capability::{Endpoint, EscalationNotifier};
use concierge_core::domain::capability::{EscalationAck, EscalationNotice};
use concierge_core::errors::CapabilityError;

use crate::guard::CapabilityGuard;

pub fn handoff_queue(capacity: usize) -> (QueuedEscalationNotifier, HandoffQueue) {
    let capacity = capacity.max(1);
    let (sender, receiver) = mpsc::channel(capacity);
    (QueuedEscalationNotifier { sender, capacity }, HandoffQueue { receiver })
}

#[derive(Clone, Debug)]
pub struct QueuedEscalationNotifier {
    sender: mpsc::Sender<EscalationNotice>,
    capacity: usize,
}

impl QueuedEscalationNotifier {
    pub fn pending(&self) -> usize {
        self.capacity - self.sender.capacity()
    }
}

#[async_trait]
impl EscalationNotifier for QueuedEscalationNotifier {
    async fn notify(&self, notice: EscalationNotice) -> Result<EscalationAck, CapabilityError> {
        match self.sender.try_send(notice) {
            Ok(()) => Ok(EscalationAck {
                status: "queued".to_string(),
                queue_position: Some(self.pending()),
            }),
            Err(TrySendError::Full(_)) => Err(CapabilityError::Rejected {
                endpoint: Endpoint::Escalate,
                message: format!("handoff queue is full ({} pending)", self.capacity),
            }),
            Err(TrySendError::Closed(_)) => {
                Err(CapabilityError::transport(Endpoint::Escalate, "handoff queue is closed"))
            }
        }
    }

    fn is_remote(&self) -> bool {
        false
    }
}

#[derive(Debug)]
pub struct HandoffQueue {
    receiver: mpsc::Receiver<EscalationNotice>,
}

/// Delivers queued notices until every sender is dropped. Each delivery goes
/// through `guard` on the `escalate` endpoint, so a hung or failing target
/// costs one timeout per notice and then short-circuits once the breaker
/// opens. Returns the number of notices the target acknowledged.
pub async fn forward_handoffs(
    mut queue: HandoffQueue,
    target: Arc<dyn EscalationNotifier>,
    guard: CapabilityGuard,
) -> usize {
    let mut delivered = 0;
    while let Some(notice) = queue.receiver.recv().await {
        let session_id = notice.session_id.clone();
        let remaining = queue.receiver.len();
        let target = target.clone();
        let outcome =
            guard.call(Endpoint::Escalate, || async move { target.notify(notice).await }).await;
        match outcome {
            Ok(ack) => {
                delivered += 1;
                info!(
                    event_name = "handoff.forwarded",
                    session_id = %session_id,
                    status = %ack.status,
                    queue_position = ?ack.queue_position,
                    remaining,
                    "escalation handed to human queue"
                );
            }
            Err(error) => {
                warn!(
                    event_name = "handoff.forward_failed",
                    session_id = %session_id,
                    error_kind = error.kind(),
                    error = %error,
                    remaining,
                    "escalation could not be handed off"
                );
            }
        }
    }
    delivered
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use concierge_core::capability::{Endpoint, EscalationNotifier};
    use concierge_core::config::BreakerSettings;
    use concierge_core::domain::capability::{EscalationAck, EscalationNotice};
    use concierge_core::domain::turn::TurnContext;
    use concierge_core::errors::CapabilityError;

    use super::{forward_handoffs, handoff_queue};
    use crate::circuit_breaker::{CircuitBreakerRegistry, CircuitState};
    use crate::guard::{CallTimeouts, CapabilityGuard};

    fn guard(failure_threshold: u32) -> CapabilityGuard {
        let registry = CircuitBreakerRegistry::uniform(BreakerSettings {
            failure_threshold,
            reset_timeout_secs: 60,
            half_open_trial_count: 1,
        });
        CapabilityGuard::new(
            Arc::new(registry),
            CallTimeouts::uniform(Duration::from_secs(10))
                .with(Endpoint::Escalate, Duration::from_secs(5)),
        )
    }

    fn notice(session: &str) -> EscalationNotice {
        EscalationNotice {
            user_id: "user123".to_string(),
            session_id: session.to_string(),
            message: "I need a manager".to_string(),
            context: TurnContext::default(),
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EscalationNotifier for RecordingNotifier {
        async fn notify(
            &self,
            notice: EscalationNotice,
        ) -> Result<EscalationAck, CapabilityError> {
            let mut seen = self.seen.lock().await;
            seen.push(notice.session_id);
            Ok(EscalationAck { status: "queued".to_string(), queue_position: Some(seen.len()) })
        }
    }

    /// Accepts the call and never answers.
    #[derive(Default)]
    struct HangingNotifier {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl EscalationNotifier for HangingNotifier {
        async fn notify(
            &self,
            _notice: EscalationNotice,
        ) -> Result<EscalationAck, CapabilityError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn full_queue_rejects_without_blocking() {
        let (notifier, _queue) = handoff_queue(1);

        let first = notifier.notify(notice("S-1")).await.expect("first fits");
        let second = notifier.notify(notice("S-2")).await;

        assert_eq!(first.queue_position, Some(1));
        assert!(matches!(
            second,
            Err(CapabilityError::Rejected { endpoint: Endpoint::Escalate, .. })
        ));
    }

    #[tokio::test]
    async fn closed_queue_is_a_transport_failure() {
        let (notifier, queue) = handoff_queue(4);
        drop(queue);

        let result = notifier.notify(notice("S-1")).await;

        assert!(matches!(result, Err(CapabilityError::Transport { .. })));
    }

    #[tokio::test]
    async fn forwarder_drains_in_order_and_stops_when_senders_drop() {
        let (notifier, queue) = handoff_queue(8);
        let target = Arc::new(RecordingNotifier::default());

        for session in ["S-1", "S-2", "S-3"] {
            notifier.notify(notice(session)).await.expect("enqueue");
        }
        drop(notifier);

        let delivered = forward_handoffs(queue, target.clone(), guard(5)).await;

        assert_eq!(delivered, 3);
        assert_eq!(*target.seen.lock().await, vec!["S-1", "S-2", "S-3"]);
    }

    #[tokio::test]
    async fn enqueueing_is_local_and_skips_the_escalate_breaker() {
        let (notifier, _queue) = handoff_queue(2);

        assert!(!notifier.is_remote());
        assert!(RecordingNotifier::default().is_remote());
    }

    #[tokio::test(start_paused = true)]
    async fn hung_target_times_out_per_notice_and_the_queue_keeps_moving() {
        let (notifier, queue) = handoff_queue(2);
        let target = Arc::new(HangingNotifier::default());
        let guard = guard(5);
        let forwarder = tokio::spawn(forward_handoffs(queue, target.clone(), guard.clone()));

        notifier.notify(notice("S-1")).await.expect("enqueue");
        notifier.notify(notice("S-2")).await.expect("enqueue");
        tokio::time::sleep(Duration::from_secs(11)).await;

        assert_eq!(target.attempts.load(Ordering::SeqCst), 2, "both notices were attempted");
        assert_eq!(notifier.pending(), 0, "the queue drained past the hung target");
        notifier.notify(notice("S-3")).await.expect("room again after draining");
        drop(notifier);

        let delivered = forwarder.await.expect("forwarder task");
        assert_eq!(delivered, 0);
        assert_eq!(target.attempts.load(Ordering::SeqCst), 3);
        let breaker = guard.registry().breaker(Endpoint::Escalate).snapshot();
        assert_eq!(breaker.consecutive_failures, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn open_escalate_breaker_drains_the_queue_without_calling_the_target() {
        let (notifier, queue) = handoff_queue(4);
        let target = Arc::new(HangingNotifier::default());
        let guard = guard(1);

        for session in ["S-1", "S-2", "S-3"] {
            notifier.notify(notice(session)).await.expect("enqueue");
        }
        drop(notifier);

        let delivered = forward_handoffs(queue, target.clone(), guard.clone()).await;

        assert_eq!(delivered, 0);
        assert_eq!(target.attempts.load(Ordering::SeqCst), 1, "later notices short-circuit");
        assert_eq!(guard.registry().breaker(Endpoint::Escalate).state(), CircuitState::Open);
    }
}
