use std::sync::Arc;

use concierge_agent::{
    handoff_queue, CallTimeouts, Capabilities, CapabilityGuard, CircuitBreakerRegistry,
    EscalationDetector, HandoffQueue, HttpCapabilities, Orchestrator, OrchestratorSettings,
};
use concierge_core::capability::{ConversationRecorder, EscalationNotifier};
use concierge_core::config::{AppConfig, ConfigError, ConversationBackend, EscalationDelivery};
use concierge_db::{connect_with_config, migrations, DbPool, SqlConversationRepository};
use thiserror::Error;
use tracing::{info, warn};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub registry: Arc<CircuitBreakerRegistry>,
    pub orchestrator: Arc<Orchestrator>,
    pub conversations: Arc<SqlConversationRepository>,
    /// Present in queued delivery mode; the caller must spawn the forwarder.
    pub handoff: Option<HandoffForwarder>,
}

/// Everything `forward_handoffs` needs. The guard shares the application's
/// breaker registry, so delivery failures show up on `/health`.
pub struct HandoffForwarder {
    pub queue: HandoffQueue,
    pub target: Arc<dyn EscalationNotifier>,
    pub guard: CapabilityGuard,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("http client construction failed: {0}")]
    HttpClient(#[source] reqwest::Error),
}

#[cfg(test)]
pub async fn bootstrap(
    options: concierge_core::config::LoadOptions,
) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let client = reqwest::Client::builder()
        .user_agent(concat!("concierge/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(BootstrapError::HttpClient)?;
    let http = Arc::new(HttpCapabilities::new(client, &config.capabilities));
    let conversations = Arc::new(SqlConversationRepository::new(db_pool.clone()));

    let recorder: Arc<dyn ConversationRecorder> = match config.conversation.backend {
        ConversationBackend::Sqlite => conversations.clone(),
        ConversationBackend::Http => http.clone(),
    };

    let registry = Arc::new(CircuitBreakerRegistry::from_config(&config.circuit_breaker));
    let guard =
        CapabilityGuard::new(registry.clone(), CallTimeouts::from_config(&config.capabilities));

    let direct: Arc<dyn EscalationNotifier> = http.clone();
    let (escalations, handoff) = match config.escalation.delivery {
        EscalationDelivery::Direct => (direct, None),
        EscalationDelivery::Queued => {
            let (notifier, queue) = handoff_queue(config.escalation.queue_capacity);
            let queued: Arc<dyn EscalationNotifier> = Arc::new(notifier);
            let forwarder = HandoffForwarder { queue, target: direct, guard: guard.clone() };
            (queued, Some(forwarder))
        }
    };

    let detector = EscalationDetector::from_config(&config.escalation);
    if detector.phrases().is_empty() {
        warn!(
            event_name = "system.bootstrap.no_trigger_phrases",
            correlation_id = "bootstrap",
            "no escalation trigger phrases configured; turns will not be handed off"
        );
    }
    let trigger_phrases = detector.phrases().len();
    let orchestrator = Orchestrator::new(
        guard,
        Capabilities {
            orders: http.clone(),
            refunds: http.clone(),
            generator: http,
            escalations,
            recorder,
        },
        detector,
        OrchestratorSettings::from_config(&config),
    );
    info!(
        event_name = "system.bootstrap.orchestrator_ready",
        correlation_id = "bootstrap",
        conversation_backend = ?config.conversation.backend,
        escalation_delivery = ?config.escalation.delivery,
        side_effects = ?config.side_effects.mode,
        trigger_phrases,
        "orchestrator wired"
    );

    Ok(Application {
        config,
        db_pool,
        registry,
        orchestrator: Arc::new(orchestrator),
        conversations,
        handoff,
    })
}
