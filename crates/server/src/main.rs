mod api;
mod bootstrap;
mod health;
mod retention;

use std::time::Duration;

use anyhow::{anyhow, Result};
use concierge_agent::forward_handoffs;
use concierge_core::config::{AppConfig, LoadOptions};
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info, warn};

use crate::api::ApiState;
use crate::bootstrap::Application;
use crate::health::HealthState;

fn init_logging(config: &AppConfig) {
    use concierge_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Logging comes up before bootstrap so connection and migration events are visible.
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let Application { config, db_pool, registry, orchestrator, conversations, handoff } =
        bootstrap::bootstrap_with_config(config).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let forwarder = handoff.map(|forwarder| {
        tokio::spawn(forward_handoffs(forwarder.queue, forwarder.target, forwarder.guard))
    });
    let sweeper = retention::spawn(
        conversations.clone(),
        config.conversation.retention_hours,
        retention::SWEEP_INTERVAL,
        shutdown_rx.clone(),
    );

    let router = health::router(HealthState { db_pool: db_pool.clone(), registry }).merge(
        api::router(ApiState {
            orchestrator,
            conversations,
            history_limit: config.conversation.history_limit,
        }),
    );

    let address = format!("{}:{}", config.server.bind_address, config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        "concierge-server started"
    );

    let mut stop = shutdown_rx;
    let mut server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = stop.wait_for(|stopping| *stopping).await;
            })
            .await
    });

    tokio::select! {
        signal = tokio::signal::ctrl_c() => signal?,
        finished = &mut server => {
            let _ = shutdown_tx.send(true);
            return match finished {
                Ok(Ok(())) => Err(anyhow!("http server exited before shutdown was requested")),
                Ok(Err(error)) => Err(error.into()),
                Err(error) => Err(error.into()),
            };
        }
    }

    info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "concierge-server stopping"
    );
    let _ = shutdown_tx.send(true);
    let grace = Duration::from_secs(config.server.graceful_shutdown_secs);

    match join_within(grace, server).await {
        Some(Ok(Ok(()))) => {}
        Some(Ok(Err(error))) => error!(
            event_name = "system.server.error",
            correlation_id = "shutdown",
            error = %error,
            "http server terminated with an error"
        ),
        Some(Err(error)) => error!(
            event_name = "system.server.error",
            correlation_id = "shutdown",
            error = %error,
            "http server task failed"
        ),
        None => warn!(
            event_name = "system.server.shutdown_timed_out",
            correlation_id = "shutdown",
            grace_secs = config.server.graceful_shutdown_secs,
            "in-flight requests did not finish within the grace period; server aborted"
        ),
    }

    let _ = sweeper.await;
    if let Some(forwarder) = forwarder {
        // The queue closes once the router and every detached side effect have
        // released the orchestrator.
        match join_within(grace, forwarder).await {
            Some(Ok(delivered)) => info!(
                event_name = "system.server.handoffs_drained",
                correlation_id = "shutdown",
                delivered,
                "handoff forwarder drained"
            ),
            Some(Err(error)) => error!(
                event_name = "system.server.error",
                correlation_id = "shutdown",
                error = %error,
                "handoff forwarder task failed"
            ),
            None => warn!(
                event_name = "system.server.shutdown_timed_out",
                correlation_id = "shutdown",
                "pending handoffs were not drained within the grace period"
            ),
        }
    }

    db_pool.close().await;
    Ok(())
}

/// Waits up to `grace` for a background task and aborts it once the wait
/// runs out, so nothing outlives shutdown.
async fn join_within<T>(
    grace: Duration,
    mut task: JoinHandle<T>,
) -> Option<Result<T, JoinError>> {
    match tokio::time::timeout(grace, &mut task).await {
        Ok(joined) => Some(joined),
        Err(_) => {
            task.abort();
            None
        }
    }
}
