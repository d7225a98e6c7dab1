use concierge_core::config::{AppConfig, LoadOptions};
use concierge_db::{connect_with_config, migrations, DbPool};
use serde::Serialize;

use crate::commands::{
    current_thread_runtime, CommandFailure, CommandResult, EXIT_CONFIG, EXIT_DB_CONNECT,
    EXIT_MIGRATION,
};

const COMMAND: &str = "migrate";

#[derive(Debug, Serialize)]
struct MigrationReport {
    database_url: String,
    known: usize,
    applied_before: i64,
    applied_after: i64,
}

impl MigrationReport {
    fn newly_applied(&self) -> i64 {
        self.applied_after - self.applied_before
    }

    fn message(&self) -> String {
        match self.newly_applied() {
            0 => format!(
                "schema already current ({} of {} migrations)",
                self.applied_after, self.known
            ),
            count => format!(
                "applied {count} pending migration(s); {} of {} now applied",
                self.applied_after, self.known
            ),
        }
    }
}

pub fn run() -> CommandResult {
    match migrate() {
        Ok(report) => CommandResult::success_with(COMMAND, report.message(), &report),
        Err(failure) => failure.into_result(COMMAND),
    }
}

fn migrate() -> Result<MigrationReport, CommandFailure> {
    let config = AppConfig::load(LoadOptions::default()).map_err(|error| {
        CommandFailure::new("config_validation", format!("configuration issue: {error}"), EXIT_CONFIG)
    })?;

    current_thread_runtime()?.block_on(async {
        let pool = connect_with_config(&config.database).await.map_err(|error| {
            CommandFailure::new("db_connectivity", error.to_string(), EXIT_DB_CONNECT)
        })?;
        let outcome = apply(&pool).await;
        pool.close().await;
        let (applied_before, applied_after) = outcome?;

        Ok(MigrationReport {
            database_url: config.database.url.clone(),
            known: migrations::known_count(),
            applied_before,
            applied_after,
        })
    })
}

async fn apply(pool: &DbPool) -> Result<(i64, i64), CommandFailure> {
    let before = migrations::applied_count(pool).await.map_err(migration_failure)?;
    migrations::run_pending(pool).await.map_err(migration_failure)?;
    let after = migrations::applied_count(pool).await.map_err(migration_failure)?;
    Ok((before, after))
}

fn migration_failure(error: impl std::fmt::Display) -> CommandFailure {
    CommandFailure::new("migration", error.to_string(), EXIT_MIGRATION)
}
