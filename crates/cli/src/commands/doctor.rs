use concierge_core::capability::Endpoint;
use concierge_core::config::{AppConfig, LoadOptions};
use concierge_db::{connect_with_config, migrations};
use serde::Serialize;

use crate::commands::{current_thread_runtime, CommandResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

const SKIPPED_WITHOUT_CONFIG: &str = "skipped because configuration did not load";

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { 1 };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_capability_endpoints(&config));
            checks.extend(check_database(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for name in ["capability_endpoints", "database_connectivity", "migrations_applied"] {
                checks.push(DoctorCheck {
                    name,
                    status: CheckStatus::Skipped,
                    details: SKIPPED_WITHOUT_CONFIG.to_string(),
                });
            }
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

/// URLs are already validated by config loading; this lists the resolved
/// target, call timeout and breaker threshold for each endpoint.
fn check_capability_endpoints(config: &AppConfig) -> DoctorCheck {
    let mut targets: Vec<String> = Endpoint::ALL
        .iter()
        .map(|endpoint| {
            let breaker = config.circuit_breaker.settings_for(*endpoint);
            format!(
                "{endpoint}={} ({}ms, opens after {} failures)",
                config.capabilities.base_url(*endpoint),
                config.capabilities.timeout_for(*endpoint).as_millis(),
                breaker.failure_threshold,
            )
        })
        .collect();
    if config.capabilities.api_token.is_none() {
        targets.push("no bearer token configured".to_string());
    }

    DoctorCheck {
        name: "capability_endpoints",
        status: CheckStatus::Pass,
        details: targets.join("; "),
    }
}

fn check_database(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match current_thread_runtime() {
        Ok(runtime) => runtime,
        Err(failure) => {
            return vec![
                DoctorCheck {
                    name: "database_connectivity",
                    status: CheckStatus::Fail,
                    details: failure.message,
                },
                DoctorCheck {
                    name: "migrations_applied",
                    status: CheckStatus::Skipped,
                    details: "skipped because the database was not reachable".to_string(),
                },
            ];
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| format!("failed to connect to database: {error}"))?;
        let applied = migrations::applied_count(&pool).await.map_err(|error| error.to_string());
        pool.close().await;
        Ok::<_, String>(applied)
    });

    match result {
        Ok(applied) => vec![
            DoctorCheck {
                name: "database_connectivity",
                status: CheckStatus::Pass,
                details: format!("connected using `{}`", config.database.url),
            },
            check_migrations(applied),
        ],
        Err(error) => vec![
            DoctorCheck { name: "database_connectivity", status: CheckStatus::Fail, details: error },
            DoctorCheck {
                name: "migrations_applied",
                status: CheckStatus::Skipped,
                details: "skipped because the database was not reachable".to_string(),
            },
        ],
    }
}

fn check_migrations(applied: Result<i64, String>) -> DoctorCheck {
    let known = migrations::known_count();
    match applied {
        Ok(applied) if applied >= known as i64 => DoctorCheck {
            name: "migrations_applied",
            status: CheckStatus::Pass,
            details: format!("{applied} of {known} migrations applied"),
        },
        Ok(applied) => DoctorCheck {
            name: "migrations_applied",
            status: CheckStatus::Fail,
            details: format!("{applied} of {known} migrations applied; run `concierge migrate`"),
        },
        Err(error) => DoctorCheck {
            name: "migrations_applied",
            status: CheckStatus::Fail,
            details: format!("failed to read migration history: {error}"),
        },
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
