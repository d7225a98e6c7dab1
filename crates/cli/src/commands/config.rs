use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use concierge_core::config::{AppConfig, LoadOptions};
use toml::Value;

use crate::commands::{CommandResult, EXIT_CONFIG};

struct ConfigSource {
    path: Option<PathBuf>,
    doc: Option<Value>,
}

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "config",
                "config_validation",
                format!("config validation failed: {error}"),
                EXIT_CONFIG,
            );
        }
    };

    let path = detect_config_path();
    let source = ConfigSource { doc: load_config_file_doc(path.as_deref()), path };

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key_path, value, env_keys) in effective_values(&config) {
        lines.push(render_line(key_path, &value, field_source(key_path, env_keys, &source)));
    }

    CommandResult { exit_code: 0, output: lines.join("\n") }
}

type ConfigRow = (&'static str, String, &'static [&'static str]);

fn row(key_path: &'static str, value: String, env_keys: &'static [&'static str]) -> ConfigRow {
    (key_path, value, env_keys)
}

fn effective_values(config: &AppConfig) -> Vec<ConfigRow> {
    let capabilities = &config.capabilities;
    let breaker = &config.circuit_breaker.defaults;
    let api_token = if capabilities.api_token.is_some() { "<redacted>" } else { "<unset>" };

    vec![
        row("database.url", config.database.url.clone(), &["CONCIERGE_DATABASE_URL"]),
        row(
            "database.max_connections",
            config.database.max_connections.to_string(),
            &["CONCIERGE_DATABASE_MAX_CONNECTIONS"],
        ),
        row(
            "server.bind_address",
            config.server.bind_address.clone(),
            &["CONCIERGE_SERVER_BIND_ADDRESS"],
        ),
        row("server.port", config.server.port.to_string(), &["CONCIERGE_SERVER_PORT"]),
        row("capabilities.order_url", capabilities.order_url.clone(), &["CONCIERGE_ORDER_URL"]),
        row("capabilities.refund_url", capabilities.refund_url.clone(), &["CONCIERGE_REFUND_URL"]),
        row(
            "capabilities.generation_url",
            capabilities.generation_url.clone(),
            &["CONCIERGE_GENERATION_URL"],
        ),
        row(
            "capabilities.handoff_url",
            capabilities.handoff_url.clone(),
            &["CONCIERGE_HANDOFF_URL"],
        ),
        row(
            "capabilities.conversation_url",
            capabilities.conversation_url.clone(),
            &["CONCIERGE_CONVERSATION_URL"],
        ),
        row(
            "capabilities.generation_timeout_ms",
            capabilities.generation_timeout_ms.to_string(),
            &["CONCIERGE_GENERATION_TIMEOUT_MS"],
        ),
        row("capabilities.api_token", api_token.to_string(), &["CONCIERGE_CAPABILITY_API_TOKEN"]),
        row(
            "circuit_breaker.failure_threshold",
            breaker.failure_threshold.to_string(),
            &["CONCIERGE_BREAKER_FAILURE_THRESHOLD"],
        ),
        row(
            "circuit_breaker.reset_timeout_secs",
            breaker.reset_timeout_secs.to_string(),
            &["CONCIERGE_BREAKER_RESET_TIMEOUT_SECS"],
        ),
        row(
            "circuit_breaker.half_open_trial_count",
            breaker.half_open_trial_count.to_string(),
            &["CONCIERGE_BREAKER_HALF_OPEN_TRIAL_COUNT"],
        ),
        row(
            "routing.confidence_threshold",
            config.routing.confidence_threshold.to_string(),
            &["CONCIERGE_ROUTING_CONFIDENCE_THRESHOLD"],
        ),
        row(
            "escalation.trigger_phrases",
            config.escalation.trigger_phrases.join(", "),
            &["CONCIERGE_ESCALATION_TRIGGER_PHRASES"],
        ),
        row(
            "escalation.delivery",
            format!("{:?}", config.escalation.delivery),
            &["CONCIERGE_ESCALATION_DELIVERY"],
        ),
        row(
            "conversation.backend",
            format!("{:?}", config.conversation.backend),
            &["CONCIERGE_CONVERSATION_BACKEND"],
        ),
        row(
            "conversation.retention_hours",
            config.conversation.retention_hours.to_string(),
            &["CONCIERGE_CONVERSATION_RETENTION_HOURS"],
        ),
        row(
            "side_effects.mode",
            format!("{:?}", config.side_effects.mode),
            &["CONCIERGE_SIDE_EFFECTS_MODE"],
        ),
        row(
            "logging.level",
            config.logging.level.clone(),
            &["CONCIERGE_LOGGING_LEVEL", "CONCIERGE_LOG_LEVEL"],
        ),
        row(
            "logging.format",
            format!("{:?}", config.logging.format),
            &["CONCIERGE_LOGGING_FORMAT", "CONCIERGE_LOG_FORMAT"],
        ),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("concierge.toml"), PathBuf::from("config/concierge.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(key_path: &str, env_keys: &[&str], source: &ConfigSource) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = &source.doc {
        if contains_path(doc, key_path) {
            let file_path = source
                .path
                .as_ref()
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}
