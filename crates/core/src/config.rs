use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::capability::Endpoint;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub capabilities: CapabilitiesConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub routing: RoutingConfig,
    pub escalation: EscalationConfig,
    pub conversation: ConversationConfig,
    pub side_effects: SideEffectsConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct CapabilitiesConfig {
    pub order_url: String,
    pub refund_url: String,
    pub generation_url: String,
    pub handoff_url: String,
    pub conversation_url: String,
    pub order_timeout_ms: u64,
    pub refund_timeout_ms: u64,
    pub generation_timeout_ms: u64,
    pub handoff_timeout_ms: u64,
    pub conversation_timeout_ms: u64,
    pub api_token: Option<SecretString>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub reset_timeout_secs: u64,
    pub half_open_trial_count: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct BreakerOverride {
    pub failure_threshold: Option<u32>,
    pub reset_timeout_secs: Option<u64>,
    pub half_open_trial_count: Option<u32>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct EndpointBreakerOverrides {
    pub order_lookup: Option<BreakerOverride>,
    pub refund_initiate: Option<BreakerOverride>,
    pub generate: Option<BreakerOverride>,
    pub escalate: Option<BreakerOverride>,
    pub conversation_append: Option<BreakerOverride>,
}

#[derive(Clone, Debug)]
pub struct CircuitBreakerConfig {
    pub defaults: BreakerSettings,
    pub endpoints: EndpointBreakerOverrides,
}

#[derive(Clone, Debug)]
pub struct RoutingConfig {
    pub confidence_threshold: f64,
}

#[derive(Clone, Debug)]
pub struct EscalationConfig {
    pub trigger_phrases: Vec<String>,
    pub hold_message: String,
    pub delivery: EscalationDelivery,
    pub queue_capacity: usize,
}

#[derive(Clone, Debug)]
pub struct ConversationConfig {
    pub backend: ConversationBackend,
    pub retention_hours: u64,
    pub history_limit: u32,
}

#[derive(Clone, Debug)]
pub struct SideEffectsConfig {
    pub mode: SideEffectMode,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationDelivery {
    Direct,
    Queued,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationBackend {
    Sqlite,
    Http,
}

/// Whether escalation notify and persistence run before the response is
/// returned (`Inline`) or on a spawned task (`Detached`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SideEffectMode {
    Detached,
    Inline,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub server_port: Option<u16>,
    pub order_url: Option<String>,
    pub refund_url: Option<String>,
    pub generation_url: Option<String>,
    pub handoff_url: Option<String>,
    pub conversation_url: Option<String>,
    pub conversation_backend: Option<ConversationBackend>,
    pub escalation_delivery: Option<EscalationDelivery>,
    pub side_effect_mode: Option<SideEffectMode>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

pub const DEFAULT_TRIGGER_PHRASES: [&str; 4] =
    ["speak to human", "agent", "representative", "manager"];

pub const DEFAULT_HOLD_MESSAGE: &str = "I'm connecting you with a human agent. Please wait...";

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://concierge.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            capabilities: CapabilitiesConfig {
                order_url: "http://order-service:8005".to_string(),
                refund_url: "http://refund-service:8006".to_string(),
                generation_url: "http://llm-service:8007".to_string(),
                handoff_url: "http://handoff-service:8008".to_string(),
                conversation_url: "http://conversation-service:8003".to_string(),
                order_timeout_ms: 10_000,
                refund_timeout_ms: 10_000,
                generation_timeout_ms: 60_000,
                handoff_timeout_ms: 5_000,
                conversation_timeout_ms: 5_000,
                api_token: None,
            },
            circuit_breaker: CircuitBreakerConfig {
                defaults: BreakerSettings {
                    failure_threshold: 5,
                    reset_timeout_secs: 60,
                    half_open_trial_count: 3,
                },
                endpoints: EndpointBreakerOverrides::default(),
            },
            routing: RoutingConfig { confidence_threshold: 0.7 },
            escalation: EscalationConfig {
                trigger_phrases: DEFAULT_TRIGGER_PHRASES.iter().map(|p| p.to_string()).collect(),
                hold_message: DEFAULT_HOLD_MESSAGE.to_string(),
                delivery: EscalationDelivery::Direct,
                queue_capacity: 256,
            },
            conversation: ConversationConfig {
                backend: ConversationBackend::Sqlite,
                retention_hours: 24,
                history_limit: 10,
            },
            side_effects: SideEffectsConfig { mode: SideEffectMode::Detached },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl std::str::FromStr for EscalationDelivery {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "direct" => Ok(Self::Direct),
            "queued" => Ok(Self::Queued),
            other => Err(ConfigError::Validation(format!(
                "unsupported escalation delivery `{other}` (expected direct|queued)"
            ))),
        }
    }
}

impl std::str::FromStr for ConversationBackend {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "http" => Ok(Self::Http),
            other => Err(ConfigError::Validation(format!(
                "unsupported conversation backend `{other}` (expected sqlite|http)"
            ))),
        }
    }
}

impl std::str::FromStr for SideEffectMode {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "detached" => Ok(Self::Detached),
            "inline" => Ok(Self::Inline),
            other => Err(ConfigError::Validation(format!(
                "unsupported side effect mode `{other}` (expected detached|inline)"
            ))),
        }
    }
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self { failure_threshold: 5, reset_timeout_secs: 60, half_open_trial_count: 3 }
    }
}

impl BreakerSettings {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_secs(self.reset_timeout_secs)
    }

    fn with_override(self, patch: Option<BreakerOverride>) -> Self {
        let Some(patch) = patch else {
            return self;
        };
        Self {
            failure_threshold: patch.failure_threshold.unwrap_or(self.failure_threshold),
            reset_timeout_secs: patch.reset_timeout_secs.unwrap_or(self.reset_timeout_secs),
            half_open_trial_count: patch
                .half_open_trial_count
                .unwrap_or(self.half_open_trial_count),
        }
    }
}

impl EndpointBreakerOverrides {
    pub fn get(&self, endpoint: Endpoint) -> Option<BreakerOverride> {
        match endpoint {
            Endpoint::OrderLookup => self.order_lookup,
            Endpoint::RefundInitiate => self.refund_initiate,
            Endpoint::Generate => self.generate,
            Endpoint::Escalate => self.escalate,
            Endpoint::ConversationAppend => self.conversation_append,
        }
    }
}

impl CircuitBreakerConfig {
    /// Defaults with any per-endpoint override applied field by field.
    pub fn settings_for(&self, endpoint: Endpoint) -> BreakerSettings {
        self.defaults.with_override(self.endpoints.get(endpoint))
    }
}

impl CapabilitiesConfig {
    pub fn timeout_for(&self, endpoint: Endpoint) -> Duration {
        let millis = match endpoint {
            Endpoint::OrderLookup => self.order_timeout_ms,
            Endpoint::RefundInitiate => self.refund_timeout_ms,
            Endpoint::Generate => self.generation_timeout_ms,
            Endpoint::Escalate => self.handoff_timeout_ms,
            Endpoint::ConversationAppend => self.conversation_timeout_ms,
        };
        Duration::from_millis(millis)
    }

    pub fn base_url(&self, endpoint: Endpoint) -> &str {
        match endpoint {
            Endpoint::OrderLookup => &self.order_url,
            Endpoint::RefundInitiate => &self.refund_url,
            Endpoint::Generate => &self.generation_url,
            Endpoint::Escalate => &self.handoff_url,
            Endpoint::ConversationAppend => &self.conversation_url,
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from("concierge.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(capabilities) = patch.capabilities {
            let target = &mut self.capabilities;
            if let Some(value) = capabilities.order_url {
                target.order_url = value;
            }
            if let Some(value) = capabilities.refund_url {
                target.refund_url = value;
            }
            if let Some(value) = capabilities.generation_url {
                target.generation_url = value;
            }
            if let Some(value) = capabilities.handoff_url {
                target.handoff_url = value;
            }
            if let Some(value) = capabilities.conversation_url {
                target.conversation_url = value;
            }
            if let Some(value) = capabilities.order_timeout_ms {
                target.order_timeout_ms = value;
            }
            if let Some(value) = capabilities.refund_timeout_ms {
                target.refund_timeout_ms = value;
            }
            if let Some(value) = capabilities.generation_timeout_ms {
                target.generation_timeout_ms = value;
            }
            if let Some(value) = capabilities.handoff_timeout_ms {
                target.handoff_timeout_ms = value;
            }
            if let Some(value) = capabilities.conversation_timeout_ms {
                target.conversation_timeout_ms = value;
            }
            if let Some(api_token_value) = capabilities.api_token {
                target.api_token = Some(secret_value(api_token_value));
            }
        }

        if let Some(breaker) = patch.circuit_breaker {
            if let Some(value) = breaker.failure_threshold {
                self.circuit_breaker.defaults.failure_threshold = value;
            }
            if let Some(value) = breaker.reset_timeout_secs {
                self.circuit_breaker.defaults.reset_timeout_secs = value;
            }
            if let Some(value) = breaker.half_open_trial_count {
                self.circuit_breaker.defaults.half_open_trial_count = value;
            }
            if let Some(endpoints) = breaker.endpoints {
                self.circuit_breaker.endpoints = endpoints;
            }
        }

        if let Some(routing) = patch.routing {
            if let Some(value) = routing.confidence_threshold {
                self.routing.confidence_threshold = value;
            }
        }

        if let Some(escalation) = patch.escalation {
            if let Some(value) = escalation.trigger_phrases {
                self.escalation.trigger_phrases = value;
            }
            if let Some(value) = escalation.hold_message {
                self.escalation.hold_message = value;
            }
            if let Some(value) = escalation.delivery {
                self.escalation.delivery = value;
            }
            if let Some(value) = escalation.queue_capacity {
                self.escalation.queue_capacity = value;
            }
        }

        if let Some(conversation) = patch.conversation {
            if let Some(value) = conversation.backend {
                self.conversation.backend = value;
            }
            if let Some(value) = conversation.retention_hours {
                self.conversation.retention_hours = value;
            }
            if let Some(value) = conversation.history_limit {
                self.conversation.history_limit = value;
            }
        }

        if let Some(side_effects) = patch.side_effects {
            if let Some(mode) = side_effects.mode {
                self.side_effects.mode = mode;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("CONCIERGE_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("CONCIERGE_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("CONCIERGE_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("CONCIERGE_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("CONCIERGE_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("CONCIERGE_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("CONCIERGE_SERVER_PORT") {
            self.server.port = parse_u16("CONCIERGE_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("CONCIERGE_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("CONCIERGE_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("CONCIERGE_ORDER_URL") {
            self.capabilities.order_url = value;
        }
        if let Some(value) = read_env("CONCIERGE_REFUND_URL") {
            self.capabilities.refund_url = value;
        }
        if let Some(value) = read_env("CONCIERGE_GENERATION_URL") {
            self.capabilities.generation_url = value;
        }
        if let Some(value) = read_env("CONCIERGE_HANDOFF_URL") {
            self.capabilities.handoff_url = value;
        }
        if let Some(value) = read_env("CONCIERGE_CONVERSATION_URL") {
            self.capabilities.conversation_url = value;
        }
        if let Some(value) = read_env("CONCIERGE_GENERATION_TIMEOUT_MS") {
            self.capabilities.generation_timeout_ms =
                parse_u64("CONCIERGE_GENERATION_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = read_env("CONCIERGE_CAPABILITY_API_TOKEN") {
            self.capabilities.api_token = Some(secret_value(value));
        }

        if let Some(value) = read_env("CONCIERGE_BREAKER_FAILURE_THRESHOLD") {
            self.circuit_breaker.defaults.failure_threshold =
                parse_u32("CONCIERGE_BREAKER_FAILURE_THRESHOLD", &value)?;
        }
        if let Some(value) = read_env("CONCIERGE_BREAKER_RESET_TIMEOUT_SECS") {
            self.circuit_breaker.defaults.reset_timeout_secs =
                parse_u64("CONCIERGE_BREAKER_RESET_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("CONCIERGE_BREAKER_HALF_OPEN_TRIAL_COUNT") {
            self.circuit_breaker.defaults.half_open_trial_count =
                parse_u32("CONCIERGE_BREAKER_HALF_OPEN_TRIAL_COUNT", &value)?;
        }

        if let Some(value) = read_env("CONCIERGE_ROUTING_CONFIDENCE_THRESHOLD") {
            self.routing.confidence_threshold =
                parse_f64("CONCIERGE_ROUTING_CONFIDENCE_THRESHOLD", &value)?;
        }

        if let Some(value) = read_env("CONCIERGE_ESCALATION_TRIGGER_PHRASES") {
            self.escalation.trigger_phrases = value
                .split(',')
                .map(str::trim)
                .filter(|phrase| !phrase.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(value) = read_env("CONCIERGE_ESCALATION_HOLD_MESSAGE") {
            self.escalation.hold_message = value;
        }
        if let Some(value) = read_env("CONCIERGE_ESCALATION_DELIVERY") {
            self.escalation.delivery = value.parse()?;
        }
        if let Some(value) = read_env("CONCIERGE_ESCALATION_QUEUE_CAPACITY") {
            self.escalation.queue_capacity =
                parse_usize("CONCIERGE_ESCALATION_QUEUE_CAPACITY", &value)?;
        }

        if let Some(value) = read_env("CONCIERGE_CONVERSATION_BACKEND") {
            self.conversation.backend = value.parse()?;
        }
        if let Some(value) = read_env("CONCIERGE_CONVERSATION_RETENTION_HOURS") {
            self.conversation.retention_hours =
                parse_u64("CONCIERGE_CONVERSATION_RETENTION_HOURS", &value)?;
        }

        if let Some(value) = read_env("CONCIERGE_SIDE_EFFECTS_MODE") {
            self.side_effects.mode = value.parse()?;
        }

        let log_level =
            read_env("CONCIERGE_LOGGING_LEVEL").or_else(|| read_env("CONCIERGE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("CONCIERGE_LOGGING_FORMAT").or_else(|| read_env("CONCIERGE_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
        if let Some(order_url) = overrides.order_url {
            self.capabilities.order_url = order_url;
        }
        if let Some(refund_url) = overrides.refund_url {
            self.capabilities.refund_url = refund_url;
        }
        if let Some(generation_url) = overrides.generation_url {
            self.capabilities.generation_url = generation_url;
        }
        if let Some(handoff_url) = overrides.handoff_url {
            self.capabilities.handoff_url = handoff_url;
        }
        if let Some(conversation_url) = overrides.conversation_url {
            self.capabilities.conversation_url = conversation_url;
        }
        if let Some(backend) = overrides.conversation_backend {
            self.conversation.backend = backend;
        }
        if let Some(delivery) = overrides.escalation_delivery {
            self.escalation.delivery = delivery;
        }
        if let Some(mode) = overrides.side_effect_mode {
            self.side_effects.mode = mode;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_capabilities(&self.capabilities)?;
        validate_circuit_breaker(&self.circuit_breaker)?;
        validate_routing(&self.routing)?;
        validate_escalation(&self.escalation)?;
        validate_conversation(&self.conversation)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("concierge.toml"), PathBuf::from("config/concierge.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_capabilities(capabilities: &CapabilitiesConfig) -> Result<(), ConfigError> {
    for endpoint in Endpoint::ALL {
        let base_url = capabilities.base_url(endpoint);
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::Validation(format!(
                "capabilities url for `{endpoint}` must start with http:// or https://"
            )));
        }

        let timeout_ms = capabilities.timeout_for(endpoint).as_millis();
        if timeout_ms == 0 || timeout_ms > 300_000 {
            return Err(ConfigError::Validation(format!(
                "capabilities timeout for `{endpoint}` must be in range 1..=300000 ms"
            )));
        }
    }

    if let Some(token) = &capabilities.api_token {
        if token.expose_secret().trim().is_empty() {
            return Err(ConfigError::Validation(
                "capabilities.api_token must not be blank when set".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_circuit_breaker(breaker: &CircuitBreakerConfig) -> Result<(), ConfigError> {
    for endpoint in Endpoint::ALL {
        let settings = breaker.settings_for(endpoint);
        if settings.failure_threshold == 0 {
            return Err(ConfigError::Validation(format!(
                "circuit_breaker.failure_threshold for `{endpoint}` must be greater than zero"
            )));
        }
        if settings.reset_timeout_secs == 0 {
            return Err(ConfigError::Validation(format!(
                "circuit_breaker.reset_timeout_secs for `{endpoint}` must be greater than zero"
            )));
        }
        if settings.half_open_trial_count == 0 {
            return Err(ConfigError::Validation(format!(
                "circuit_breaker.half_open_trial_count for `{endpoint}` must be greater than zero"
            )));
        }
    }

    Ok(())
}

fn validate_routing(routing: &RoutingConfig) -> Result<(), ConfigError> {
    let threshold = routing.confidence_threshold;
    if !threshold.is_finite() || !(0.0..=1.0).contains(&threshold) {
        return Err(ConfigError::Validation(
            "routing.confidence_threshold must be within 0.0..=1.0".to_string(),
        ));
    }
    Ok(())
}

fn validate_escalation(escalation: &EscalationConfig) -> Result<(), ConfigError> {
    if escalation.trigger_phrases.iter().any(|phrase| phrase.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "escalation.trigger_phrases must not contain blank phrases".to_string(),
        ));
    }

    if escalation.hold_message.trim().is_empty() {
        return Err(ConfigError::Validation(
            "escalation.hold_message must not be empty".to_string(),
        ));
    }

    if escalation.queue_capacity == 0 {
        return Err(ConfigError::Validation(
            "escalation.queue_capacity must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_conversation(conversation: &ConversationConfig) -> Result<(), ConfigError> {
    if conversation.retention_hours == 0 {
        return Err(ConfigError::Validation(
            "conversation.retention_hours must be greater than zero".to_string(),
        ));
    }

    if conversation.history_limit == 0 || conversation.history_limit > 100 {
        return Err(ConfigError::Validation(
            "conversation.history_limit must be in range 1..=100".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn invalid_override(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| invalid_override(key, value))
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| invalid_override(key, value))
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| invalid_override(key, value))
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| invalid_override(key, value))
}

fn parse_f64(key: &str, value: &str) -> Result<f64, ConfigError> {
    value.parse::<f64>().map_err(|_| invalid_override(key, value))
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    capabilities: Option<CapabilitiesPatch>,
    circuit_breaker: Option<CircuitBreakerPatch>,
    routing: Option<RoutingPatch>,
    escalation: Option<EscalationPatch>,
    conversation: Option<ConversationPatch>,
    side_effects: Option<SideEffectsPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct CapabilitiesPatch {
    order_url: Option<String>,
    refund_url: Option<String>,
    generation_url: Option<String>,
    handoff_url: Option<String>,
    conversation_url: Option<String>,
    order_timeout_ms: Option<u64>,
    refund_timeout_ms: Option<u64>,
    generation_timeout_ms: Option<u64>,
    handoff_timeout_ms: Option<u64>,
    conversation_timeout_ms: Option<u64>,
    api_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CircuitBreakerPatch {
    failure_threshold: Option<u32>,
    reset_timeout_secs: Option<u64>,
    half_open_trial_count: Option<u32>,
    endpoints: Option<EndpointBreakerOverrides>,
}

#[derive(Debug, Default, Deserialize)]
struct RoutingPatch {
    confidence_threshold: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct EscalationPatch {
    trigger_phrases: Option<Vec<String>>,
    hold_message: Option<String>,
    delivery: Option<EscalationDelivery>,
    queue_capacity: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct ConversationPatch {
    backend: Option<ConversationBackend>,
    retention_hours: Option<u64>,
    history_limit: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct SideEffectsPatch {
    mode: Option<SideEffectMode>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
