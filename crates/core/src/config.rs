use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub workflow: WorkflowConfig,
    pub payment: PaymentConfig,
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
    pub health_check_port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug, Default)]
pub struct AuthConfig {
    pub shared_secret: Option<SecretString>,
}

#[derive(Clone, Debug)]
pub struct WorkflowConfig {
    pub fan_out: u32,
    pub offer_ttl_minutes: u64,
    pub advisor_share_pct: u32,
    pub default_currency: String,
}

#[derive(Clone, Debug)]
pub struct PaymentConfig {
    pub gateway: PaymentGatewayKind,
    pub endpoint: Option<String>,
    pub api_key: Option<SecretString>,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentGatewayKind {
    Manual,
    Http,
}

impl PaymentGatewayKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Http => "http",
        }
    }
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
    pub workflow_fan_out: Option<u32>,
    pub offer_ttl_minutes: Option<u64>,
    pub advisor_share_pct: Option<u32>,
    pub payment_gateway: Option<PaymentGatewayKind>,
    pub auth_shared_secret: Option<String>,
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

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://consult.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 3000,
                health_check_port: 8080,
                graceful_shutdown_secs: 15,
            },
            auth: AuthConfig::default(),
            workflow: WorkflowConfig {
                fan_out: 3,
                offer_ttl_minutes: 1440,
                advisor_share_pct: 70,
                default_currency: "KWD".to_string(),
            },
            payment: PaymentConfig {
                gateway: PaymentGatewayKind::Manual,
                endpoint: None,
                api_key: None,
                timeout_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for PaymentGatewayKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "manual" => Ok(Self::Manual),
            "http" => Ok(Self::Http),
            other => Err(ConfigError::Validation(format!(
                "unsupported payment gateway `{other}` (expected manual|http)"
            ))),
        }
    }
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

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("consult.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.normalize();
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
            if let Some(health_check_port) = server.health_check_port {
                self.server.health_check_port = health_check_port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(auth) = patch.auth {
            if let Some(shared_secret) = auth.shared_secret {
                self.auth.shared_secret = Some(secret_value(shared_secret));
            }
        }

        if let Some(workflow) = patch.workflow {
            if let Some(fan_out) = workflow.fan_out {
                self.workflow.fan_out = fan_out;
            }
            if let Some(offer_ttl_minutes) = workflow.offer_ttl_minutes {
                self.workflow.offer_ttl_minutes = offer_ttl_minutes;
            }
            if let Some(advisor_share_pct) = workflow.advisor_share_pct {
                self.workflow.advisor_share_pct = advisor_share_pct;
            }
            if let Some(default_currency) = workflow.default_currency {
                self.workflow.default_currency = default_currency;
            }
        }

        if let Some(payment) = patch.payment {
            if let Some(gateway) = payment.gateway {
                self.payment.gateway = gateway;
            }
            if let Some(endpoint) = payment.endpoint {
                self.payment.endpoint = Some(endpoint);
            }
            if let Some(api_key) = payment.api_key {
                self.payment.api_key = Some(secret_value(api_key));
            }
            if let Some(timeout_secs) = payment.timeout_secs {
                self.payment.timeout_secs = timeout_secs;
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
        if let Some(value) = read_env("CONSULT_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("CONSULT_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("CONSULT_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("CONSULT_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("CONSULT_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("CONSULT_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("CONSULT_SERVER_PORT") {
            self.server.port = parse_u16("CONSULT_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("CONSULT_SERVER_HEALTH_CHECK_PORT") {
            self.server.health_check_port =
                parse_u16("CONSULT_SERVER_HEALTH_CHECK_PORT", &value)?;
        }
        if let Some(value) = read_env("CONSULT_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("CONSULT_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("CONSULT_AUTH_SHARED_SECRET") {
            self.auth.shared_secret = Some(secret_value(value));
        }

        if let Some(value) = read_env("CONSULT_WORKFLOW_FAN_OUT") {
            self.workflow.fan_out = parse_u32("CONSULT_WORKFLOW_FAN_OUT", &value)?;
        }
        if let Some(value) = read_env("CONSULT_WORKFLOW_OFFER_TTL_MINUTES") {
            self.workflow.offer_ttl_minutes =
                parse_u64("CONSULT_WORKFLOW_OFFER_TTL_MINUTES", &value)?;
        }
        if let Some(value) = read_env("CONSULT_WORKFLOW_ADVISOR_SHARE_PCT") {
            self.workflow.advisor_share_pct =
                parse_u32("CONSULT_WORKFLOW_ADVISOR_SHARE_PCT", &value)?;
        }
        if let Some(value) = read_env("CONSULT_WORKFLOW_DEFAULT_CURRENCY") {
            self.workflow.default_currency = value;
        }

        if let Some(value) = read_env("CONSULT_PAYMENT_GATEWAY") {
            self.payment.gateway = value.parse()?;
        }
        if let Some(value) = read_env("CONSULT_PAYMENT_ENDPOINT") {
            self.payment.endpoint = Some(value);
        }
        if let Some(value) = read_env("CONSULT_PAYMENT_API_KEY") {
            self.payment.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("CONSULT_PAYMENT_TIMEOUT_SECS") {
            self.payment.timeout_secs = parse_u64("CONSULT_PAYMENT_TIMEOUT_SECS", &value)?;
        }

        let log_level =
            read_env("CONSULT_LOGGING_LEVEL").or_else(|| read_env("CONSULT_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("CONSULT_LOGGING_FORMAT").or_else(|| read_env("CONSULT_LOG_FORMAT"));
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
        if let Some(fan_out) = overrides.workflow_fan_out {
            self.workflow.fan_out = fan_out;
        }
        if let Some(offer_ttl_minutes) = overrides.offer_ttl_minutes {
            self.workflow.offer_ttl_minutes = offer_ttl_minutes;
        }
        if let Some(advisor_share_pct) = overrides.advisor_share_pct {
            self.workflow.advisor_share_pct = advisor_share_pct;
        }
        if let Some(gateway) = overrides.payment_gateway {
            self.payment.gateway = gateway;
        }
        if let Some(shared_secret) = overrides.auth_shared_secret {
            self.auth.shared_secret = Some(secret_value(shared_secret));
        }
    }

    fn normalize(&mut self) {
        self.workflow.default_currency = self.workflow.default_currency.trim().to_ascii_uppercase();
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_auth(&self.auth)?;
        validate_workflow(&self.workflow)?;
        validate_payment(&self.payment)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("consult.toml"), PathBuf::from("config/consult.toml")]
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

    if server.health_check_port == 0 {
        return Err(ConfigError::Validation(
            "server.health_check_port must be greater than zero".to_string(),
        ));
    }

    if server.port == server.health_check_port {
        return Err(ConfigError::Validation(
            "server.port and server.health_check_port must differ".to_string(),
        ));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_auth(auth: &AuthConfig) -> Result<(), ConfigError> {
    let blank = auth
        .shared_secret
        .as_ref()
        .map(|secret| secret.expose_secret().trim().is_empty())
        .unwrap_or(false);
    if blank {
        return Err(ConfigError::Validation(
            "auth.shared_secret must not be blank when set".to_string(),
        ));
    }

    Ok(())
}

fn validate_workflow(workflow: &WorkflowConfig) -> Result<(), ConfigError> {
    if workflow.fan_out == 0 || workflow.fan_out > 20 {
        return Err(ConfigError::Validation(
            "workflow.fan_out must be in range 1..=20".to_string(),
        ));
    }

    if workflow.offer_ttl_minutes == 0 {
        return Err(ConfigError::Validation(
            "workflow.offer_ttl_minutes must be greater than zero".to_string(),
        ));
    }

    if workflow.advisor_share_pct > 100 {
        return Err(ConfigError::Validation(
            "workflow.advisor_share_pct must be in range 0..=100".to_string(),
        ));
    }

    let currency = workflow.default_currency.as_str();
    if currency.len() != 3 || !currency.chars().all(|ch| ch.is_ascii_uppercase()) {
        return Err(ConfigError::Validation(
            "workflow.default_currency must be a three-letter ISO-4217 code".to_string(),
        ));
    }

    Ok(())
}

fn validate_payment(payment: &PaymentConfig) -> Result<(), ConfigError> {
    if payment.timeout_secs == 0 || payment.timeout_secs > 120 {
        return Err(ConfigError::Validation(
            "payment.timeout_secs must be in range 1..=120".to_string(),
        ));
    }

    if let Some(endpoint) = &payment.endpoint {
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(ConfigError::Validation(
                "payment.endpoint must start with http:// or https://".to_string(),
            ));
        }
    }

    if payment.gateway == PaymentGatewayKind::Http {
        if payment.endpoint.is_none() {
            return Err(ConfigError::Validation(
                "payment.endpoint is required for the http gateway".to_string(),
            ));
        }
        let missing_key = payment
            .api_key
            .as_ref()
            .map(|value| value.expose_secret().trim().is_empty())
            .unwrap_or(true);
        if missing_key {
            return Err(ConfigError::Validation(
                "payment.api_key is required for the http gateway".to_string(),
            ));
        }
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

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    auth: Option<AuthPatch>,
    workflow: Option<WorkflowPatch>,
    payment: Option<PaymentPatch>,
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
    health_check_port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct AuthPatch {
    shared_secret: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WorkflowPatch {
    fan_out: Option<u32>,
    offer_ttl_minutes: Option<u64>,
    advisor_share_pct: Option<u32>,
    default_currency: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PaymentPatch {
    gateway: Option<PaymentGatewayKind>,
    endpoint: Option<String>,
    api_key: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
