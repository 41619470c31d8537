use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use consult_core::config::{AppConfig, LoadOptions};
use secrecy::{ExposeSecret, SecretString};
use toml::Value;

/// One rendered config key with the environment variable that can override it.
struct Field {
    key: &'static str,
    env_key: &'static str,
    value: String,
}

impl Field {
    fn new(key: &'static str, env_key: &'static str, value: impl Into<String>) -> Self {
        Self { key, env_key, value: value.into() }
    }
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in fields(&config) {
        let source = field_source(
            field.key,
            Some(field.env_key),
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(field.key, &field.value, source));
    }

    lines.join("\n")
}

fn fields(config: &AppConfig) -> Vec<Field> {
    vec![
        Field::new("database.url", "CONSULT_DATABASE_URL", config.database.url.clone()),
        Field::new(
            "database.max_connections",
            "CONSULT_DATABASE_MAX_CONNECTIONS",
            config.database.max_connections.to_string(),
        ),
        Field::new(
            "database.timeout_secs",
            "CONSULT_DATABASE_TIMEOUT_SECS",
            config.database.timeout_secs.to_string(),
        ),
        Field::new(
            "server.bind_address",
            "CONSULT_SERVER_BIND_ADDRESS",
            config.server.bind_address.clone(),
        ),
        Field::new("server.port", "CONSULT_SERVER_PORT", config.server.port.to_string()),
        Field::new(
            "server.health_check_port",
            "CONSULT_SERVER_HEALTH_CHECK_PORT",
            config.server.health_check_port.to_string(),
        ),
        Field::new(
            "server.graceful_shutdown_secs",
            "CONSULT_SERVER_GRACEFUL_SHUTDOWN_SECS",
            config.server.graceful_shutdown_secs.to_string(),
        ),
        Field::new(
            "auth.shared_secret",
            "CONSULT_AUTH_SHARED_SECRET",
            redact_secret(config.auth.shared_secret.as_ref()),
        ),
        Field::new("workflow.fan_out", "CONSULT_WORKFLOW_FAN_OUT", config.workflow.fan_out.to_string()),
        Field::new(
            "workflow.offer_ttl_minutes",
            "CONSULT_WORKFLOW_OFFER_TTL_MINUTES",
            config.workflow.offer_ttl_minutes.to_string(),
        ),
        Field::new(
            "workflow.advisor_share_pct",
            "CONSULT_WORKFLOW_ADVISOR_SHARE_PCT",
            config.workflow.advisor_share_pct.to_string(),
        ),
        Field::new(
            "workflow.default_currency",
            "CONSULT_WORKFLOW_DEFAULT_CURRENCY",
            config.workflow.default_currency.clone(),
        ),
        Field::new("payment.gateway", "CONSULT_PAYMENT_GATEWAY", config.payment.gateway.as_str()),
        Field::new(
            "payment.endpoint",
            "CONSULT_PAYMENT_ENDPOINT",
            config.payment.endpoint.as_deref().unwrap_or("<unset>"),
        ),
        Field::new(
            "payment.api_key",
            "CONSULT_PAYMENT_API_KEY",
            redact_secret(config.payment.api_key.as_ref()),
        ),
        Field::new(
            "payment.timeout_secs",
            "CONSULT_PAYMENT_TIMEOUT_SECS",
            config.payment.timeout_secs.to_string(),
        ),
        Field::new("logging.level", "CONSULT_LOGGING_LEVEL", config.logging.level.clone()),
        Field::new(
            "logging.format",
            "CONSULT_LOGGING_FORMAT",
            format!("{:?}", config.logging.format),
        ),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("consult.toml"), PathBuf::from("config/consult.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
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

/// Shows only that a secret is present, plus its prefix when it has one (`pk-***`).
fn redact_secret(secret: Option<&SecretString>) -> String {
    let Some(secret) = secret else {
        return "<unset>".to_string();
    };
    let trimmed = secret.expose_secret().trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }

    "<redacted>".to_string()
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;

    use super::{contains_path, redact_secret};

    #[test]
    fn secrets_are_redacted_to_prefix() {
        assert_eq!(redact_secret(Some(&SecretString::from("pk-live-123"))), "pk-***");
        assert_eq!(redact_secret(Some(&SecretString::from("opaque"))), "<redacted>");
        assert_eq!(redact_secret(None), "<unset>");
    }

    #[test]
    fn nested_keys_are_found_in_toml_documents() {
        let doc = "[workflow]\nfan_out = 4\n".parse::<toml::Value>().expect("toml");

        assert!(contains_path(&doc, "workflow.fan_out"));
        assert!(!contains_path(&doc, "workflow.offer_ttl_minutes"));
        assert!(!contains_path(&doc, "payment.gateway"));
    }
}
