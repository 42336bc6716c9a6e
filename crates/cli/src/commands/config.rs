use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use reimburse_core::config::{resolve_config_path, AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

use crate::commands::{CommandResult, EXIT_CONFIG, EXIT_OK};

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::text(EXIT_CONFIG, format!("config validation failed: {error}"))
        }
    };

    CommandResult::text(EXIT_OK, render(&config, resolve_config_path(None)))
}

fn render(config: &AppConfig, config_file_path: Option<PathBuf>) -> String {
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let source = |key_path: &str, env_key: &str| {
        field_source(key_path, env_key, config_file_doc.as_ref(), config_file_path.as_deref())
    };

    let api_key = match &config.currency.api_key {
        Some(key) => redact_secret(key.expose_secret()),
        None => "<unset>".to_string(),
    };
    let static_rates = if config.currency.static_rates.is_empty() {
        "<none>".to_string()
    } else {
        config
            .currency
            .static_rates
            .iter()
            .map(|(pair, rate)| format!("{pair}={rate}"))
            .collect::<Vec<_>>()
            .join(",")
    };

    let entries: [(&str, String, &str); 15] = [
        ("database.url", config.database.url.clone(), "REIMBURSE_DATABASE_URL"),
        (
            "database.max_connections",
            config.database.max_connections.to_string(),
            "REIMBURSE_DATABASE_MAX_CONNECTIONS",
        ),
        (
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            "REIMBURSE_DATABASE_TIMEOUT_SECS",
        ),
        ("server.bind_address", config.server.bind_address.clone(), "REIMBURSE_SERVER_BIND_ADDRESS"),
        ("server.port", config.server.port.to_string(), "REIMBURSE_SERVER_PORT"),
        (
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs.to_string(),
            "REIMBURSE_SERVER_GRACEFUL_SHUTDOWN_SECS",
        ),
        (
            "currency.provider",
            config.currency.provider.as_str().to_string(),
            "REIMBURSE_CURRENCY_PROVIDER",
        ),
        ("currency.base_url", config.currency.base_url.clone(), "REIMBURSE_CURRENCY_BASE_URL"),
        ("currency.api_key", api_key, "REIMBURSE_CURRENCY_API_KEY"),
        (
            "currency.timeout_secs",
            config.currency.timeout_secs.to_string(),
            "REIMBURSE_CURRENCY_TIMEOUT_SECS",
        ),
        (
            "currency.cache_ttl_secs",
            config.currency.cache_ttl_secs.to_string(),
            "REIMBURSE_CURRENCY_CACHE_TTL_SECS",
        ),
        ("currency.static_rates", static_rates, "REIMBURSE_CURRENCY_STATIC_RATES"),
        (
            "workflow.evaluate_rules_on_action",
            config.workflow.evaluate_rules_on_action.to_string(),
            "REIMBURSE_WORKFLOW_EVALUATE_RULES_ON_ACTION",
        ),
        ("logging.level", config.logging.level.clone(), "REIMBURSE_LOGGING_LEVEL"),
        ("logging.format", format!("{:?}", config.logging.format), "REIMBURSE_LOGGING_FORMAT"),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    lines.extend(
        entries
            .iter()
            .map(|(key, value, env_key)| render_line(key, value, source(key, env_key))),
    );
    lines.join("\n")
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if env::var_os(env_key).is_some() {
        return format!("env ({env_key})");
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

fn redact_secret(secret: &str) -> String {
    let trimmed = secret.trim();
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
    use std::fs;

    use tempfile::TempDir;
    use toml::Value;

    use super::{contains_path, field_source, redact_secret};

    #[test]
    fn secrets_keep_only_their_prefix() {
        assert_eq!(redact_secret("rk-live-123"), "rk-***");
        assert_eq!(redact_secret("plainsecret"), "<redacted>");
        assert_eq!(redact_secret("  "), "<empty>");
    }

    #[test]
    fn file_keys_are_attributed_to_the_file() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("reimburse.toml");
        fs::write(&path, "[server]\nport = 9000\n").expect("write config");
        let doc: Value = fs::read_to_string(&path).expect("read").parse().expect("toml");

        assert!(contains_path(&doc, "server.port"));
        assert!(!contains_path(&doc, "server.bind_address"));
        let source =
            field_source("server.port", "REIMBURSE_TEST_UNSET_PORT", Some(&doc), Some(&path));
        assert_eq!(source, format!("file ({})", path.display()));
        assert_eq!(
            field_source("server.bind_address", "REIMBURSE_TEST_UNSET_BIND", Some(&doc), None),
            "default"
        );
    }
}
