use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::currency::normalize_currency_code;

pub const DEFAULT_CONFIG_FILES: [&str; 2] = ["reimburse.toml", "config/reimburse.toml"];

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub currency: CurrencyConfig,
    pub workflow: WorkflowConfig,
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
pub struct CurrencyConfig {
    pub provider: CurrencyProvider,
    pub base_url: String,
    pub api_key: Option<SecretString>,
    pub timeout_secs: u64,
    pub cache_ttl_secs: u64,
    /// Rates keyed `FROM:TO`, consulted by the static provider.
    pub static_rates: BTreeMap<String, Decimal>,
}

#[derive(Clone, Debug)]
pub struct WorkflowConfig {
    pub evaluate_rules_on_action: bool,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurrencyProvider {
    Static,
    ExchangeRateApi,
}

impl CurrencyProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Static => "static",
            Self::ExchangeRateApi => "exchange_rate_api",
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
    pub currency_provider: Option<CurrencyProvider>,
    pub evaluate_rules_on_action: Option<bool>,
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
                url: "sqlite://reimburse.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            currency: CurrencyConfig {
                provider: CurrencyProvider::Static,
                base_url: "https://api.exchangerate-api.com/v4/latest".to_string(),
                api_key: None,
                timeout_secs: 10,
                cache_ttl_secs: 12 * 60 * 60,
                static_rates: BTreeMap::new(),
            },
            workflow: WorkflowConfig { evaluate_rules_on_action: true },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl FromStr for CurrencyProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "static" => Ok(Self::Static),
            "exchange_rate_api" | "exchangerate" => Ok(Self::ExchangeRateApi),
            other => Err(ConfigError::Validation(format!(
                "unsupported currency provider `{other}` (expected static|exchange_rate_api)"
            ))),
        }
    }
}

impl FromStr for LogFormat {
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
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILES[0]));
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

        if let Some(currency) = patch.currency {
            if let Some(provider) = currency.provider {
                self.currency.provider = provider;
            }
            if let Some(base_url) = currency.base_url {
                self.currency.base_url = base_url;
            }
            if let Some(api_key) = currency.api_key {
                self.currency.api_key = Some(secret_value(api_key));
            }
            if let Some(timeout_secs) = currency.timeout_secs {
                self.currency.timeout_secs = timeout_secs;
            }
            if let Some(cache_ttl_secs) = currency.cache_ttl_secs {
                self.currency.cache_ttl_secs = cache_ttl_secs;
            }
            if let Some(static_rates) = currency.static_rates {
                self.currency.static_rates.extend(static_rates);
            }
        }

        if let Some(workflow) = patch.workflow {
            if let Some(evaluate_rules_on_action) = workflow.evaluate_rules_on_action {
                self.workflow.evaluate_rules_on_action = evaluate_rules_on_action;
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
        if let Some(value) = read_env("REIMBURSE_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("REIMBURSE_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("REIMBURSE_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("REIMBURSE_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("REIMBURSE_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("REIMBURSE_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("REIMBURSE_SERVER_PORT") {
            self.server.port = parse_u16("REIMBURSE_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("REIMBURSE_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("REIMBURSE_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("REIMBURSE_CURRENCY_PROVIDER") {
            self.currency.provider = value.parse()?;
        }
        if let Some(value) = read_env("REIMBURSE_CURRENCY_BASE_URL") {
            self.currency.base_url = value;
        }
        if let Some(value) = read_env("REIMBURSE_CURRENCY_API_KEY") {
            self.currency.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("REIMBURSE_CURRENCY_TIMEOUT_SECS") {
            self.currency.timeout_secs = parse_u64("REIMBURSE_CURRENCY_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("REIMBURSE_CURRENCY_CACHE_TTL_SECS") {
            self.currency.cache_ttl_secs =
                parse_u64("REIMBURSE_CURRENCY_CACHE_TTL_SECS", &value)?;
        }
        if let Some(value) = read_env("REIMBURSE_CURRENCY_STATIC_RATES") {
            self.currency
                .static_rates
                .extend(parse_rate_table("REIMBURSE_CURRENCY_STATIC_RATES", &value)?);
        }

        if let Some(value) = read_env("REIMBURSE_WORKFLOW_EVALUATE_RULES_ON_ACTION") {
            self.workflow.evaluate_rules_on_action =
                parse_bool("REIMBURSE_WORKFLOW_EVALUATE_RULES_ON_ACTION", &value)?;
        }

        let log_level =
            read_env("REIMBURSE_LOGGING_LEVEL").or_else(|| read_env("REIMBURSE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("REIMBURSE_LOGGING_FORMAT").or_else(|| read_env("REIMBURSE_LOG_FORMAT"));
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
        if let Some(provider) = overrides.currency_provider {
            self.currency.provider = provider;
        }
        if let Some(evaluate_rules_on_action) = overrides.evaluate_rules_on_action {
            self.workflow.evaluate_rules_on_action = evaluate_rules_on_action;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_currency(&self.currency)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    DEFAULT_CONFIG_FILES.into_iter().map(PathBuf::from).find(|path| path.exists())
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
    if server.bind_address.trim().is_empty() {
        return Err(ConfigError::Validation("server.bind_address is required".to_string()));
    }

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

fn validate_currency(currency: &CurrencyConfig) -> Result<(), ConfigError> {
    if currency.timeout_secs == 0 || currency.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "currency.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if currency.cache_ttl_secs == 0 {
        return Err(ConfigError::Validation(
            "currency.cache_ttl_secs must be greater than zero".to_string(),
        ));
    }

    for (pair, rate) in &currency.static_rates {
        let valid_pair = pair
            .split_once(':')
            .map(|(from, to)| {
                normalize_currency_code(from).is_some() && normalize_currency_code(to).is_some()
            })
            .unwrap_or(false);
        if !valid_pair {
            return Err(ConfigError::Validation(format!(
                "currency.static_rates key `{pair}` must look like `USD:EUR`"
            )));
        }
        if *rate <= Decimal::ZERO {
            return Err(ConfigError::Validation(format!(
                "currency.static_rates `{pair}` must be positive"
            )));
        }
    }

    if currency.provider == CurrencyProvider::ExchangeRateApi {
        let base_url = currency.base_url.trim();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "currency.base_url must start with http:// or https://".to_string(),
            ));
        }
        let blank_key = currency
            .api_key
            .as_ref()
            .map(|value| value.expose_secret().trim().is_empty())
            .unwrap_or(false);
        if blank_key {
            return Err(ConfigError::Validation(
                "currency.api_key must not be blank when set".to_string(),
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

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

/// Parses `USD:INR=83.1,EUR:USD=1.08`.
fn parse_rate_table(key: &str, value: &str) -> Result<BTreeMap<String, Decimal>, ConfigError> {
    let invalid =
        || ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() };
    let mut table = BTreeMap::new();
    for entry in value.split(',').map(str::trim).filter(|entry| !entry.is_empty()) {
        let (pair, rate) = entry.split_once('=').ok_or_else(invalid)?;
        let rate = rate.trim().parse::<Decimal>().map_err(|_| invalid())?;
        table.insert(pair.trim().to_ascii_uppercase(), rate);
    }
    Ok(table)
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    currency: Option<CurrencyPatch>,
    workflow: Option<WorkflowPatch>,
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
struct CurrencyPatch {
    provider: Option<CurrencyProvider>,
    base_url: Option<String>,
    api_key: Option<String>,
    timeout_secs: Option<u64>,
    cache_ttl_secs: Option<u64>,
    static_rates: Option<BTreeMap<String, Decimal>>,
}

#[derive(Debug, Default, Deserialize)]
struct WorkflowPatch {
    evaluate_rules_on_action: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use rust_decimal::Decimal;
    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{
        AppConfig, ConfigError, ConfigOverrides, CurrencyProvider, LoadOptions, LogFormat,
    };

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_are_valid() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;
        ensure(config.server.port == 8080, "default port should be 8080")?;
        ensure(config.currency.cache_ttl_secs == 43_200, "rate cache should default to 12h")?;
        ensure(config.workflow.evaluate_rules_on_action, "rule evaluation defaults on")?;
        ensure(
            matches!(config.logging.format, LogFormat::Compact),
            "default logging format should be compact",
        )
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_RATE_API_KEY", "rk-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("reimburse.toml");
            fs::write(
                &path,
                r#"
[currency]
provider = "exchange_rate_api"
api_key = "${TEST_RATE_API_KEY}"

[currency.static_rates]
"USD:INR" = "83.10"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.currency.provider == CurrencyProvider::ExchangeRateApi,
                "provider should come from the file",
            )?;
            ensure(
                config.currency.api_key.as_ref().map(|key| key.expose_secret().to_string())
                    == Some("rk-from-env".to_string()),
                "api key should be interpolated from environment",
            )?;
            ensure(
                config.currency.static_rates.get("USD:INR") == Some(&Decimal::new(8_310, 2)),
                "static rate table should be read from the file",
            )?;
            Ok(())
        })();

        clear_vars(&["TEST_RATE_API_KEY"]);
        result
    }

    #[test]
    fn missing_interpolation_variable_is_reported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let path = dir.path().join("reimburse.toml");
        fs::write(&path, "[database]\nurl = \"${REIMBURSE_TEST_UNSET_VAR}\"\n")
            .map_err(|err| err.to_string())?;

        let error =
            match AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
            {
                Ok(_) => return Err("expected interpolation failure".to_string()),
                Err(error) => error,
            };
        ensure(
            matches!(error, ConfigError::MissingEnvInterpolation { ref var } if var == "REIMBURSE_TEST_UNSET_VAR"),
            "missing variable should be named",
        )
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("REIMBURSE_LOG_LEVEL", "warn");
        env::set_var("REIMBURSE_LOG_FORMAT", "json");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Json),
                "json logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&["REIMBURSE_LOG_LEVEL", "REIMBURSE_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("REIMBURSE_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("REIMBURSE_SERVER_PORT", "9100");
        env::set_var("REIMBURSE_CURRENCY_STATIC_RATES", "usd:eur=0.92");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("reimburse.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[server]
port = 9000

[workflow]
evaluate_rules_on_action = false

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(config.server.port == 9100, "env port should win over file")?;
            ensure(!config.workflow.evaluate_rules_on_action, "file should disable evaluation")?;
            ensure(
                config.currency.static_rates.get("USD:EUR") == Some(&Decimal::new(92, 2)),
                "env rate table should be parsed and upper-cased",
            )?;
            Ok(())
        })();

        clear_vars(&[
            "REIMBURSE_DATABASE_URL",
            "REIMBURSE_SERVER_PORT",
            "REIMBURSE_CURRENCY_STATIC_RATES",
        ]);
        result
    }

    #[test]
    fn invalid_env_override_names_the_key() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("REIMBURSE_WORKFLOW_EVALUATE_RULES_ON_ACTION", "sometimes");
        let result = match AppConfig::load(LoadOptions::default()) {
            Ok(_) => Err("expected invalid override".to_string()),
            Err(error) => ensure(
                matches!(
                    error,
                    ConfigError::InvalidEnvOverride { ref key, .. }
                        if key == "REIMBURSE_WORKFLOW_EVALUATE_RULES_ON_ACTION"
                ),
                "error should name the offending variable",
            ),
        };

        clear_vars(&["REIMBURSE_WORKFLOW_EVALUATE_RULES_ON_ACTION"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("REIMBURSE_CURRENCY_PROVIDER", "exchange_rate_api");
        env::set_var("REIMBURSE_CURRENCY_BASE_URL", "ftp://rates.example");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("currency.base_url")
            );
            ensure(has_message, "validation failure should mention currency.base_url")
        })();

        clear_vars(&["REIMBURSE_CURRENCY_PROVIDER", "REIMBURSE_CURRENCY_BASE_URL"]);
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("REIMBURSE_CURRENCY_API_KEY", "rk-secret-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(!debug.contains("rk-secret-value"), "debug output should not contain api key")
        })();

        clear_vars(&["REIMBURSE_CURRENCY_API_KEY"]);
        result
    }
}
