use reimburse_core::config::{AppConfig, CurrencyProvider, LoadOptions};
use reimburse_core::currency::StaticRateConverter;
use reimburse_db::{connect_with_config, migrations, ping};
use serde::Serialize;

use crate::commands::{
    current_thread_runtime, CommandResult, EXIT_CONFIG, EXIT_DB_CONNECTIVITY, EXIT_OK,
};

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

impl DoctorCheck {
    fn pass(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Pass, details: details.into() }
    }

    fn fail(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Fail, details: details.into() }
    }

    fn skipped(name: &'static str) -> Self {
        Self {
            name,
            status: CheckStatus::Skipped,
            details: "skipped because configuration did not load".to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

impl DoctorReport {
    fn exit_code(&self) -> u8 {
        let failed = |name: &str| {
            self.checks.iter().any(|check| check.name == name && check.status == CheckStatus::Fail)
        };
        if failed("config_validation") || failed("currency_provider") {
            EXIT_CONFIG
        } else if failed("database_connectivity") {
            EXIT_DB_CONNECTIVITY
        } else {
            EXIT_OK
        }
    }
}

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = report.exit_code();

    if json_output {
        let output = serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
        return CommandResult::text(exit_code, output);
    }

    CommandResult::text(exit_code, render_human(&report))
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck::pass("config_validation", "configuration loaded and validated"));
            checks.push(check_currency_provider(&config));
            checks.extend(check_database(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck::fail("config_validation", error.to_string()));
            checks.push(DoctorCheck::skipped("currency_provider"));
            checks.push(DoctorCheck::skipped("database_connectivity"));
            checks.push(DoctorCheck::skipped("migration_status"));
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

fn check_currency_provider(config: &AppConfig) -> DoctorCheck {
    match config.currency.provider {
        CurrencyProvider::Static => {
            match StaticRateConverter::from_pairs(&config.currency.static_rates) {
                Ok(_) => DoctorCheck::pass(
                    "currency_provider",
                    format!(
                        "static rate table with {} configured pair(s)",
                        config.currency.static_rates.len()
                    ),
                ),
                Err(error) => DoctorCheck::fail("currency_provider", error.to_string()),
            }
        }
        CurrencyProvider::ExchangeRateApi => DoctorCheck::pass(
            "currency_provider",
            format!(
                "exchange rate api at `{}` (api key {}, cache ttl {}s)",
                config.currency.base_url,
                if config.currency.api_key.is_some() { "set" } else { "unset" },
                config.currency.cache_ttl_secs
            ),
        ),
    }
}

fn check_database(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match current_thread_runtime() {
        Ok(runtime) => runtime,
        Err(message) => {
            return vec![
                DoctorCheck::fail("database_connectivity", message),
                DoctorCheck::skipped("migration_status"),
            ];
        }
    };

    runtime.block_on(async {
        let pool = match connect_with_config(&config.database).await {
            Ok(pool) => pool,
            Err(error) => {
                return vec![
                    DoctorCheck::fail(
                        "database_connectivity",
                        format!("failed to connect to database: {error}"),
                    ),
                    DoctorCheck::skipped("migration_status"),
                ];
            }
        };

        let connectivity = match ping(&pool).await {
            Ok(()) => DoctorCheck::pass(
                "database_connectivity",
                format!("connected using `{}`", config.database.url),
            ),
            Err(error) => {
                DoctorCheck::fail("database_connectivity", format!("database query failed: {error}"))
            }
        };

        let known = migrations::MIGRATOR.iter().count();
        let migration_status = match migrations::applied_versions(&pool).await {
            Ok(applied) if applied.len() >= known => {
                DoctorCheck::pass("migration_status", format!("{known} of {known} migrations applied"))
            }
            Ok(applied) => DoctorCheck::fail(
                "migration_status",
                format!(
                    "{} of {known} migrations applied; run `reimburse migrate`",
                    applied.len()
                ),
            ),
            Err(error) => DoctorCheck::fail(
                "migration_status",
                format!("failed to read migration history: {error}"),
            ),
        };

        pool.close().await;
        vec![connectivity, migration_status]
    })
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
