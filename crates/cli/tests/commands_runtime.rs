use std::env;
use std::fs;
use std::sync::{Mutex, OnceLock};

use reimburse_cli::commands::{config, doctor, evaluate, migrate};
use serde_json::Value;

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(&[("REIMBURSE_DATABASE_URL", "sqlite::memory:")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn migrate_returns_config_failure_for_invalid_port() {
    with_env(
        &[("REIMBURSE_DATABASE_URL", "sqlite::memory:"), ("REIMBURSE_SERVER_PORT", "notaport")],
        || {
            let result = migrate::run();
            assert_eq!(result.exit_code, 2, "expected config validation failure code");

            let payload = parse_payload(&result.output);
            assert_eq!(payload["status"], "error");
            assert_eq!(payload["error_class"], "config_validation");
        },
    );
}

#[test]
fn config_attributes_values_to_environment() {
    with_env(&[("REIMBURSE_DATABASE_URL", "sqlite::memory:")], || {
        let result = config::run();
        assert_eq!(result.exit_code, 0);
        assert!(result
            .output
            .contains("- database.url = sqlite::memory: (source: env (REIMBURSE_DATABASE_URL))"));
        assert!(result.output.contains("- server.port = 8080 (source: default)"));
    });
}

#[test]
fn doctor_json_reports_connectivity() {
    with_env(
        &[
            ("REIMBURSE_DATABASE_URL", "sqlite::memory:"),
            ("REIMBURSE_CURRENCY_STATIC_RATES", "USD:INR=83.10"),
        ],
        || {
            let result = doctor::run(true);
            assert_eq!(result.exit_code, 0, "doctor output: {}", result.output);

            let payload = parse_payload(&result.output);
            let checks = payload["checks"].as_array().expect("checks array");
            let status_of = |name: &str| {
                checks
                    .iter()
                    .find(|check| check["name"] == name)
                    .map(|check| check["status"].clone())
                    .expect("check present")
            };
            assert_eq!(status_of("config_validation"), "pass");
            assert_eq!(status_of("currency_provider"), "pass");
            assert_eq!(status_of("database_connectivity"), "pass");
        },
    );
}

#[test]
fn doctor_reports_config_failure_in_human_output() {
    with_env(&[("REIMBURSE_CURRENCY_PROVIDER", "carrier-pigeon")], || {
        let result = doctor::run(false);
        assert_eq!(result.exit_code, 2);
        assert!(result.output.contains("- [fail] config_validation"));
        assert!(result.output.contains("- [skip] database_connectivity"));
    });
}

#[test]
fn evaluate_reads_rule_and_actions_from_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("request.json");
    fs::write(
        &path,
        r#"{
            "rule": {
                "name": "Travel over 1000",
                "policy": {"type": "hybrid", "threshold": 60, "approver_ids": ["u-cfo"]},
                "approval_sequence": ["u-mgr", "u-fin", "u-cfo"]
            },
            "actions": [
                {"approver_id": "u-mgr", "status": "approved"},
                {"approver_id": "u-cfo", "status": "approved"}
            ]
        }"#,
    )
    .expect("write request");

    let result = evaluate::run(&path);
    assert_eq!(result.exit_code, 0, "evaluate output: {}", result.output);

    let payload = parse_payload(&result.output);
    assert_eq!(payload["command"], "evaluate");
    assert_eq!(payload["detail"]["outcome"], "approved");
    assert_eq!(payload["detail"]["policy"], "hybrid");
    assert_eq!(payload["detail"]["total_approvers"], 3);
    assert_eq!(payload["detail"]["decision"]["basis"], "specific_approver");
}

#[test]
fn evaluate_refuses_out_of_range_threshold() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("request.json");
    fs::write(
        &path,
        r#"{
            "rule": {
                "policy": {"type": "percentage", "threshold": 0},
                "approval_sequence": ["u-a", "u-b", "u-c"]
            },
            "actions": []
        }"#,
    )
    .expect("write request");

    let result = evaluate::run(&path);
    assert_eq!(result.exit_code, 6, "evaluate output: {}", result.output);

    let payload = parse_payload(&result.output);
    assert_eq!(payload["status"], "error");
    assert_eq!(payload["error_class"], "input");
    assert!(payload["message"].as_str().expect("message").contains("threshold"));
}

#[test]
fn evaluate_refuses_hybrid_without_mechanism() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("request.json");
    fs::write(
        &path,
        r#"{"rule": {"policy": {"type": "hybrid"}, "approval_sequence": ["u-a"]}, "actions": []}"#,
    )
    .expect("write request");

    let result = evaluate::run(&path);
    assert_eq!(result.exit_code, 6);
    assert_eq!(parse_payload(&result.output)["error_class"], "input");
}

#[test]
fn evaluate_reports_missing_file_as_input_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let result = evaluate::run(&dir.path().join("absent.json"));
    assert_eq!(result.exit_code, 6);

    let payload = parse_payload(&result.output);
    assert_eq!(payload["status"], "error");
    assert_eq!(payload["error_class"], "input");
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid json")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "REIMBURSE_DATABASE_URL",
        "REIMBURSE_DATABASE_MAX_CONNECTIONS",
        "REIMBURSE_DATABASE_TIMEOUT_SECS",
        "REIMBURSE_SERVER_BIND_ADDRESS",
        "REIMBURSE_SERVER_PORT",
        "REIMBURSE_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "REIMBURSE_CURRENCY_PROVIDER",
        "REIMBURSE_CURRENCY_BASE_URL",
        "REIMBURSE_CURRENCY_API_KEY",
        "REIMBURSE_CURRENCY_TIMEOUT_SECS",
        "REIMBURSE_CURRENCY_CACHE_TTL_SECS",
        "REIMBURSE_CURRENCY_STATIC_RATES",
        "REIMBURSE_WORKFLOW_EVALUATE_RULES_ON_ACTION",
        "REIMBURSE_LOGGING_LEVEL",
        "REIMBURSE_LOGGING_FORMAT",
        "REIMBURSE_LOG_LEVEL",
        "REIMBURSE_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
