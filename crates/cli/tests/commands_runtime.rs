use std::env;
use std::sync::{Mutex, OnceLock};

use approvo_cli::commands::{decide, dispatch, escalate, migrate, request, seed};
use rust_decimal::Decimal;
use serde_json::Value;

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(&[("APPROVO_DATABASE_URL", "sqlite::memory:")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn migrate_returns_config_failure_for_non_sqlite_url() {
    with_env(&[("APPROVO_DATABASE_URL", "postgres://localhost/approvo")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn seed_is_idempotent_across_runs() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = database_url(&dir);

    with_env(&[("APPROVO_DATABASE_URL", &url)], || {
        let first = seed::run();
        assert_eq!(first.exit_code, 0, "expected first seed invocation success");
        let first_payload = parse_payload(&first.output);
        assert_eq!(first_payload["command"], "seed");
        assert_eq!(first_payload["status"], "ok");

        let second = seed::run();
        assert_eq!(second.exit_code, 0, "expected second seed invocation success");
        let second_payload = parse_payload(&second.output);

        assert_eq!(first_payload["message"], second_payload["message"]);
        let message = first_payload["message"].as_str().unwrap_or("");
        assert!(message.contains("  - wf-purchase-standard: Purchase up to 5.000.000 (2 steps)"));
    });
}

#[test]
fn purchase_request_runs_end_to_end_through_the_cli() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = database_url(&dir);

    with_env(&[("APPROVO_DATABASE_URL", &url)], || {
        assert_eq!(seed::run().exit_code, 0);

        let created = request::create(request::CreateArgs {
            entity_type: "PURCHASE".to_string(),
            entity_id: "po-cli-1".to_string(),
            amount: Decimal::from(1_200_000),
            requester: "u-employee".to_string(),
            title: "Laptops".to_string(),
            message: "Quarterly refresh".to_string(),
            priority: None,
        });
        assert_eq!(created.exit_code, 0, "{}", created.output);
        let created = parse_payload(&created.output);
        assert_eq!(created["data"]["active_role"], "employee");
        let request_id = created["data"]["request_id"].as_str().expect("request id").to_string();

        let pending = parse_payload(&request::pending("u-employee").output);
        assert_eq!(pending["data"].as_array().map(Vec::len), Some(1));

        let wrong_role = decide::run(&request_id, "u-finance", "APPROVE", "too early");
        assert_eq!(wrong_role.exit_code, 8, "{}", wrong_role.output);
        assert_eq!(parse_payload(&wrong_role.output)["error_class"], "conflict");

        let employee = decide::run(&request_id, "u-employee", "approve", "ok");
        assert_eq!(employee.exit_code, 0, "{}", employee.output);
        assert_eq!(parse_payload(&employee.output)["data"]["active_role"], "finance");

        let finance = decide::run(&request_id, "u-finance", "APPROVE", "paid");
        assert_eq!(finance.exit_code, 0, "{}", finance.output);
        assert_eq!(parse_payload(&finance.output)["data"]["status"], "APPROVED");

        let shown = parse_payload(&request::show(&request_id).output);
        assert_eq!(shown["data"]["status"], "APPROVED");
        assert_eq!(shown["data"]["active_role"], Value::Null);

        let history = parse_payload(&request::history(&request_id).output);
        let actions = history["data"]
            .as_array()
            .expect("history entries")
            .iter()
            .map(|entry| entry["action"].as_str().unwrap_or_default().to_string())
            .collect::<Vec<_>>();
        assert_eq!(actions, vec!["CREATED", "APPROVED", "APPROVED"]);

        let dispatched = dispatch::run(true, None);
        assert_eq!(dispatched.exit_code, 0, "{}", dispatched.output);
        let report = parse_payload(&dispatched.output);
        assert_eq!(report["data"]["failed"], 0);
        assert!(report["data"]["claimed"].as_u64().unwrap_or(0) >= 3);

        let idle = parse_payload(&dispatch::run(true, None).output);
        assert_eq!(idle["data"]["claimed"], 0);

        let listed = parse_payload(
            &request::list(request::ListArgs {
                status: Some("APPROVED".to_string()),
                ..request::ListArgs::default()
            })
            .output,
        );
        assert_eq!(listed["data"].as_array().map(Vec::len), Some(1));

        let hidden = parse_payload(
            &request::list(request::ListArgs {
                status: Some("APPROVED".to_string()),
                visible_to: Some("u-finance".to_string()),
                ..request::ListArgs::default()
            })
            .output,
        );
        assert_eq!(hidden["data"].as_array().map(Vec::len), Some(0));
    });
}

#[test]
fn escalation_adds_a_director_step_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = database_url(&dir);

    with_env(&[("APPROVO_DATABASE_URL", &url)], || {
        assert_eq!(seed::run().exit_code, 0);
        let created = parse_payload(
            &request::create(request::CreateArgs {
                entity_type: "purchase".to_string(),
                entity_id: "po-cli-2".to_string(),
                amount: Decimal::from(800_000),
                requester: "u-employee".to_string(),
                title: "Unusual vendor".to_string(),
                message: String::new(),
                priority: Some("low".to_string()),
            })
            .output,
        );
        let request_id = created["data"]["request_id"].as_str().expect("request id").to_string();

        let first = parse_payload(&escalate::run(&request_id, "u-manager", "new vendor").output);
        assert_eq!(first["status"], "ok");
        assert_eq!(first["data"]["step_created"], true);
        assert_eq!(first["data"]["active_role"], "director");

        let second = parse_payload(&escalate::run(&request_id, "u-manager", "still new").output);
        assert_eq!(second["data"]["step_created"], false);
        assert_eq!(first["data"]["director_step"], second["data"]["director_step"]);
    });
}

#[test]
fn invalid_inputs_map_to_bad_request() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = database_url(&dir);

    with_env(&[("APPROVO_DATABASE_URL", &url)], || {
        let unknown = request::show("missing-request");
        assert_eq!(unknown.exit_code, 7);
        let payload = parse_payload(&unknown.output);
        assert_eq!(payload["error_class"], "bad_request");
        assert!(payload["message"].as_str().unwrap_or("").contains("missing-request"));

        let bad_decision = decide::run("missing-request", "u-finance", "MAYBE", "");
        assert_eq!(bad_decision.exit_code, 7);

        let unsupported = request::create(request::CreateArgs {
            entity_type: "INVOICE".to_string(),
            entity_id: "inv-1".to_string(),
            amount: Decimal::from(10),
            requester: "u-employee".to_string(),
            title: "Invoice".to_string(),
            message: String::new(),
            priority: None,
        });
        assert_eq!(unsupported.exit_code, 7, "{}", unsupported.output);
    });
}

fn database_url(dir: &tempfile::TempDir) -> String {
    format!("sqlite://{}?mode=rwc", dir.path().join("approvo.db").display())
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "APPROVO_DATABASE_URL",
        "APPROVO_DATABASE_MAX_CONNECTIONS",
        "APPROVO_DATABASE_TIMEOUT_SECS",
        "APPROVO_SERVER_BIND_ADDRESS",
        "APPROVO_SERVER_HEALTH_CHECK_PORT",
        "APPROVO_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "APPROVO_APPROVALS_AUTO_APPROVE_MULTI_ROLE",
        "APPROVO_APPROVALS_DECISION_MAX_ATTEMPTS",
        "APPROVO_APPROVALS_NOTIFICATION_DEDUP_WINDOW_SECS",
        "APPROVO_APPROVALS_DISPATCH_INTERVAL_MS",
        "APPROVO_APPROVALS_DISPATCH_BATCH_SIZE",
        "APPROVO_LOGGING_LEVEL",
        "APPROVO_LOGGING_FORMAT",
        "APPROVO_LOG_LEVEL",
        "APPROVO_LOG_FORMAT",
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
