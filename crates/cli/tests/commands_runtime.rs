use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use bastion_cli::commands::approvals::{self, ApprovalAction};
use bastion_cli::commands::{catalog, config, doctor, migrate, validate};
use bastion_core::approvals::ApprovalWorkflow;
use bastion_core::audit::InMemoryAuditSink;
use bastion_core::config::{EngineConfig, LoadOptions};
use bastion_core::domain::approval::ApprovalStatus;
use bastion_core::domain::operation::{Operation, RiskLevel};
use bastion_db::{connect_with_settings, migrations, SqlApprovalStore};
use serde_json::Value;
use tempfile::TempDir;

const ENV_KEYS: &[&str] = &[
    "BASTION_EXECUTION_MAX_CONCURRENT_ACTIONS",
    "BASTION_EXECUTION_DEFAULT_TIMEOUT_SECONDS",
    "BASTION_EXECUTION_DEFAULT_MAX_RETRIES",
    "BASTION_RATE_LIMIT_MAX_CALLS",
    "BASTION_RATE_LIMIT_WINDOW_SECONDS",
    "BASTION_RATE_LIMIT_MODE",
    "BASTION_APPROVAL_DEFAULT_TTL_HOURS",
    "BASTION_APPROVAL_AUTO_APPROVAL_ALLOWLIST",
    "BASTION_APPROVAL_NON_PRODUCTION_SUFFIXES",
    "BASTION_SAFETY_RESOURCE_CHECK",
    "BASTION_SAFETY_LOCK_TTL_SECONDS",
    "BASTION_ROLLBACK_WINDOW_HOURS",
    "BASTION_DATABASE_URL",
    "BASTION_DATABASE_MAX_CONNECTIONS",
    "BASTION_DATABASE_TIMEOUT_SECS",
    "BASTION_LOGGING_LEVEL",
    "BASTION_LOGGING_FORMAT",
    "BASTION_LOG_LEVEL",
    "BASTION_LOG_FORMAT",
];

struct Workspace {
    dir: TempDir,
    config_path: PathBuf,
}

impl Workspace {
    fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let config_path = dir.path().join("bastion.toml");
        let database_path = dir.path().join("bastion.db");
        fs::write(
            &config_path,
            format!(
                "[database]\nurl = \"sqlite://{}\"\nmax_connections = 1\n\n[rate_limit]\nmode = \"reject\"\n",
                database_path.display()
            ),
        )
        .expect("write config");
        Self { dir, config_path }
    }

    fn options(&self) -> LoadOptions {
        LoadOptions { config_path: Some(self.config_path.clone()), ..LoadOptions::default() }
    }

    fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, contents).expect("write fixture");
        path
    }

    fn database_url(&self) -> String {
        format!("sqlite://{}", self.dir.path().join("bastion.db").display())
    }
}

#[test]
fn config_attributes_values_to_their_source() {
    let workspace = Workspace::new();
    with_env(&[("BASTION_RATE_LIMIT_MAX_CALLS", "9")], || {
        let result = config::run(workspace.options());
        assert_eq!(result.exit_code, 0);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "config");
        assert_eq!(payload["data"]["effective"]["rate_limit"]["max_calls"], 9);
        assert_eq!(payload["data"]["effective"]["rate_limit"]["mode"], "reject");
        assert_eq!(payload["data"]["sources"]["rate_limit.max_calls"], "env (BASTION_RATE_LIMIT_MAX_CALLS)");
        assert!(payload["data"]["sources"]["rate_limit.mode"]
            .as_str()
            .is_some_and(|source| source.starts_with("file (")));
        assert_eq!(payload["data"]["sources"]["approval.default_ttl_hours"], "default");
    });
}

#[test]
fn config_reports_validation_failures() {
    let workspace = Workspace::new();
    with_env(&[("BASTION_EXECUTION_MAX_CONCURRENT_ACTIONS", "0")], || {
        let result = config::run(workspace.options());
        assert_eq!(result.exit_code, 2);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn doctor_warns_until_migrations_are_applied() {
    let workspace = Workspace::new();
    with_env(&[], || {
        let before = doctor::run(workspace.options(), true);
        assert_eq!(before.exit_code, 0);
        assert_eq!(parse_payload(&before.output)["overall_status"], "warn");

        let migrated = migrate::run(workspace.options());
        assert_eq!(migrated.exit_code, 0, "{}", migrated.output);
        assert_eq!(parse_payload(&migrated.output)["status"], "ok");

        let after = doctor::run(workspace.options(), true);
        let payload = parse_payload(&after.output);
        assert_eq!(payload["overall_status"], "pass");
        assert_eq!(payload["checks"].as_array().map(Vec::len), Some(3));
    });
}

#[test]
fn doctor_human_output_lists_each_check() {
    let workspace = Workspace::new();
    with_env(&[], || {
        let result = doctor::run(workspace.options(), false);
        let lines: Vec<&str> = result.output.lines().collect();

        assert!(lines[0].starts_with("doctor:"));
        assert!(lines.iter().any(|line| line.contains("config_validation")));
        assert!(lines.iter().any(|line| line.contains("database_connectivity")));
    });
}

#[test]
fn catalog_lists_builtin_definitions() {
    let result = catalog::run(None);
    assert_eq!(result.exit_code, 0);
    let payload = parse_payload(&result.output);
    assert_eq!(payload["data"].as_array().map(Vec::len), Some(15));

    let single = parse_payload(&catalog::run(Some("block_ip")).output);
    assert_eq!(single["data"][0]["definition"]["action_type"], "block_ip");
    assert_eq!(single["data"][0]["rollback"]["rollback_action_type"], "unblock_ip");

    let unknown = catalog::run(Some("reboot_datacenter"));
    assert_eq!(unknown.exit_code, 2);
    assert_eq!(parse_payload(&unknown.output)["error_class"], "unknown_action_type");
}

#[test]
fn validate_reports_priority_and_verdict() {
    let workspace = Workspace::new();
    let safe = workspace.write(
        "block.json",
        r#"{"incident_id":"inc-1","action_type":"block_ip","target_resource":"net-1",
            "params":{"ip_address":"198.51.100.7","network":"default"}}"#,
    );
    let unsafe_op = workspace.write(
        "broken.json",
        r#"{"incident_id":"inc-1","action_type":"block_ip","target_resource":"net-1"}"#,
    );

    with_env(&[], || {
        let result = validate::run(workspace.options(), &safe);
        assert_eq!(result.exit_code, 0, "{}", result.output);
        let payload = parse_payload(&result.output);
        assert_eq!(payload["data"]["validation"]["is_safe"], true);
        assert_eq!(payload["data"]["priority"], 2);

        let rejected = validate::run(workspace.options(), &unsafe_op);
        assert_eq!(rejected.exit_code, 1);
        let payload = parse_payload(&rejected.output);
        assert_eq!(payload["error_class"], "unsafe_operation");
        assert!(payload["message"]
            .as_str()
            .is_some_and(|message| message.contains("missing required parameters")));
    });
}

#[test]
fn validate_rejects_unreadable_input() {
    let workspace = Workspace::new();
    let garbage = workspace.write("garbage.json", "{ not json");
    with_env(&[], || {
        let result = validate::run(workspace.options(), &garbage);
        assert_eq!(result.exit_code, 2);
        assert_eq!(parse_payload(&result.output)["error_class"], "input");

        let missing = validate::run(workspace.options(), Path::new("/nonexistent/op.json"));
        assert_eq!(missing.exit_code, 2);
    });
}

#[test]
fn approvals_can_be_listed_and_decided_once() {
    let workspace = Workspace::new();
    let approval_id = seed_pending_request(&workspace.database_url());

    with_env(&[], || {
        let listed = parse_payload(&approvals::run(workspace.options(), ApprovalAction::List).output);
        assert_eq!(listed["data"].as_array().map(Vec::len), Some(1));
        assert_eq!(listed["data"][0]["approval_id"], approval_id.as_str());

        let approve = ApprovalAction::Decide {
            approval_id: approval_id.clone(),
            status: ApprovalStatus::Approved,
            approver: "oncall@example.com".to_string(),
            comment: Some("contained".to_string()),
        };
        let approved = approvals::run(workspace.options(), approve);
        assert_eq!(approved.exit_code, 0, "{}", approved.output);
        assert_eq!(parse_payload(&approved.output)["data"]["status"], "approved");

        let reject = ApprovalAction::Decide {
            approval_id: approval_id.clone(),
            status: ApprovalStatus::Rejected,
            approver: "lead@example.com".to_string(),
            comment: None,
        };
        let rejected = approvals::run(workspace.options(), reject);
        assert_eq!(rejected.exit_code, 1);
        assert_eq!(parse_payload(&rejected.output)["error_class"], "invalid_transition");

        let listed = parse_payload(&approvals::run(workspace.options(), ApprovalAction::List).output);
        assert_eq!(listed["data"].as_array().map(Vec::len), Some(0));
    });
}

fn seed_pending_request(database_url: &str) -> String {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime");
    runtime.block_on(async {
        let pool = connect_with_settings(database_url, 1, 5).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let workflow = ApprovalWorkflow::new(
            Arc::new(SqlApprovalStore::new(pool.clone())),
            EngineConfig::default().approval,
            Arc::new(InMemoryAuditSink::default()),
        );
        let operation = Operation::new("inc-3", "disable_user_account", "user-prod")
            .with_param("user_email", "mallory@example.com");
        let request = workflow
            .create_request(&operation, RiskLevel::High, "privileged production account")
            .await
            .expect("create request");
        pool.close().await;
        request.approval_id.0
    })
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let previous_values: Vec<(&str, Option<String>)> =
        ENV_KEYS.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in ENV_KEYS {
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
