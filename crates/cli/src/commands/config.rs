use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Path;

use bastion_core::config::{resolve_config_path, EngineConfig, LoadOptions};
use serde_json::json;
use toml::Value;

use crate::commands::CommandResult;

/// Keys reported with the source that set them.
const ATTRIBUTED_FIELDS: &[(&str, &str)] = &[
    ("execution.max_concurrent_actions", "BASTION_EXECUTION_MAX_CONCURRENT_ACTIONS"),
    ("execution.default_timeout_seconds", "BASTION_EXECUTION_DEFAULT_TIMEOUT_SECONDS"),
    ("execution.default_max_retries", "BASTION_EXECUTION_DEFAULT_MAX_RETRIES"),
    ("rate_limit.max_calls", "BASTION_RATE_LIMIT_MAX_CALLS"),
    ("rate_limit.window_seconds", "BASTION_RATE_LIMIT_WINDOW_SECONDS"),
    ("rate_limit.mode", "BASTION_RATE_LIMIT_MODE"),
    ("approval.default_ttl_hours", "BASTION_APPROVAL_DEFAULT_TTL_HOURS"),
    ("approval.auto_approval_allowlist", "BASTION_APPROVAL_AUTO_APPROVAL_ALLOWLIST"),
    ("approval.non_production_suffixes", "BASTION_APPROVAL_NON_PRODUCTION_SUFFIXES"),
    ("safety.resource_check", "BASTION_SAFETY_RESOURCE_CHECK"),
    ("safety.lock_ttl_seconds", "BASTION_SAFETY_LOCK_TTL_SECONDS"),
    ("rollback.window_hours", "BASTION_ROLLBACK_WINDOW_HOURS"),
    ("database.url", "BASTION_DATABASE_URL"),
    ("database.max_connections", "BASTION_DATABASE_MAX_CONNECTIONS"),
    ("database.timeout_secs", "BASTION_DATABASE_TIMEOUT_SECS"),
    ("logging.level", "BASTION_LOGGING_LEVEL"),
    ("logging.format", "BASTION_LOGGING_FORMAT"),
];

pub fn run(options: LoadOptions) -> CommandResult {
    let config_file_path = resolve_config_path(options.config_path.as_deref());
    let config = match EngineConfig::load(options) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "config",
                "config_validation",
                format!("config validation failed: {error}"),
                2,
            );
        }
    };

    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let sources: BTreeMap<&str, String> = ATTRIBUTED_FIELDS
        .iter()
        .map(|(key_path, env_key)| {
            let source = field_source(
                key_path,
                env_key,
                config_file_doc.as_ref(),
                config_file_path.as_deref(),
            );
            (*key_path, source)
        })
        .collect();

    let data = json!({
        "source_precedence": "env > file > default",
        "config_file": config_file_path.map(|path| path.display().to_string()),
        "effective": config,
        "sources": sources,
    });
    CommandResult::success_with_data("config", "effective configuration", Some(data))
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
