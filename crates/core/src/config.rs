use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EngineConfig {
    pub execution: ExecutionConfig,
    pub rate_limit: RateLimitConfig,
    pub retry: RetryConfig,
    pub approval: ApprovalConfig,
    pub safety: SafetyConfig,
    pub rollback: RollbackConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ExecutionConfig {
    pub max_concurrent_actions: usize,
    pub max_per_resource_type: BTreeMap<String, usize>,
    pub default_timeout_seconds: u64,
    pub default_max_retries: u32,
    pub monitor_interval_seconds: u64,
    pub poll_interval_ms: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RateLimitConfig {
    pub max_calls: usize,
    pub window_seconds: u64,
    pub mode: RateLimitMode,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RetryConfig {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_base: f64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ApprovalConfig {
    pub default_ttl_hours: u64,
    pub auto_approval_allowlist: Vec<String>,
    pub non_production_suffixes: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SafetyConfig {
    pub conflicting_action_pairs: Vec<[String; 2]>,
    pub exclusive_action_markers: Vec<String>,
    pub resource_check: ResourceCheckMode,
    pub lock_ttl_seconds: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RollbackConfig {
    pub window_hours: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Behaviour of the scheduler when the rate limiter is saturated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitMode {
    Wait,
    Reject,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceCheckMode {
    Disabled,
    WarnOnly,
    Enforce,
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
    pub log_format: Option<LogFormat>,
    pub max_concurrent_actions: Option<usize>,
    pub rate_limit_mode: Option<RateLimitMode>,
    pub resource_check: Option<ResourceCheckMode>,
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

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            execution: ExecutionConfig {
                max_concurrent_actions: 5,
                max_per_resource_type: BTreeMap::from([
                    ("compute".to_string(), 3),
                    ("network".to_string(), 3),
                    ("iam".to_string(), 2),
                    ("storage".to_string(), 3),
                    ("logging".to_string(), 2),
                ]),
                default_timeout_seconds: 300,
                default_max_retries: 3,
                monitor_interval_seconds: 5,
                poll_interval_ms: 250,
            },
            rate_limit: RateLimitConfig {
                max_calls: 60,
                window_seconds: 60,
                mode: RateLimitMode::Wait,
            },
            retry: RetryConfig { initial_delay_ms: 1_000, max_delay_ms: 60_000, backoff_base: 2.0 },
            approval: ApprovalConfig {
                default_ttl_hours: 24,
                auto_approval_allowlist: vec![
                    "enable_audit_logging".to_string(),
                    "enable_vpc_flow_logs".to_string(),
                    "snapshot_disk".to_string(),
                ],
                non_production_suffixes: vec![
                    "-dev".to_string(),
                    "-test".to_string(),
                    "-staging".to_string(),
                    "-sandbox".to_string(),
                ],
            },
            safety: SafetyConfig {
                conflicting_action_pairs: [
                    ("stop_instance", "start_instance"),
                    ("block_ip", "unblock_ip"),
                    ("disable_user_account", "enable_user_account"),
                    ("revoke_iam_binding", "restore_iam_binding"),
                    ("remove_bucket_public_access", "restore_bucket_public_access"),
                ]
                .into_iter()
                .map(|(left, right)| [left.to_string(), right.to_string()])
                .collect(),
                exclusive_action_markers: vec!["restore".to_string(), "rotate".to_string()],
                resource_check: ResourceCheckMode::WarnOnly,
                lock_ttl_seconds: 300,
            },
            rollback: RollbackConfig { window_hours: 72 },
            database: DatabaseConfig {
                url: "sqlite://bastion.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
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

impl std::str::FromStr for RateLimitMode {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "wait" => Ok(Self::Wait),
            "reject" => Ok(Self::Reject),
            other => Err(ConfigError::Validation(format!(
                "unsupported rate limit mode `{other}` (expected wait|reject)"
            ))),
        }
    }
}

impl std::str::FromStr for ResourceCheckMode {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "disabled" => Ok(Self::Disabled),
            "warn_only" => Ok(Self::WarnOnly),
            "enforce" => Ok(Self::Enforce),
            other => Err(ConfigError::Validation(format!(
                "unsupported resource check mode `{other}` (expected disabled|warn_only|enforce)"
            ))),
        }
    }
}

impl EngineConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("bastion.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(execution) = patch.execution {
            if let Some(max_concurrent_actions) = execution.max_concurrent_actions {
                self.execution.max_concurrent_actions = max_concurrent_actions;
            }
            if let Some(max_per_resource_type) = execution.max_per_resource_type {
                self.execution.max_per_resource_type = max_per_resource_type;
            }
            if let Some(default_timeout_seconds) = execution.default_timeout_seconds {
                self.execution.default_timeout_seconds = default_timeout_seconds;
            }
            if let Some(default_max_retries) = execution.default_max_retries {
                self.execution.default_max_retries = default_max_retries;
            }
            if let Some(monitor_interval_seconds) = execution.monitor_interval_seconds {
                self.execution.monitor_interval_seconds = monitor_interval_seconds;
            }
            if let Some(poll_interval_ms) = execution.poll_interval_ms {
                self.execution.poll_interval_ms = poll_interval_ms;
            }
        }

        if let Some(rate_limit) = patch.rate_limit {
            if let Some(max_calls) = rate_limit.max_calls {
                self.rate_limit.max_calls = max_calls;
            }
            if let Some(window_seconds) = rate_limit.window_seconds {
                self.rate_limit.window_seconds = window_seconds;
            }
            if let Some(mode) = rate_limit.mode {
                self.rate_limit.mode = mode;
            }
        }

        if let Some(retry) = patch.retry {
            if let Some(initial_delay_ms) = retry.initial_delay_ms {
                self.retry.initial_delay_ms = initial_delay_ms;
            }
            if let Some(max_delay_ms) = retry.max_delay_ms {
                self.retry.max_delay_ms = max_delay_ms;
            }
            if let Some(backoff_base) = retry.backoff_base {
                self.retry.backoff_base = backoff_base;
            }
        }

        if let Some(approval) = patch.approval {
            if let Some(default_ttl_hours) = approval.default_ttl_hours {
                self.approval.default_ttl_hours = default_ttl_hours;
            }
            if let Some(allowlist) = approval.auto_approval_allowlist {
                self.approval.auto_approval_allowlist = allowlist;
            }
            if let Some(suffixes) = approval.non_production_suffixes {
                self.approval.non_production_suffixes = suffixes;
            }
        }

        if let Some(safety) = patch.safety {
            if let Some(pairs) = safety.conflicting_action_pairs {
                self.safety.conflicting_action_pairs = pairs;
            }
            if let Some(markers) = safety.exclusive_action_markers {
                self.safety.exclusive_action_markers = markers;
            }
            if let Some(resource_check) = safety.resource_check {
                self.safety.resource_check = resource_check;
            }
            if let Some(lock_ttl_seconds) = safety.lock_ttl_seconds {
                self.safety.lock_ttl_seconds = lock_ttl_seconds;
            }
        }

        if let Some(rollback) = patch.rollback {
            if let Some(window_hours) = rollback.window_hours {
                self.rollback.window_hours = window_hours;
            }
        }

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
        if let Some(value) = read_env("BASTION_EXECUTION_MAX_CONCURRENT_ACTIONS") {
            self.execution.max_concurrent_actions =
                parse_usize("BASTION_EXECUTION_MAX_CONCURRENT_ACTIONS", &value)?;
        }
        if let Some(value) = read_env("BASTION_EXECUTION_DEFAULT_TIMEOUT_SECONDS") {
            self.execution.default_timeout_seconds =
                parse_u64("BASTION_EXECUTION_DEFAULT_TIMEOUT_SECONDS", &value)?;
        }
        if let Some(value) = read_env("BASTION_EXECUTION_DEFAULT_MAX_RETRIES") {
            self.execution.default_max_retries =
                parse_u32("BASTION_EXECUTION_DEFAULT_MAX_RETRIES", &value)?;
        }

        if let Some(value) = read_env("BASTION_RATE_LIMIT_MAX_CALLS") {
            self.rate_limit.max_calls = parse_usize("BASTION_RATE_LIMIT_MAX_CALLS", &value)?;
        }
        if let Some(value) = read_env("BASTION_RATE_LIMIT_WINDOW_SECONDS") {
            self.rate_limit.window_seconds =
                parse_u64("BASTION_RATE_LIMIT_WINDOW_SECONDS", &value)?;
        }
        if let Some(value) = read_env("BASTION_RATE_LIMIT_MODE") {
            self.rate_limit.mode = value.parse()?;
        }

        if let Some(value) = read_env("BASTION_APPROVAL_DEFAULT_TTL_HOURS") {
            self.approval.default_ttl_hours =
                parse_u64("BASTION_APPROVAL_DEFAULT_TTL_HOURS", &value)?;
        }
        if let Some(value) = read_env("BASTION_APPROVAL_AUTO_APPROVAL_ALLOWLIST") {
            self.approval.auto_approval_allowlist = parse_list(&value);
        }
        if let Some(value) = read_env("BASTION_APPROVAL_NON_PRODUCTION_SUFFIXES") {
            self.approval.non_production_suffixes = parse_list(&value);
        }

        if let Some(value) = read_env("BASTION_SAFETY_RESOURCE_CHECK") {
            self.safety.resource_check = value.parse()?;
        }
        if let Some(value) = read_env("BASTION_SAFETY_LOCK_TTL_SECONDS") {
            self.safety.lock_ttl_seconds = parse_u64("BASTION_SAFETY_LOCK_TTL_SECONDS", &value)?;
        }

        if let Some(value) = read_env("BASTION_ROLLBACK_WINDOW_HOURS") {
            self.rollback.window_hours = parse_u64("BASTION_ROLLBACK_WINDOW_HOURS", &value)?;
        }

        if let Some(value) = read_env("BASTION_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("BASTION_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("BASTION_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("BASTION_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("BASTION_DATABASE_TIMEOUT_SECS", &value)?;
        }

        let log_level =
            read_env("BASTION_LOGGING_LEVEL").or_else(|| read_env("BASTION_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("BASTION_LOGGING_FORMAT").or_else(|| read_env("BASTION_LOG_FORMAT"));
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
        if let Some(log_format) = overrides.log_format {
            self.logging.format = log_format;
        }
        if let Some(max_concurrent_actions) = overrides.max_concurrent_actions {
            self.execution.max_concurrent_actions = max_concurrent_actions;
        }
        if let Some(mode) = overrides.rate_limit_mode {
            self.rate_limit.mode = mode;
        }
        if let Some(resource_check) = overrides.resource_check {
            self.safety.resource_check = resource_check;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_execution(&self.execution)?;
        validate_rate_limit(&self.rate_limit)?;
        validate_retry(&self.retry)?;
        validate_approval(&self.approval)?;
        validate_safety(&self.safety)?;
        validate_database(&self.database)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

/// Explicit path when it exists, else `bastion.toml` then `config/bastion.toml`.
pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("bastion.toml"), PathBuf::from("config/bastion.toml")]
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

fn validate_execution(execution: &ExecutionConfig) -> Result<(), ConfigError> {
    if execution.max_concurrent_actions == 0 {
        return Err(ConfigError::Validation(
            "execution.max_concurrent_actions must be greater than zero".to_string(),
        ));
    }

    if let Some((resource_type, _)) =
        execution.max_per_resource_type.iter().find(|(_, limit)| **limit == 0)
    {
        return Err(ConfigError::Validation(format!(
            "execution.max_per_resource_type.{resource_type} must be greater than zero"
        )));
    }

    if execution.default_timeout_seconds == 0 {
        return Err(ConfigError::Validation(
            "execution.default_timeout_seconds must be greater than zero".to_string(),
        ));
    }

    if execution.monitor_interval_seconds == 0 || execution.poll_interval_ms == 0 {
        return Err(ConfigError::Validation(
            "execution.monitor_interval_seconds and execution.poll_interval_ms must be greater than zero"
                .to_string(),
        ));
    }

    Ok(())
}

fn validate_rate_limit(rate_limit: &RateLimitConfig) -> Result<(), ConfigError> {
    if rate_limit.max_calls == 0 || rate_limit.window_seconds == 0 {
        return Err(ConfigError::Validation(
            "rate_limit.max_calls and rate_limit.window_seconds must be greater than zero"
                .to_string(),
        ));
    }

    Ok(())
}

fn validate_retry(retry: &RetryConfig) -> Result<(), ConfigError> {
    if !retry.backoff_base.is_finite() || retry.backoff_base < 1.0 {
        return Err(ConfigError::Validation(
            "retry.backoff_base must be a finite number >= 1.0".to_string(),
        ));
    }

    if retry.max_delay_ms < retry.initial_delay_ms {
        return Err(ConfigError::Validation(
            "retry.max_delay_ms must not be smaller than retry.initial_delay_ms".to_string(),
        ));
    }

    Ok(())
}

fn validate_approval(approval: &ApprovalConfig) -> Result<(), ConfigError> {
    if approval.default_ttl_hours == 0 {
        return Err(ConfigError::Validation(
            "approval.default_ttl_hours must be greater than zero".to_string(),
        ));
    }

    if approval.non_production_suffixes.iter().any(|suffix| suffix.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "approval.non_production_suffixes must not contain empty entries".to_string(),
        ));
    }

    Ok(())
}

fn validate_safety(safety: &SafetyConfig) -> Result<(), ConfigError> {
    if let Some([left, right]) = safety.conflicting_action_pairs.iter().find(|[l, r]| l == r) {
        return Err(ConfigError::Validation(format!(
            "safety.conflicting_action_pairs entry [{left}, {right}] pairs an action with itself"
        )));
    }

    if safety.lock_ttl_seconds == 0 {
        return Err(ConfigError::Validation(
            "safety.lock_ttl_seconds must be greater than zero".to_string(),
        ));
    }

    Ok(())
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

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
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

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    execution: Option<ExecutionPatch>,
    rate_limit: Option<RateLimitPatch>,
    retry: Option<RetryPatch>,
    approval: Option<ApprovalPatch>,
    safety: Option<SafetyPatch>,
    rollback: Option<RollbackPatch>,
    database: Option<DatabasePatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct ExecutionPatch {
    max_concurrent_actions: Option<usize>,
    max_per_resource_type: Option<BTreeMap<String, usize>>,
    default_timeout_seconds: Option<u64>,
    default_max_retries: Option<u32>,
    monitor_interval_seconds: Option<u64>,
    poll_interval_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RateLimitPatch {
    max_calls: Option<usize>,
    window_seconds: Option<u64>,
    mode: Option<RateLimitMode>,
}

#[derive(Debug, Default, Deserialize)]
struct RetryPatch {
    initial_delay_ms: Option<u64>,
    max_delay_ms: Option<u64>,
    backoff_base: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct ApprovalPatch {
    default_ttl_hours: Option<u64>,
    auto_approval_allowlist: Option<Vec<String>>,
    non_production_suffixes: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct SafetyPatch {
    conflicting_action_pairs: Option<Vec<[String; 2]>>,
    exclusive_action_markers: Option<Vec<String>>,
    resource_check: Option<ResourceCheckMode>,
    lock_ttl_seconds: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RollbackPatch {
    window_hours: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
