use bastion_core::catalog::standard::standard_catalog;
use bastion_core::config::{EngineConfig, LoadOptions};
use bastion_db::{connect_with_config, migrations};
use serde::Serialize;

use crate::commands::{current_thread_runtime, CommandResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
pub struct DoctorCheck {
    pub name: &'static str,
    pub status: CheckStatus,
    pub details: String,
}

#[derive(Debug, Serialize)]
pub struct DoctorReport {
    pub overall_status: CheckStatus,
    pub summary: String,
    pub checks: Vec<DoctorCheck>,
}

pub fn run(options: LoadOptions, json_output: bool) -> CommandResult {
    let report = build_report(options);
    let exit_code = if report.overall_status == CheckStatus::Fail { 1 } else { 0 };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };
    CommandResult { exit_code, output }
}

pub fn build_report(options: LoadOptions) -> DoctorReport {
    let mut checks = Vec::new();

    match EngineConfig::load(options) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_catalog_references(&config));
            checks.push(check_database(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for name in ["catalog_references", "database_connectivity"] {
                checks.push(DoctorCheck {
                    name,
                    status: CheckStatus::Skipped,
                    details: "skipped because configuration did not load".to_string(),
                });
            }
        }
    }

    let has = |status: CheckStatus| checks.iter().any(|check| check.status == status);
    let overall_status = if has(CheckStatus::Fail) || has(CheckStatus::Skipped) {
        CheckStatus::Fail
    } else if has(CheckStatus::Warn) {
        CheckStatus::Warn
    } else {
        CheckStatus::Pass
    };
    let summary = match overall_status {
        CheckStatus::Pass => "doctor: all readiness checks passed",
        CheckStatus::Warn => "doctor: readiness checks passed with warnings",
        _ => "doctor: one or more readiness checks failed",
    }
    .to_string();

    DoctorReport { overall_status, summary, checks }
}

/// Configured action names that the built-in catalog does not define.
fn check_catalog_references(config: &EngineConfig) -> DoctorCheck {
    let known = standard_catalog().action_types();
    let mut unknown: Vec<&str> = config
        .safety
        .conflicting_action_pairs
        .iter()
        .flatten()
        .chain(config.approval.auto_approval_allowlist.iter())
        .map(String::as_str)
        .filter(|action| !known.contains(*action))
        .collect();
    unknown.sort_unstable();
    unknown.dedup();

    if unknown.is_empty() {
        DoctorCheck {
            name: "catalog_references",
            status: CheckStatus::Pass,
            details: format!("{} built-in action types", known.len()),
        }
    } else {
        DoctorCheck {
            name: "catalog_references",
            status: CheckStatus::Warn,
            details: format!("not in the built-in catalog: {}", unknown.join(", ")),
        }
    }
}

fn check_database(config: &EngineConfig) -> DoctorCheck {
    let runtime = match current_thread_runtime() {
        Ok(runtime) => runtime,
        Err(error) => {
            return DoctorCheck {
                name: "database_connectivity",
                status: CheckStatus::Fail,
                details: format!("failed to initialize async runtime: {error}"),
            };
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| format!("failed to connect to database: {error}"))?;
        let migrated = migrations::approval_schema_present(&pool)
            .await
            .map_err(|error| format!("failed to inspect schema: {error}"))?;
        pool.close().await;
        Ok::<bool, String>(migrated)
    });

    match result {
        Ok(true) => DoctorCheck {
            name: "database_connectivity",
            status: CheckStatus::Pass,
            details: format!("connected using `{}`", config.database.url),
        },
        Ok(false) => DoctorCheck {
            name: "database_connectivity",
            status: CheckStatus::Warn,
            details: format!(
                "connected using `{}` but the approval schema is missing; run `bastion migrate`",
                config.database.url
            ),
        },
        Err(error) => {
            DoctorCheck { name: "database_connectivity", status: CheckStatus::Fail, details: error }
        }
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Warn => "warn",
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
