use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use bastion_core::catalog::standard::standard_catalog;
use bastion_core::config::LoadOptions;
use bastion_core::domain::operation::{Operation, OperationId, Params};
use bastion_core::execution::determine_priority;
use bastion_core::safety::SafetyValidator;
use serde::Deserialize;
use serde_json::json;

use crate::commands::{load_config, runtime_for, CommandResult};

/// Operation as an operator writes it; ids and timestamps are filled in.
#[derive(Debug, Deserialize)]
pub struct OperationRequest {
    #[serde(default)]
    pub operation_id: Option<String>,
    pub incident_id: String,
    pub action_type: String,
    pub target_resource: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub params: Params,
}

impl OperationRequest {
    pub fn into_operation(self) -> Operation {
        let mut operation =
            Operation::new(self.incident_id, self.action_type, self.target_resource);
        if let Some(operation_id) = self.operation_id {
            operation.operation_id = OperationId(operation_id);
        }
        if let Some(description) = self.description {
            operation = operation.with_description(description);
        }
        operation.params = self.params;
        operation
    }
}

pub fn read_request(file: &Path) -> anyhow::Result<OperationRequest> {
    let raw = fs::read_to_string(file)
        .with_context(|| format!("failed to read `{}`", file.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("`{}` is not a valid operation", file.display()))
}

pub fn run(options: LoadOptions, file: &Path) -> CommandResult {
    let config = match load_config("validate", options) {
        Ok(config) => config,
        Err(result) => return result,
    };

    let request = match read_request(file) {
        Ok(request) => request,
        Err(error) => {
            return CommandResult::failure("validate", "input", format!("{error:#}"), 2);
        }
    };
    let operation = request.into_operation();

    let runtime = match runtime_for("validate") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    let catalog = Arc::new(standard_catalog());
    let validator = SafetyValidator::new(Arc::clone(&catalog), config.safety.clone());
    let result = runtime.block_on(validator.validate(&operation));
    let priority = catalog
        .get_definition(&operation.action_type)
        .map(|definition| determine_priority(&operation, definition));

    let is_safe = result.is_safe;
    let errors = result.errors.join("; ");
    let data = json!({
        "operation_id": operation.operation_id,
        "action_type": operation.action_type,
        "target_resource": operation.target_resource,
        "priority": priority,
        "validation": result,
    });

    if is_safe {
        CommandResult::success_with_data("validate", "operation passed safety validation", Some(data))
    } else {
        CommandResult::failure_with_data(
            "validate",
            "unsafe_operation",
            errors,
            1,
            Some(data),
        )
    }
}
