use bastion_core::catalog::standard::{standard_definitions, standard_rollback_spec};
use serde_json::{json, Value};

use crate::commands::CommandResult;

pub fn run(action_type: Option<&str>) -> CommandResult {
    let entries: Vec<Value> = standard_definitions()
        .into_iter()
        .filter(|definition| action_type.map_or(true, |wanted| definition.action_type == wanted))
        .map(|definition| {
            let rollback = standard_rollback_spec(&definition.action_type);
            json!({ "definition": definition, "rollback": rollback })
        })
        .collect();

    if let Some(wanted) = action_type {
        if entries.is_empty() {
            return CommandResult::failure(
                "catalog",
                "unknown_action_type",
                format!("`{wanted}` is not a built-in action type"),
                2,
            );
        }
    }

    let count = entries.len();
    CommandResult::success_with_data(
        "catalog",
        format!("{count} operation definitions"),
        Some(Value::Array(entries)),
    )
}
