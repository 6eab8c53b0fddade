use std::sync::Arc;

use bastion_core::approvals::ApprovalWorkflow;
use bastion_core::audit::TracingAuditSink;
use bastion_core::config::LoadOptions;
use bastion_core::domain::approval::{ApprovalId, ApprovalStatus};
use bastion_core::errors::ApprovalError;
use bastion_db::{connect_with_config, migrations, SqlApprovalStore};
use serde_json::json;

use crate::commands::{load_config, runtime_for, CommandResult};

#[derive(Debug, Clone)]
pub enum ApprovalAction {
    List,
    Decide { approval_id: String, status: ApprovalStatus, approver: String, comment: Option<String> },
}

pub fn run(options: LoadOptions, action: ApprovalAction) -> CommandResult {
    let config = match load_config("approvals", options) {
        Ok(config) => config,
        Err(result) => return result,
    };

    let runtime = match runtime_for("approvals") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    runtime.block_on(async {
        let pool = match connect_with_config(&config.database).await {
            Ok(pool) => pool,
            Err(error) => {
                return CommandResult::failure("approvals", "db_connectivity", error.to_string(), 4);
            }
        };
        if let Err(error) = migrations::run_pending(&pool).await {
            return CommandResult::failure("approvals", "migration", error.to_string(), 5);
        }
        let workflow = ApprovalWorkflow::new(
            Arc::new(SqlApprovalStore::new(pool.clone())),
            config.approval.clone(),
            Arc::new(TracingAuditSink),
        );

        let result = execute(&workflow, action).await;
        pool.close().await;
        result
    })
}

async fn execute(workflow: &ApprovalWorkflow, action: ApprovalAction) -> CommandResult {
    match action {
        ApprovalAction::List => match workflow.list_pending().await {
            Ok(pending) => {
                let count = pending.len();
                CommandResult::success_with_data(
                    "approvals",
                    format!("{count} pending approval requests"),
                    Some(json!(pending)),
                )
            }
            Err(error) => CommandResult::failure("approvals", "store", error.to_string(), 4),
        },
        ApprovalAction::Decide { approval_id, status, approver, comment } => {
            let approval_id = ApprovalId(approval_id);
            match workflow
                .update_status(&approval_id, status, &approver, comment.as_deref())
                .await
            {
                Ok(request) => CommandResult::success_with_data(
                    "approvals",
                    format!("{approval_id} is now {status}"),
                    Some(json!(request)),
                ),
                Err(error) => {
                    let error_class = match &error {
                        ApprovalError::NotFound(_) => "not_found",
                        ApprovalError::InvalidTransition { .. } => "invalid_transition",
                        ApprovalError::InvalidDecision(_) => "invalid_decision",
                        ApprovalError::Store(_) => "store",
                    };
                    CommandResult::failure("approvals", error_class, error.to_string(), 1)
                }
            }
        }
    }
}
