use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::execution::ExecutionOutcome;
use crate::domain::operation::{Operation, OperationId, StateSnapshot};

/// Everything needed to reverse one completed operation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RollbackPlan {
    pub original_operation: Operation,
    pub rollback_operation: Operation,
    pub state_snapshot: StateSnapshot,
    pub plan_hash: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RollbackRecord {
    pub rollback_id: OperationId,
    pub original_operation_id: OperationId,
    pub rollback_action_type: String,
    pub reason: String,
    pub result: RollbackResult,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RollbackResult {
    Succeeded { outcome: ExecutionOutcome },
    Failed { error: String },
}

impl RollbackResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }
}
