use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{Duration, Utc};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};

use crate::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use crate::catalog::OperationCatalog;
use crate::domain::execution::Environment;
use crate::domain::operation::{Operation, OperationId, StateSnapshot};
use crate::domain::rollback::{RollbackPlan, RollbackRecord, RollbackResult};
use crate::errors::RollbackError;

const ROLLBACK_ACTOR: &str = "rollback-manager";

/// Builds inverse operations, runs them and keeps their history.
pub struct RollbackManager {
    catalog: Arc<OperationCatalog>,
    audit: Arc<dyn AuditSink>,
    window: Duration,
    plans: Mutex<HashMap<OperationId, RollbackPlan>>,
    history: Mutex<Vec<RollbackRecord>>,
}

fn recover<T>(result: std::sync::LockResult<MutexGuard<'_, T>>) -> MutexGuard<'_, T> {
    match result {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// sha256 over the sorted-key JSON of the identifying fields and the snapshot.
pub fn plan_hash(operation: &Operation, snapshot: &StateSnapshot) -> String {
    let sorted_snapshot: BTreeMap<&String, &Value> = snapshot.iter().collect();
    let canonical = json!({
        "action_type": operation.action_type,
        "operation_id": operation.operation_id,
        "state_snapshot": sorted_snapshot,
        "target_resource": operation.target_resource,
    });
    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

impl RollbackManager {
    pub fn new(catalog: Arc<OperationCatalog>, audit: Arc<dyn AuditSink>, window_hours: u64) -> Self {
        let window = Duration::try_hours(i64::try_from(window_hours).unwrap_or(i64::MAX))
            .unwrap_or_else(|| Duration::days(36_500));
        Self {
            catalog,
            audit,
            window,
            plans: Mutex::new(HashMap::new()),
            history: Mutex::new(Vec::new()),
        }
    }

    /// None when the action is not reversible or has no rollback recipe.
    /// The plan is retained until the rollback window closes.
    pub fn create_rollback_plan(
        &self,
        operation: &Operation,
        state_snapshot: StateSnapshot,
    ) -> Option<RollbackPlan> {
        let rollback_operation = self.catalog.derive_rollback(operation, &state_snapshot)?;
        let plan = RollbackPlan {
            original_operation: operation.clone(),
            rollback_operation,
            plan_hash: plan_hash(operation, &state_snapshot),
            state_snapshot,
            created_at: Utc::now(),
        };

        info!(
            event_name = "engine.rollback.plan_created",
            operation_id = %operation.operation_id,
            incident_id = %operation.incident_id,
            rollback_action_type = %plan.rollback_operation.action_type,
            plan_hash = %plan.plan_hash,
            "rollback plan created"
        );
        recover(self.plans.lock()).insert(operation.operation_id.clone(), plan.clone());
        Some(plan)
    }

    pub fn get_plan(&self, original_operation_id: &OperationId) -> Option<RollbackPlan> {
        recover(self.plans.lock()).get(original_operation_id).cloned()
    }

    /// Drops plans older than the rollback window; returns how many were dropped.
    pub fn purge_expired_plans(&self) -> usize {
        let cutoff = Utc::now().checked_sub_signed(self.window);
        let mut plans = recover(self.plans.lock());
        let before = plans.len();
        if let Some(cutoff) = cutoff {
            plans.retain(|_, plan| plan.created_at > cutoff);
        }
        before - plans.len()
    }

    /// Executes the plan's inverse operation for real. Every attempt that
    /// reaches the implementation is appended to the history.
    pub async fn execute_rollback(
        &self,
        plan: &RollbackPlan,
        reason: &str,
        environment: &Environment,
    ) -> Result<RollbackRecord, RollbackError> {
        let rollback = &plan.rollback_operation;
        let original = &plan.original_operation;

        let Some(implementation) = self.catalog.get_implementation(&rollback.action_type) else {
            error!(
                event_name = "engine.rollback.no_implementation",
                operation_id = %original.operation_id,
                rollback_action_type = %rollback.action_type,
                "no implementation for rollback action"
            );
            self.audit.emit(
                AuditEvent::for_operation(
                    original,
                    "rollback.failed",
                    AuditCategory::Rollback,
                    ROLLBACK_ACTOR,
                    AuditOutcome::Failed,
                )
                .with_metadata("error", "no implementation"),
            );
            return Err(RollbackError::NoImplementation(rollback.action_type.clone()));
        };

        let executed = implementation.execute(rollback, environment, false).await;
        let (result, failure) = match executed {
            Ok(outcome) if outcome.success => (RollbackResult::Succeeded { outcome }, None),
            Ok(outcome) => (
                RollbackResult::Failed { error: outcome.message.clone() },
                Some(RollbackError::Rejected {
                    rollback_id: rollback.operation_id.clone(),
                    message: outcome.message,
                }),
            ),
            Err(source) => (
                RollbackResult::Failed { error: source.to_string() },
                Some(RollbackError::ExecutionFailed {
                    rollback_id: rollback.operation_id.clone(),
                    original_operation_id: original.operation_id.clone(),
                    source,
                }),
            ),
        };

        let record = RollbackRecord {
            rollback_id: rollback.operation_id.clone(),
            original_operation_id: original.operation_id.clone(),
            rollback_action_type: rollback.action_type.clone(),
            reason: reason.to_string(),
            result,
            timestamp: Utc::now(),
        };
        recover(self.history.lock()).push(record.clone());

        let outcome = if failure.is_none() { AuditOutcome::Success } else { AuditOutcome::Failed };
        self.audit.emit(
            AuditEvent::for_operation(
                original,
                "rollback.executed",
                AuditCategory::Rollback,
                ROLLBACK_ACTOR,
                outcome,
            )
            .with_metadata("rollback_id", rollback.operation_id.0.clone())
            .with_metadata("reason", reason),
        );

        if let Some(failure) = failure {
            warn!(
                event_name = "engine.rollback.failed",
                operation_id = %original.operation_id,
                rollback_id = %rollback.operation_id,
                error = %failure,
                "rollback failed"
            );
            return Err(failure);
        }

        recover(self.plans.lock()).remove(&original.operation_id);
        info!(
            event_name = "engine.rollback.completed",
            operation_id = %original.operation_id,
            incident_id = %original.incident_id,
            rollback_id = %rollback.operation_id,
            "rollback completed"
        );
        Ok(record)
    }

    /// Isolated copy of every rollback attempt so far.
    pub fn get_rollback_history(&self) -> Vec<RollbackRecord> {
        recover(self.history.lock()).clone()
    }
}
