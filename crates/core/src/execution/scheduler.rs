//! Admission, approval gating and dispatch of remediation operations.
//!
//! `submit` runs the safety pipeline and either rejects the operation, holds
//! it for a human decision or queues it. Dispatch pulls the highest-priority
//! operation that fits the concurrency limits, pays the rate limiter, then
//! executes it under its timeout with transient-failure retries.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::approvals::ApprovalWorkflow;
use crate::audit::{AuditCategory, AuditEvent, AuditOutcome};
use crate::catalog::OperationImplementation;
use crate::config::RateLimitMode;
use crate::context::EngineContext;
use crate::domain::approval::{ApprovalId, ApprovalRequest, ApprovalStatus};
use crate::domain::execution::ExecutionOutcome;
use crate::domain::operation::{
    Operation, OperationDefinition, OperationId, OperationStatus, StateSnapshot,
};
use crate::domain::rollback::{RollbackPlan, RollbackRecord};
use crate::errors::{ApprovalError, ErrorKind, ExecutionFailure, RollbackError, TimeoutError};
use crate::execution::concurrency::{ConcurrencyController, ConcurrencyStatus};
use crate::execution::monitor::{ExecutionMonitor, MonitoredExecution};
use crate::execution::priority::{determine_priority, Priority};
use crate::execution::queue::{PrioritizedEntry, PriorityQueue, QueueStats};
use crate::execution::rate_limit::{RateLimiter, RateLimiterStatus};
use crate::rollback::RollbackManager;
use crate::safety::{SafetyValidator, ValidationResult};

const SCHEDULER_ACTOR: &str = "scheduler";

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SubmissionOutcome {
    Rejected { operation_id: OperationId, validation: ValidationResult },
    AwaitingApproval {
        operation_id: OperationId,
        validation: ValidationResult,
        approval: ApprovalRequest,
    },
    Queued { operation_id: OperationId, validation: ValidationResult, priority: Priority },
    /// Already tracked and not yet terminal.
    Duplicate { operation_id: OperationId },
}

impl SubmissionOutcome {
    pub fn operation_id(&self) -> &OperationId {
        match self {
            Self::Rejected { operation_id, .. }
            | Self::AwaitingApproval { operation_id, .. }
            | Self::Queued { operation_id, .. }
            | Self::Duplicate { operation_id } => operation_id,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReleaseOutcome {
    Queued { operation_id: OperationId, priority: Priority },
    StillPending { operation_id: OperationId },
    Denied { operation_id: OperationId, status: ApprovalStatus },
    /// Approved, but the id had already been queued or run.
    Duplicate { operation_id: OperationId },
    /// No held operation references the approval.
    NotHeld,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ExecutionReport {
    pub operation_id: OperationId,
    pub status: OperationStatus,
    pub attempts: u32,
    pub outcome: Option<ExecutionOutcome>,
    pub error: Option<String>,
    pub rollback_plan_hash: Option<String>,
    pub elapsed_ms: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SchedulerStatus {
    pub queue: QueueStats,
    pub concurrency: ConcurrencyStatus,
    pub rate_limit: RateLimiterStatus,
    pub executing: Vec<MonitoredExecution>,
    pub awaiting_approval: usize,
}

struct HeldOperation {
    operation: Operation,
    approval_id: ApprovalId,
    priority: Priority,
    dry_run_first: bool,
}

pub struct RemediationScheduler {
    context: EngineContext,
    queue: PriorityQueue,
    rate_limiter: RateLimiter,
    concurrency: ConcurrencyController,
    monitor: Arc<ExecutionMonitor>,
    safety: SafetyValidator,
    approvals: ApprovalWorkflow,
    rollback: RollbackManager,
    held: Mutex<HashMap<OperationId, HeldOperation>>,
    dry_run_first: Mutex<HashSet<OperationId>>,
    statuses: Mutex<HashMap<OperationId, OperationStatus>>,
    dispatch: tokio::sync::Mutex<()>,
}

fn recover<T>(result: std::sync::LockResult<MutexGuard<'_, T>>) -> MutexGuard<'_, T> {
    match result {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn risk_assessment(definition: &OperationDefinition, validation: &ValidationResult) -> String {
    let mut assessment = format!(
        "{} risk {} action",
        definition.risk_level.as_str(),
        definition.category.as_str()
    );
    if !validation.warnings.is_empty() {
        assessment.push_str("; ");
        assessment.push_str(&validation.warnings.join("; "));
    }
    assessment
}

impl RemediationScheduler {
    pub fn new(context: EngineContext) -> Self {
        let config = &context.config;
        let monitor = Arc::new(ExecutionMonitor::new(Duration::from_secs(
            config.execution.default_timeout_seconds,
        )));
        Self {
            queue: PriorityQueue::new(),
            rate_limiter: RateLimiter::from_config(&config.rate_limit),
            concurrency: ConcurrencyController::from_config(&config.execution)
                .with_catalog(&context.catalog),
            monitor,
            safety: context.safety_validator(),
            approvals: context.approval_workflow(),
            rollback: context.rollback_manager(),
            held: Mutex::new(HashMap::new()),
            dry_run_first: Mutex::new(HashSet::new()),
            statuses: Mutex::new(HashMap::new()),
            dispatch: tokio::sync::Mutex::new(()),
            context,
        }
    }

    pub fn context(&self) -> &EngineContext {
        &self.context
    }

    pub fn approvals(&self) -> &ApprovalWorkflow {
        &self.approvals
    }

    pub fn safety(&self) -> &SafetyValidator {
        &self.safety
    }

    pub fn rollback_manager(&self) -> &RollbackManager {
        &self.rollback
    }

    pub fn operation_status(&self, operation_id: &OperationId) -> Option<OperationStatus> {
        recover(self.statuses.lock()).get(operation_id).copied()
    }

    fn set_status(&self, operation_id: &OperationId, status: OperationStatus) {
        recover(self.statuses.lock()).insert(operation_id.clone(), status);
    }

    /// Marks the id PENDING unless it is live or the queue already took it.
    /// Rejected and cancelled-while-queued ids may be submitted again.
    fn reserve(&self, operation_id: &OperationId) -> bool {
        let mut statuses = recover(self.statuses.lock());
        let live = statuses.get(operation_id).is_some_and(|status| !status.is_terminal());
        if live || self.queue.has_seen(operation_id) {
            return false;
        }
        statuses.insert(operation_id.clone(), OperationStatus::Pending);
        true
    }

    fn audit_event(
        &self,
        operation: &Operation,
        event_type: &str,
        category: AuditCategory,
        outcome: AuditOutcome,
    ) -> AuditEvent {
        AuditEvent::for_operation(operation, event_type, category, SCHEDULER_ACTOR, outcome)
    }

    fn enqueue(&self, operation: Operation, priority: Priority, dry_run_first: bool) -> bool {
        let operation_id = operation.operation_id.clone();
        if !self.queue.enqueue(operation, priority) {
            return false;
        }
        if dry_run_first {
            recover(self.dry_run_first.lock()).insert(operation_id.clone());
        }
        self.set_status(&operation_id, OperationStatus::Queued);
        true
    }

    /// Validates `operation` and routes it to rejection, approval or the queue.
    pub async fn submit(&self, operation: Operation) -> Result<SubmissionOutcome, ApprovalError> {
        let operation_id = operation.operation_id.clone();
        if !self.reserve(&operation_id) {
            warn!(
                event_name = "engine.scheduler.duplicate_submission",
                operation_id = %operation_id,
                "operation already tracked"
            );
            return Ok(SubmissionOutcome::Duplicate { operation_id });
        }

        let validation = self.safety.validate(&operation).await;
        let definition = match self.context.catalog.get_definition(&operation.action_type) {
            Some(definition) if validation.is_safe => definition,
            _ => {
                self.set_status(&operation_id, OperationStatus::Rejected);
                self.context.audit.emit(
                    self.audit_event(&operation, "safety.rejected", AuditCategory::Safety, AuditOutcome::Rejected)
                        .with_metadata("errors", validation.errors.join("; ")),
                );
                return Ok(SubmissionOutcome::Rejected { operation_id, validation });
            }
        };
        self.set_status(&operation_id, OperationStatus::Validated);

        let priority = determine_priority(&operation, definition);
        if validation.requires_approval {
            let assessment = risk_assessment(definition, &validation);
            let request = match self
                .approvals
                .submit_for_approval(&operation, definition.risk_level, &assessment)
                .await
            {
                Ok(request) => request,
                Err(err) => {
                    recover(self.statuses.lock()).remove(&operation_id);
                    return Err(err);
                }
            };
            if !request.status.permits_execution() {
                self.set_status(&operation_id, OperationStatus::AwaitingApproval);
                recover(self.held.lock()).insert(
                    operation_id.clone(),
                    HeldOperation {
                        operation,
                        approval_id: request.approval_id.clone(),
                        priority,
                        dry_run_first: validation.requires_dry_run,
                    },
                );
                return Ok(SubmissionOutcome::AwaitingApproval {
                    operation_id,
                    validation,
                    approval: request,
                });
            }
        }

        if !self.enqueue(operation, priority, validation.requires_dry_run) {
            return Ok(SubmissionOutcome::Duplicate { operation_id });
        }
        info!(
            event_name = "engine.scheduler.queued",
            operation_id = %operation_id,
            priority = priority.value(),
            "operation queued"
        );
        Ok(SubmissionOutcome::Queued { operation_id, validation, priority })
    }

    /// Moves the operation held on `approval_id` forward once it is decided.
    pub async fn release_approved(
        &self,
        approval_id: &ApprovalId,
    ) -> Result<ReleaseOutcome, ApprovalError> {
        let held_id = recover(self.held.lock())
            .iter()
            .find(|(_, held)| held.approval_id == *approval_id)
            .map(|(operation_id, _)| operation_id.clone());
        let Some(operation_id) = held_id else {
            return Ok(ReleaseOutcome::NotHeld);
        };

        let status = self.approvals.get_status(approval_id).await?;
        if status == ApprovalStatus::Pending {
            return Ok(ReleaseOutcome::StillPending { operation_id });
        }

        let Some(held) = recover(self.held.lock()).remove(&operation_id) else {
            return Ok(ReleaseOutcome::NotHeld);
        };

        if status.permits_execution() {
            let priority = held.priority;
            if !self.enqueue(held.operation, priority, held.dry_run_first) {
                let status = if self.queue.is_pending(&operation_id) {
                    OperationStatus::Queued
                } else {
                    OperationStatus::Cancelled
                };
                self.set_status(&operation_id, status);
                warn!(
                    event_name = "engine.scheduler.release_duplicate",
                    operation_id = %operation_id,
                    approval_id = %approval_id,
                    "approved operation was already queued or run"
                );
                return Ok(ReleaseOutcome::Duplicate { operation_id });
            }
            info!(
                event_name = "engine.scheduler.released",
                operation_id = %operation_id,
                approval_id = %approval_id,
                "approved operation queued"
            );
            return Ok(ReleaseOutcome::Queued { operation_id, priority });
        }

        self.set_status(&operation_id, OperationStatus::Cancelled);
        self.context.audit.emit(
            self.audit_event(&held.operation, "execution.cancelled", AuditCategory::Execution, AuditOutcome::Rejected)
                .with_metadata("approval_status", status.as_str()),
        );
        info!(
            event_name = "engine.scheduler.denied",
            operation_id = %operation_id,
            approval_status = status.as_str(),
            "held operation dropped"
        );
        Ok(ReleaseOutcome::Denied { operation_id, status })
    }

    /// Sweeps every held operation; returns the ones that moved.
    pub async fn release_decided(&self) -> Result<Vec<ReleaseOutcome>, ApprovalError> {
        let approval_ids: Vec<ApprovalId> =
            recover(self.held.lock()).values().map(|held| held.approval_id.clone()).collect();
        let mut moved = Vec::new();
        for approval_id in approval_ids {
            match self.release_approved(&approval_id).await? {
                ReleaseOutcome::StillPending { .. } | ReleaseOutcome::NotHeld => {}
                outcome => moved.push(outcome),
            }
        }
        Ok(moved)
    }

    /// Cancels a queued or held operation. Executing operations are not interrupted.
    pub fn cancel(&self, operation_id: &OperationId) -> bool {
        let removed =
            self.queue.remove(operation_id) || recover(self.held.lock()).remove(operation_id).is_some();
        if removed {
            recover(self.dry_run_first.lock()).remove(operation_id);
            self.set_status(operation_id, OperationStatus::Cancelled);
            info!(
                event_name = "engine.scheduler.cancelled",
                operation_id = %operation_id,
                "operation cancelled"
            );
        }
        removed
    }

    /// Takes a concurrency slot and the target lock together, or neither.
    fn claim(&self, operation: &Operation) -> bool {
        if !self.concurrency.acquire(operation) {
            debug!(
                event_name = "engine.scheduler.at_capacity",
                operation_id = %operation.operation_id,
                "no concurrency slot; trying later entries"
            );
            return false;
        }
        let ttl = self
            .context
            .catalog
            .get_definition(&operation.action_type)
            .map(|definition| self.context.lock_ttl_for(definition));
        if !self.safety.lock_resource(&operation.target_resource, &operation.operation_id, ttl) {
            self.concurrency.release(&operation.operation_id);
            debug!(
                event_name = "engine.scheduler.resource_busy",
                operation_id = %operation.operation_id,
                resource = %operation.target_resource,
                "target resource locked; trying later entries"
            );
            return false;
        }
        true
    }

    fn abandon_claim(&self, entry: PrioritizedEntry) {
        let operation = &entry.operation;
        self.safety.unlock_resource_if_owner(&operation.target_resource, &operation.operation_id);
        self.concurrency.release(&operation.operation_id);
        self.queue.restore(entry);
    }

    /// Claims the best-ranked runnable operation, or None when nothing can start now.
    async fn try_dispatch(&self) -> Option<PrioritizedEntry> {
        let _dispatching = self.dispatch.lock().await;

        let entry = self.queue.dequeue_first_matching(|entry| self.claim(&entry.operation))?;

        match self.context.config.rate_limit.mode {
            RateLimitMode::Wait => self.rate_limiter.acquire().await,
            RateLimitMode::Reject => {
                if !self.rate_limiter.try_acquire().await {
                    debug!(
                        event_name = "engine.scheduler.rate_limited",
                        operation_id = %entry.operation.operation_id,
                        "rate limit saturated; dispatch deferred"
                    );
                    self.abandon_claim(entry);
                    return None;
                }
            }
        }

        self.safety.register_active(&entry.operation);
        self.set_status(&entry.operation.operation_id, OperationStatus::Executing);
        Some(entry)
    }

    async fn attempt(
        &self,
        implementation: &dyn OperationImplementation,
        operation: &Operation,
        timeout: Duration,
        dry_run: bool,
    ) -> Result<ExecutionOutcome, ExecutionFailure> {
        let call = implementation.execute(operation, &self.context.environment, dry_run);
        match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(TimeoutError {
                operation_id: operation.operation_id.clone(),
                timeout_seconds: timeout.as_secs(),
            }
            .into()),
        }
    }

    async fn execute_with_retries(
        &self,
        implementation: &dyn OperationImplementation,
        operation: &Operation,
        definition: &OperationDefinition,
    ) -> (Result<ExecutionOutcome, ExecutionFailure>, u32) {
        let timeout = self.context.timeout_for(definition);
        let retry = self.context.retry_policy_for(definition);
        let mut attempt = 0u32;
        loop {
            match self.attempt(implementation, operation, timeout, false).await {
                Ok(outcome) => return (Ok(outcome), attempt + 1),
                Err(failure) if retry.should_retry(attempt, &failure) => {
                    let delay = retry.get_retry_delay(attempt);
                    warn!(
                        event_name = "engine.scheduler.retrying",
                        operation_id = %operation.operation_id,
                        attempt = attempt + 1,
                        error_kind = failure.kind.as_str(),
                        delay_ms = delay.as_millis() as u64,
                        "transient failure; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(failure) => return (Err(failure), attempt + 1),
            }
        }
    }

    async fn run_entry(
        &self,
        operation: &Operation,
    ) -> (Result<ExecutionOutcome, ExecutionFailure>, u32, Option<RollbackPlan>) {
        let catalog = &self.context.catalog;
        let Some(definition) = catalog.get_definition(&operation.action_type) else {
            let failure = ExecutionFailure::new(
                ErrorKind::InvalidArgument,
                format!("unknown action type `{}`", operation.action_type),
            );
            return (Err(failure), 0, None);
        };
        let Some(implementation) = catalog.get_implementation(&operation.action_type) else {
            let failure = ExecutionFailure::new(
                ErrorKind::Internal,
                format!("no implementation registered for `{}`", operation.action_type),
            );
            return (Err(failure), 0, None);
        };
        let environment = &self.context.environment;

        if !implementation.validate_prerequisites(operation, environment).await {
            let failure = ExecutionFailure::new(
                ErrorKind::InvalidArgument,
                "implementation prerequisites not met",
            );
            return (Err(failure), 0, None);
        }

        let snapshot: StateSnapshot = if definition.is_reversible {
            match implementation.capture_state(operation, environment).await {
                Ok(snapshot) => snapshot,
                Err(failure) => return (Err(failure), 0, None),
            }
        } else {
            StateSnapshot::new()
        };

        let dry_run_first = recover(self.dry_run_first.lock()).remove(&operation.operation_id);
        if dry_run_first {
            let timeout = self.context.timeout_for(definition);
            match self.attempt(implementation.as_ref(), operation, timeout, true).await {
                Ok(outcome) if outcome.success => {
                    info!(
                        event_name = "engine.scheduler.dry_run_passed",
                        operation_id = %operation.operation_id,
                        "dry run passed"
                    );
                }
                Ok(outcome) => {
                    let failure = ExecutionFailure::new(
                        ErrorKind::InvalidArgument,
                        format!("dry run failed: {}", outcome.message),
                    );
                    return (Err(failure), 1, None);
                }
                Err(failure) => return (Err(failure), 1, None),
            }
        }

        let (result, attempts) =
            self.execute_with_retries(implementation.as_ref(), operation, definition).await;
        let plan = match &result {
            Ok(outcome) if outcome.success && definition.is_reversible => {
                self.rollback.create_rollback_plan(operation, snapshot)
            }
            _ => None,
        };
        (result, attempts, plan)
    }

    /// Runs a claimed entry to completion and releases everything it held.
    async fn execute_dispatched(&self, entry: PrioritizedEntry) -> ExecutionReport {
        let operation = entry.operation;
        let operation_id = operation.operation_id.clone();
        let started = Instant::now();

        let timeout = self
            .context
            .catalog
            .get_definition(&operation.action_type)
            .map(|definition| self.context.timeout_for(definition));
        self.monitor.start(&operation_id, timeout);
        info!(
            event_name = "engine.scheduler.executing",
            operation_id = %operation_id,
            incident_id = %operation.incident_id,
            action_type = %operation.action_type,
            priority = entry.priority.value(),
            "operation dispatched"
        );

        let (result, attempts, plan) = self.run_entry(&operation).await;

        self.monitor.stop(&operation_id);
        self.concurrency.release(&operation_id);
        self.safety.unlock_resource_if_owner(&operation.target_resource, &operation_id);
        self.safety.deactivate(&operation_id);

        let (status, outcome, error_message) = match result {
            Ok(outcome) if outcome.success => (OperationStatus::Completed, Some(outcome), None),
            Ok(outcome) => {
                let message = outcome.message.clone();
                (OperationStatus::Failed, Some(outcome), Some(message))
            }
            Err(failure) if failure.kind == ErrorKind::Timeout => {
                (OperationStatus::TimedOut, None, Some(failure.to_string()))
            }
            Err(failure) => (OperationStatus::Failed, None, Some(failure.to_string())),
        };
        self.set_status(&operation_id, status);

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let mut event = match status {
            OperationStatus::Completed => {
                info!(
                    event_name = "engine.scheduler.completed",
                    operation_id = %operation_id,
                    attempts,
                    elapsed_ms,
                    "operation completed"
                );
                self.audit_event(&operation, "execution.completed", AuditCategory::Execution, AuditOutcome::Success)
            }
            _ => {
                error!(
                    event_name = "engine.scheduler.failed",
                    operation_id = %operation_id,
                    status = status.as_str(),
                    attempts,
                    error = error_message.as_deref().unwrap_or(""),
                    "operation did not complete"
                );
                self.audit_event(&operation, "execution.failed", AuditCategory::Execution, AuditOutcome::Failed)
                    .with_metadata("error", error_message.clone().unwrap_or_default())
            }
        };
        event = event
            .with_metadata("status", status.as_str())
            .with_metadata("attempts", attempts.to_string());
        self.context.audit.emit(event);

        ExecutionReport {
            operation_id,
            status,
            attempts,
            outcome,
            error: error_message,
            rollback_plan_hash: plan.map(|plan| plan.plan_hash),
            elapsed_ms,
        }
    }

    /// Dispatches and runs at most one operation inline.
    pub async fn run_once(&self) -> Option<ExecutionReport> {
        let entry = self.try_dispatch().await?;
        Some(self.execute_dispatched(entry).await)
    }

    /// Poll loop: releases decided approvals, dispatches everything that fits
    /// and runs each dispatched operation on its own task. Returns after
    /// `shutdown` flips to true and in-flight executions finish.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let execution = &self.context.config.execution;
        let poll_interval = Duration::from_millis(execution.poll_interval_ms);
        let watchdog = Arc::clone(&self.monitor).spawn_watchdog(
            Duration::from_secs(execution.monitor_interval_seconds),
            shutdown.clone(),
            None,
        );
        info!(event_name = "engine.scheduler.started", "scheduler started");

        let mut tasks = JoinSet::new();
        loop {
            if *shutdown.borrow() {
                break;
            }
            if let Err(err) = self.release_decided().await {
                warn!(
                    event_name = "engine.scheduler.release_failed",
                    error = %err,
                    "could not sweep approval decisions"
                );
            }
            self.safety.cleanup_expired_locks();
            self.rollback.purge_expired_plans();

            while let Some(entry) = self.try_dispatch().await {
                let scheduler = Arc::clone(&self);
                tasks.spawn(async move { scheduler.execute_dispatched(entry).await });
            }
            while let Some(joined) = tasks.try_join_next() {
                if let Err(err) = joined {
                    error!(event_name = "engine.scheduler.task_panicked", error = %err, "execution task failed");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        while tasks.join_next().await.is_some() {}
        let _ = watchdog.await;
        info!(event_name = "engine.scheduler.stopped", "scheduler stopped");
    }

    /// Executes the retained rollback plan for a completed operation.
    pub async fn rollback_operation(
        &self,
        operation_id: &OperationId,
        reason: &str,
    ) -> Result<RollbackRecord, RollbackError> {
        let plan = self
            .rollback
            .get_plan(operation_id)
            .ok_or_else(|| RollbackError::NoPlan(operation_id.clone()))?;
        let record = self.rollback.execute_rollback(&plan, reason, &self.context.environment).await?;
        self.set_status(operation_id, OperationStatus::RolledBack);
        Ok(record)
    }

    pub async fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            queue: self.queue.stats(),
            concurrency: self.concurrency.status(),
            rate_limit: self.rate_limiter.status().await,
            executing: self.monitor.active(),
            awaiting_approval: recover(self.held.lock()).len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::sync::watch;

    use super::{ReleaseOutcome, RemediationScheduler, SubmissionOutcome};
    use crate::audit::InMemoryAuditSink;
    use crate::catalog::standard::standard_catalog;
    use crate::catalog::testing::{shared, FakeImplementation};
    use crate::catalog::{OperationCatalog, OperationImplementation};
    use crate::config::{EngineConfig, RateLimitMode};
    use crate::context::EngineContext;
    use crate::domain::approval::ApprovalStatus;
    use crate::domain::execution::Environment;
    use crate::domain::operation::{
        Operation, OperationCategory, OperationDefinition, OperationStatus, RiskLevel,
        RollbackSpec, StateSnapshot,
    };
    use crate::errors::ErrorKind;
    use crate::execution::Priority;

    fn fast_config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.retry.initial_delay_ms = 1;
        config.retry.max_delay_ms = 5;
        config.rate_limit.max_calls = 100;
        config.execution.poll_interval_ms = 10;
        config.execution.monitor_interval_seconds = 1;
        config
    }

    fn register(catalog: &mut OperationCatalog, action_type: &str, fake: &Arc<FakeImplementation>) {
        let fake = Arc::clone(fake);
        catalog
            .register_implementation(action_type, move || {
                Arc::clone(&fake) as Arc<dyn OperationImplementation>
            })
            .unwrap();
    }

    fn scheduler_with(
        config: EngineConfig,
        catalog: OperationCatalog,
    ) -> (RemediationScheduler, InMemoryAuditSink) {
        let audit = InMemoryAuditSink::default();
        let context = EngineContext::new(config, catalog, Environment::new("proj-1"))
            .with_audit(Arc::new(audit.clone()));
        (RemediationScheduler::new(context), audit)
    }

    fn block_ip(target: &str) -> Operation {
        Operation::new("inc-1", "block_ip", target)
            .with_param("ip_address", "203.0.113.9")
            .with_param("network", "default")
    }

    fn block_ip_fake() -> Arc<FakeImplementation> {
        let mut state = StateSnapshot::new();
        state.insert("rule_name".to_string(), "deny-203-0-113-9".into());
        state.insert("network".to_string(), "default".into());
        let spec = RollbackSpec::new("unblock_ip")
            .map_state("rule_name", "rule_name")
            .map_state("network", "network");
        shared(FakeImplementation { state, ..FakeImplementation::with_rollback(spec) })
    }

    #[tokio::test]
    async fn medium_risk_operation_runs_and_leaves_a_rollback_plan() {
        let block = block_ip_fake();
        let unblock = shared(FakeImplementation::default());
        let mut catalog = standard_catalog();
        register(&mut catalog, "block_ip", &block);
        register(&mut catalog, "unblock_ip", &unblock);
        let (scheduler, audit) = scheduler_with(fast_config(), catalog);

        let operation = block_ip("net-1");
        let operation_id = operation.operation_id.clone();
        let outcome = scheduler.submit(operation).await.unwrap();
        assert!(matches!(outcome, SubmissionOutcome::Queued { .. }));

        let report = scheduler.run_once().await.expect("operation dispatched");
        assert_eq!(report.status, OperationStatus::Completed);
        assert_eq!(report.attempts, 1);
        assert!(report.rollback_plan_hash.is_some());
        assert_eq!(scheduler.operation_status(&operation_id), Some(OperationStatus::Completed));
        assert_eq!(audit.events_of_type("execution.completed").len(), 1);
        assert_eq!(scheduler.safety().lock_holder("net-1"), None);

        let record = scheduler.rollback_operation(&operation_id, "false positive").await.unwrap();
        assert!(record.result.is_success());
        assert_eq!(unblock.calls(), 1);
        assert_eq!(scheduler.operation_status(&operation_id), Some(OperationStatus::RolledBack));
    }

    #[tokio::test]
    async fn unsafe_operations_are_rejected_without_queueing() {
        let (scheduler, audit) = scheduler_with(fast_config(), standard_catalog());
        let operation = Operation::new("inc-1", "block_ip", "net-1");

        let outcome = scheduler.submit(operation).await.unwrap();

        let SubmissionOutcome::Rejected { validation, .. } = outcome else {
            panic!("expected rejection, got {outcome:?}");
        };
        assert!(!validation.is_safe);
        assert!(scheduler.run_once().await.is_none());
        assert_eq!(audit.events_of_type("safety.rejected").len(), 1);
    }

    #[tokio::test]
    async fn high_risk_operation_waits_for_a_human_decision() {
        let fake = shared(FakeImplementation::default());
        let mut catalog = standard_catalog();
        register(&mut catalog, "stop_instance", &fake);
        let (scheduler, _audit) = scheduler_with(fast_config(), catalog);

        let operation = Operation::new("inc-2", "stop_instance", "web-1")
            .with_param("instance_name", "web-1")
            .with_param("zone", "us-central1-a");
        let operation_id = operation.operation_id.clone();
        let SubmissionOutcome::AwaitingApproval { approval, .. } =
            scheduler.submit(operation).await.unwrap()
        else {
            panic!("expected approval hold");
        };
        assert!(scheduler.run_once().await.is_none());
        assert_eq!(
            scheduler.release_approved(&approval.approval_id).await.unwrap(),
            ReleaseOutcome::StillPending { operation_id: operation_id.clone() }
        );

        scheduler
            .approvals()
            .update_status(&approval.approval_id, ApprovalStatus::Approved, "oncall@example.com", None)
            .await
            .unwrap();
        let released = scheduler.release_decided().await.unwrap();
        assert!(matches!(released.as_slice(), [ReleaseOutcome::Queued { .. }]));

        let report = scheduler.run_once().await.expect("approved operation runs");
        assert_eq!(report.status, OperationStatus::Completed);
        assert_eq!(fake.calls(), 1);
    }

    #[tokio::test]
    async fn rejected_approval_cancels_the_held_operation() {
        let (scheduler, audit) = scheduler_with(fast_config(), standard_catalog());
        let operation = Operation::new("inc-2", "disable_user_account", "user-prod")
            .with_param("user_email", "mallory@example.com");
        let operation_id = operation.operation_id.clone();
        let SubmissionOutcome::AwaitingApproval { approval, .. } =
            scheduler.submit(operation).await.unwrap()
        else {
            panic!("expected approval hold");
        };

        scheduler
            .approvals()
            .update_status(&approval.approval_id, ApprovalStatus::Rejected, "lead@example.com", Some("too broad"))
            .await
            .unwrap();

        assert_eq!(
            scheduler.release_approved(&approval.approval_id).await.unwrap(),
            ReleaseOutcome::Denied { operation_id: operation_id.clone(), status: ApprovalStatus::Rejected }
        );
        assert_eq!(scheduler.operation_status(&operation_id), Some(OperationStatus::Cancelled));
        assert_eq!(audit.events_of_type("execution.cancelled").len(), 1);
    }

    #[tokio::test]
    async fn non_production_targets_skip_the_approval_hold() {
        let fake = shared(FakeImplementation::default());
        let mut catalog = standard_catalog();
        register(&mut catalog, "stop_instance", &fake);
        let (scheduler, _audit) = scheduler_with(fast_config(), catalog);

        let operation = Operation::new("inc-3", "stop_instance", "batch-staging")
            .with_param("instance_name", "batch-staging")
            .with_param("zone", "us-central1-a");

        let outcome = scheduler.submit(operation).await.unwrap();
        assert!(matches!(outcome, SubmissionOutcome::Queued { .. }));
    }

    #[tokio::test]
    async fn transient_failures_are_retried_until_success() {
        let fake = shared(FakeImplementation::failing_with(vec![
            ErrorKind::Connection,
            ErrorKind::RateLimited,
        ]));
        let mut catalog = standard_catalog();
        register(&mut catalog, "enable_vpc_flow_logs", &fake);
        let (scheduler, _audit) = scheduler_with(fast_config(), catalog);

        let operation = Operation::new("inc-4", "enable_vpc_flow_logs", "subnet-a")
            .with_param("subnetwork", "subnet-a")
            .with_param("region", "us-central1");
        scheduler.submit(operation).await.unwrap();

        let report = scheduler.run_once().await.unwrap();
        assert_eq!(report.status, OperationStatus::Completed);
        assert_eq!(report.attempts, 3);
        assert_eq!(fake.calls(), 3);
    }

    #[tokio::test]
    async fn permanent_failures_fail_on_the_first_attempt() {
        let fake = shared(FakeImplementation::failing_with(vec![ErrorKind::PermissionDenied]));
        let mut catalog = standard_catalog();
        register(&mut catalog, "enable_vpc_flow_logs", &fake);
        let (scheduler, audit) = scheduler_with(fast_config(), catalog);

        let operation = Operation::new("inc-4", "enable_vpc_flow_logs", "subnet-a")
            .with_param("subnetwork", "subnet-a")
            .with_param("region", "us-central1");
        scheduler.submit(operation).await.unwrap();

        let report = scheduler.run_once().await.unwrap();
        assert_eq!(report.status, OperationStatus::Failed);
        assert_eq!(report.attempts, 1);
        assert!(report.error.unwrap_or_default().contains("scripted"));
        assert_eq!(audit.events_of_type("execution.failed").len(), 1);
        assert_eq!(scheduler.status().await.concurrency.active_total, 0);
    }

    #[tokio::test]
    async fn overrunning_executions_time_out() {
        let fake = shared(FakeImplementation { delay_ms: 1_500, ..FakeImplementation::default() });
        let mut catalog = OperationCatalog::new();
        catalog.register_definition(
            OperationDefinition::new("slow_scan", OperationCategory::Other, RiskLevel::Low)
                .timeout_seconds(1)
                .max_retries(0),
        );
        register(&mut catalog, "slow_scan", &fake);
        let (scheduler, _audit) = scheduler_with(fast_config(), catalog);

        scheduler.submit(Operation::new("inc-5", "slow_scan", "host-1")).await.unwrap();

        let report = scheduler.run_once().await.unwrap();
        assert_eq!(report.status, OperationStatus::TimedOut);
        assert_eq!(report.attempts, 1);
    }

    #[tokio::test]
    async fn containment_runs_before_additive_hardening() {
        let audit_logging = shared(FakeImplementation::default());
        let block = block_ip_fake();
        let mut catalog = standard_catalog();
        register(&mut catalog, "enable_audit_logging", &audit_logging);
        register(&mut catalog, "block_ip", &block);
        let (scheduler, _audit) = scheduler_with(fast_config(), catalog);

        let hardening = Operation::new("inc-6", "enable_audit_logging", "proj-1");
        let containment = block_ip("net-9");
        let containment_id = containment.operation_id.clone();
        let SubmissionOutcome::Queued { priority, .. } = scheduler.submit(hardening).await.unwrap()
        else {
            panic!("expected queueing");
        };
        assert_eq!(priority, Priority::LOW);
        scheduler.submit(containment).await.unwrap();

        let first = scheduler.run_once().await.unwrap();
        assert_eq!(first.operation_id, containment_id);
    }

    #[tokio::test]
    async fn reject_mode_defers_dispatch_when_the_window_is_full() {
        let fake = shared(FakeImplementation::default());
        let mut catalog = standard_catalog();
        register(&mut catalog, "enable_audit_logging", &fake);
        let mut config = fast_config();
        config.rate_limit.max_calls = 1;
        config.rate_limit.window_seconds = 60;
        config.rate_limit.mode = RateLimitMode::Reject;
        let (scheduler, _audit) = scheduler_with(config, catalog);

        scheduler.submit(Operation::new("inc-7", "enable_audit_logging", "proj-a")).await.unwrap();
        scheduler.submit(Operation::new("inc-7", "enable_audit_logging", "proj-b")).await.unwrap();

        assert!(scheduler.run_once().await.is_some());
        assert!(scheduler.run_once().await.is_none());
        let status = scheduler.status().await;
        assert_eq!(status.queue.pending, 1);
        assert_eq!(status.concurrency.active_total, 0);
    }

    #[tokio::test]
    async fn queued_operations_can_be_cancelled() {
        let (scheduler, _audit) = scheduler_with(fast_config(), standard_catalog());
        let operation = Operation::new("inc-8", "enable_audit_logging", "proj-1");
        let operation_id = operation.operation_id.clone();
        scheduler.submit(operation).await.unwrap();

        assert!(scheduler.cancel(&operation_id));
        assert!(!scheduler.cancel(&operation_id));
        assert_eq!(scheduler.operation_status(&operation_id), Some(OperationStatus::Cancelled));
        assert!(scheduler.run_once().await.is_none());
    }

    #[tokio::test]
    async fn resubmitting_a_live_operation_is_reported_as_duplicate() {
        let (scheduler, _audit) = scheduler_with(fast_config(), standard_catalog());
        let operation = Operation::new("inc-9", "enable_audit_logging", "proj-1").with_id("op-dup");

        scheduler.submit(operation.clone()).await.unwrap();
        let again = scheduler.submit(operation).await.unwrap();

        assert!(matches!(again, SubmissionOutcome::Duplicate { .. }));
        assert_eq!(scheduler.status().await.queue.pending, 1);
    }

    #[tokio::test]
    async fn critical_operations_dry_run_before_executing() {
        let fake = shared(FakeImplementation::default());
        let mut catalog = standard_catalog();
        register(&mut catalog, "revoke_iam_binding", &fake);
        let (scheduler, _audit) = scheduler_with(fast_config(), catalog);

        let operation = Operation::new("inc-10", "revoke_iam_binding", "proj-prod")
            .with_param("member", "user:eve@example.com")
            .with_param("role", "roles/owner");
        let SubmissionOutcome::AwaitingApproval { approval, validation, .. } =
            scheduler.submit(operation).await.unwrap()
        else {
            panic!("critical actions always need approval");
        };
        assert!(validation.requires_dry_run);
        scheduler
            .approvals()
            .update_status(&approval.approval_id, ApprovalStatus::Approved, "ciso@example.com", None)
            .await
            .unwrap();
        scheduler.release_approved(&approval.approval_id).await.unwrap();

        let report = scheduler.run_once().await.unwrap();
        assert_eq!(report.status, OperationStatus::Completed);
        assert_eq!(fake.calls(), 2);
    }

    #[tokio::test]
    async fn finished_operations_cannot_be_resubmitted() {
        let fake = shared(FakeImplementation::default());
        let mut catalog = standard_catalog();
        register(&mut catalog, "enable_audit_logging", &fake);
        let (scheduler, _audit) = scheduler_with(fast_config(), catalog);
        let operation = Operation::new("inc-12", "enable_audit_logging", "proj-1").with_id("op-x");

        scheduler.submit(operation.clone()).await.unwrap();
        let report = scheduler.run_once().await.unwrap();
        assert_eq!(report.status, OperationStatus::Completed);

        let again = scheduler.submit(operation).await.unwrap();
        assert!(matches!(again, SubmissionOutcome::Duplicate { .. }));
        assert_eq!(scheduler.operation_status(&report.operation_id), Some(OperationStatus::Completed));
        assert_eq!(scheduler.status().await.queue.pending, 0);
        assert_eq!(fake.calls(), 1);
    }

    #[tokio::test]
    async fn cancelled_operations_can_be_submitted_again() {
        let (scheduler, _audit) = scheduler_with(fast_config(), standard_catalog());
        let operation = Operation::new("inc-12", "enable_audit_logging", "proj-1");
        let operation_id = operation.operation_id.clone();

        scheduler.submit(operation.clone()).await.unwrap();
        assert!(scheduler.cancel(&operation_id));

        let again = scheduler.submit(operation).await.unwrap();
        assert!(matches!(again, SubmissionOutcome::Queued { .. }));
        assert_eq!(scheduler.operation_status(&operation_id), Some(OperationStatus::Queued));
    }

    #[tokio::test]
    async fn approval_for_an_already_delivered_operation_is_not_requeued() {
        let (scheduler, _audit) = scheduler_with(fast_config(), standard_catalog());
        let operation = Operation::new("inc-13", "disable_user_account", "user-prod")
            .with_param("user_email", "mallory@example.com");
        let operation_id = operation.operation_id.clone();
        let SubmissionOutcome::AwaitingApproval { approval, .. } =
            scheduler.submit(operation.clone()).await.unwrap()
        else {
            panic!("expected approval hold");
        };
        assert!(scheduler.queue.enqueue(operation, Priority::HIGH));
        assert!(scheduler.queue.dequeue().is_some());

        scheduler
            .approvals()
            .update_status(&approval.approval_id, ApprovalStatus::Approved, "lead@example.com", None)
            .await
            .unwrap();

        assert_eq!(
            scheduler.release_approved(&approval.approval_id).await.unwrap(),
            ReleaseOutcome::Duplicate { operation_id: operation_id.clone() }
        );
        assert_eq!(scheduler.operation_status(&operation_id), Some(OperationStatus::Cancelled));
        let status = scheduler.status().await;
        assert_eq!(status.awaiting_approval, 0);
        assert_eq!(status.queue.pending, 0);
    }

    #[tokio::test]
    async fn firewall_priority_param_keeps_containment_urgent() {
        let (scheduler, _audit) = scheduler_with(fast_config(), standard_catalog());
        let operation = block_ip("net-1").with_param("priority", 100);

        let SubmissionOutcome::Queued { priority, .. } = scheduler.submit(operation).await.unwrap()
        else {
            panic!("expected queueing");
        };
        assert_eq!(priority, Priority::HIGH);
    }

    fn slow_scan_catalog(fake: &Arc<FakeImplementation>) -> OperationCatalog {
        let mut catalog = OperationCatalog::new();
        catalog.register_definition(
            OperationDefinition::new("slow_scan", OperationCategory::Other, RiskLevel::Low)
                .timeout_seconds(10)
                .max_retries(0),
        );
        register(&mut catalog, "slow_scan", fake);
        catalog
    }

    #[tokio::test]
    async fn resource_lock_outlives_the_configured_ttl_while_executing() {
        let fake = shared(FakeImplementation { delay_ms: 1_500, ..FakeImplementation::default() });
        let mut config = fast_config();
        config.safety.lock_ttl_seconds = 1;
        let scheduler = Arc::new(scheduler_with(config, slow_scan_catalog(&fake)).0);

        scheduler.submit(Operation::new("inc-14", "slow_scan", "host-1")).await.unwrap();
        scheduler.submit(Operation::new("inc-14", "slow_scan", "host-1")).await.unwrap();

        let first = tokio::spawn({
            let scheduler = Arc::clone(&scheduler);
            async move { scheduler.run_once().await }
        });
        tokio::time::sleep(Duration::from_millis(1_100)).await;

        assert!(scheduler.run_once().await.is_none());
        let status = scheduler.status().await;
        assert_eq!(status.executing.len(), 1);
        assert_eq!(status.queue.pending, 1);

        let report = first.await.unwrap().expect("first scan dispatched");
        assert_eq!(report.status, OperationStatus::Completed);
        assert!(scheduler.run_once().await.is_some());
        assert_eq!(fake.calls(), 2);
    }

    #[tokio::test]
    async fn saturated_resource_type_does_not_block_other_types() {
        let disks = shared(FakeImplementation { delay_ms: 300, ..FakeImplementation::default() });
        let flow_logs = shared(FakeImplementation::default());
        let mut catalog = standard_catalog();
        register(&mut catalog, "snapshot_disk", &disks);
        register(&mut catalog, "enable_vpc_flow_logs", &flow_logs);
        let mut config = fast_config();
        config.execution.max_per_resource_type.insert("compute".to_string(), 1);
        let scheduler = Arc::new(scheduler_with(config, catalog).0);

        for disk in ["disk-1", "disk-2"] {
            let snapshot = Operation::new("inc-15", "snapshot_disk", disk)
                .with_param("disk_name", disk)
                .with_param("zone", "us-central1-a");
            scheduler.submit(snapshot).await.unwrap();
        }
        let flow = Operation::new("inc-15", "enable_vpc_flow_logs", "subnet-a")
            .with_param("subnetwork", "subnet-a")
            .with_param("region", "us-central1");
        let flow_id = flow.operation_id.clone();
        scheduler.submit(flow).await.unwrap();

        let first = tokio::spawn({
            let scheduler = Arc::clone(&scheduler);
            async move { scheduler.run_once().await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let report = scheduler.run_once().await.expect("network operation dispatched");
        assert_eq!(report.operation_id, flow_id);
        assert_eq!(scheduler.status().await.queue.pending, 1);

        first.await.unwrap().expect("first snapshot dispatched");
        assert!(scheduler.run_once().await.is_some());
        assert_eq!(disks.calls(), 2);
    }

    #[tokio::test]
    async fn run_loop_drains_the_queue_until_shutdown() {
        let fake = shared(FakeImplementation::default());
        let mut catalog = standard_catalog();
        register(&mut catalog, "enable_audit_logging", &fake);
        let scheduler = Arc::new(scheduler_with(fast_config(), catalog).0);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut ids = Vec::new();
        for project in ["proj-a", "proj-b", "proj-c"] {
            let operation = Operation::new("inc-11", "enable_audit_logging", project);
            ids.push(operation.operation_id.clone());
            scheduler.submit(operation).await.unwrap();
        }

        let runner = tokio::spawn(Arc::clone(&scheduler).run(shutdown_rx));
        tokio::time::timeout(Duration::from_secs(5), async {
            while !ids.iter().all(|id| {
                scheduler.operation_status(id) == Some(OperationStatus::Completed)
            }) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("queue drained");

        shutdown_tx.send(true).unwrap();
        runner.await.unwrap();
        assert_eq!(fake.calls(), 3);
    }
}
