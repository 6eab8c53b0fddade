//! Human-approval lifecycle for operations gated by risk.
//!
//! A request starts PENDING and moves exactly once to APPROVED, REJECTED,
//! EXPIRED or AUTO_APPROVED. Expiry is lazy: it is observed on read, so no
//! background sweep is needed for correctness.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use crate::config::ApprovalConfig;
use crate::domain::approval::{ApprovalId, ApprovalRequest, ApprovalStatus};
use crate::domain::operation::{Operation, RiskLevel};
use crate::errors::{ApprovalError, StoreError};

/// Actor recorded on automatic decisions.
pub const SYSTEM_APPROVER: &str = "system";

/// Durable home of approval records.
#[async_trait]
pub trait ApprovalStore: Send + Sync {
    async fn insert(&self, request: &ApprovalRequest) -> Result<(), StoreError>;

    async fn get(&self, approval_id: &ApprovalId) -> Result<Option<ApprovalRequest>, StoreError>;

    /// Replaces the stored record only while it is still PENDING. Decisions
    /// other than EXPIRED also require the stored record to be unexpired.
    /// Returns false when another writer decided it first or it lapsed.
    async fn update_if_pending(&self, request: &ApprovalRequest) -> Result<bool, StoreError>;

    async fn list_by_status(
        &self,
        status: ApprovalStatus,
    ) -> Result<Vec<ApprovalRequest>, StoreError>;
}

#[derive(Default)]
pub struct InMemoryApprovalStore {
    requests: RwLock<HashMap<String, ApprovalRequest>>,
}

#[async_trait]
impl ApprovalStore for InMemoryApprovalStore {
    async fn insert(&self, request: &ApprovalRequest) -> Result<(), StoreError> {
        let mut requests = self.requests.write().await;
        if requests.contains_key(&request.approval_id.0) {
            return Err(StoreError::Backend(format!(
                "approval request {} already exists",
                request.approval_id
            )));
        }
        requests.insert(request.approval_id.0.clone(), request.clone());
        Ok(())
    }

    async fn get(&self, approval_id: &ApprovalId) -> Result<Option<ApprovalRequest>, StoreError> {
        let requests = self.requests.read().await;
        Ok(requests.get(&approval_id.0).cloned())
    }

    async fn update_if_pending(&self, request: &ApprovalRequest) -> Result<bool, StoreError> {
        let mut requests = self.requests.write().await;
        match requests.get_mut(&request.approval_id.0) {
            Some(stored)
                if stored.status == ApprovalStatus::Pending
                    && (request.status == ApprovalStatus::Expired
                        || !stored.is_expired_at(Utc::now())) =>
            {
                *stored = request.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_by_status(
        &self,
        status: ApprovalStatus,
    ) -> Result<Vec<ApprovalRequest>, StoreError> {
        let requests = self.requests.read().await;
        let mut matching: Vec<ApprovalRequest> =
            requests.values().filter(|request| request.status == status).cloned().collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(matching)
    }
}

pub struct ApprovalWorkflow {
    store: Arc<dyn ApprovalStore>,
    config: ApprovalConfig,
    audit: Arc<dyn AuditSink>,
}

impl ApprovalWorkflow {
    pub fn new(
        store: Arc<dyn ApprovalStore>,
        config: ApprovalConfig,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self { store, config, audit }
    }

    fn new_request(
        &self,
        operation: &Operation,
        risk_level: RiskLevel,
        risk_assessment: &str,
    ) -> ApprovalRequest {
        let now = Utc::now();
        let ttl_hours = i64::try_from(self.config.default_ttl_hours).unwrap_or(i64::MAX);
        let expires_at = Duration::try_hours(ttl_hours)
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(chrono::DateTime::<Utc>::MAX_UTC);

        ApprovalRequest {
            approval_id: ApprovalId(format!("apr-{}-{}", operation.operation_id, Uuid::new_v4())),
            operation_id: operation.operation_id.clone(),
            incident_id: operation.incident_id.clone(),
            action_type: operation.action_type.clone(),
            target_resource: operation.target_resource.clone(),
            risk_level,
            risk_assessment: risk_assessment.to_string(),
            status: ApprovalStatus::Pending,
            created_at: now,
            expires_at,
            approver: None,
            comments: None,
            decided_at: None,
        }
    }

    /// Persists a PENDING request for `operation`.
    pub async fn create_request(
        &self,
        operation: &Operation,
        risk_level: RiskLevel,
        risk_assessment: &str,
    ) -> Result<ApprovalRequest, ApprovalError> {
        let request = self.new_request(operation, risk_level, risk_assessment);
        self.store.insert(&request).await?;

        info!(
            event_name = "engine.approval.requested",
            approval_id = %request.approval_id,
            operation_id = %operation.operation_id,
            incident_id = %operation.incident_id,
            risk_level = risk_level.as_str(),
            "approval requested"
        );
        self.audit.emit(
            AuditEvent::for_operation(
                operation,
                "approval.requested",
                AuditCategory::Approval,
                SYSTEM_APPROVER,
                AuditOutcome::Success,
            )
            .with_metadata("approval_id", request.approval_id.0.clone())
            .with_metadata("risk_level", risk_level.as_str()),
        );
        Ok(request)
    }

    pub fn check_auto_approval_eligibility(
        &self,
        operation: &Operation,
        risk_level: RiskLevel,
    ) -> bool {
        if risk_level == RiskLevel::Low {
            return true;
        }
        if self.config.auto_approval_allowlist.iter().any(|action| *action == operation.action_type)
        {
            return true;
        }
        let target = operation.target_resource.to_ascii_lowercase();
        self.config
            .non_production_suffixes
            .iter()
            .any(|suffix| target.ends_with(&suffix.to_ascii_lowercase()))
    }

    /// Records AUTO_APPROVED directly for eligible operations, otherwise
    /// opens a PENDING request.
    pub async fn submit_for_approval(
        &self,
        operation: &Operation,
        risk_level: RiskLevel,
        risk_assessment: &str,
    ) -> Result<ApprovalRequest, ApprovalError> {
        if !self.check_auto_approval_eligibility(operation, risk_level) {
            return self.create_request(operation, risk_level, risk_assessment).await;
        }

        let mut request = self.new_request(operation, risk_level, risk_assessment);
        request.status = ApprovalStatus::AutoApproved;
        request.approver = Some(SYSTEM_APPROVER.to_string());
        request.decided_at = Some(request.created_at);
        self.store.insert(&request).await?;

        info!(
            event_name = "engine.approval.auto_approved",
            approval_id = %request.approval_id,
            operation_id = %operation.operation_id,
            incident_id = %operation.incident_id,
            "operation auto-approved"
        );
        self.audit.emit(
            AuditEvent::for_operation(
                operation,
                "approval.auto_approved",
                AuditCategory::Approval,
                SYSTEM_APPROVER,
                AuditOutcome::Success,
            )
            .with_metadata("approval_id", request.approval_id.0.clone()),
        );
        Ok(request)
    }

    pub async fn get_request(
        &self,
        approval_id: &ApprovalId,
    ) -> Result<ApprovalRequest, ApprovalError> {
        self.store
            .get(approval_id)
            .await?
            .ok_or_else(|| ApprovalError::NotFound(approval_id.clone()))
    }

    /// EXPIRED whenever the request is past `expires_at`, whatever was stored.
    /// A lapsed PENDING record is persisted as EXPIRED.
    pub async fn get_status(&self, approval_id: &ApprovalId) -> Result<ApprovalStatus, ApprovalError> {
        let request = self.get_request(approval_id).await?;
        let now = Utc::now();
        if !request.is_expired_at(now) {
            return Ok(request.status);
        }

        if request.status == ApprovalStatus::Pending {
            let mut expired = request;
            expired.status = ApprovalStatus::Expired;
            expired.decided_at = Some(now);
            if self.store.update_if_pending(&expired).await? {
                info!(
                    event_name = "engine.approval.expired",
                    approval_id = %approval_id,
                    operation_id = %expired.operation_id,
                    "approval request expired"
                );
                self.audit.emit(
                    AuditEvent::new(
                        "approval.expired",
                        AuditCategory::Approval,
                        SYSTEM_APPROVER,
                        AuditOutcome::Rejected,
                    )
                    .with_operation_id(expired.operation_id.clone())
                    .with_metadata("approval_id", approval_id.0.clone()),
                );
            }
        }
        Ok(ApprovalStatus::Expired)
    }

    /// Records an approver decision. Succeeds only from PENDING.
    pub async fn update_status(
        &self,
        approval_id: &ApprovalId,
        status: ApprovalStatus,
        approver: &str,
        comments: Option<&str>,
    ) -> Result<ApprovalRequest, ApprovalError> {
        if status == ApprovalStatus::Pending {
            return Err(ApprovalError::InvalidDecision(status));
        }

        let current = self.get_status(approval_id).await?;
        if current != ApprovalStatus::Pending {
            warn!(
                event_name = "engine.approval.transition_refused",
                approval_id = %approval_id,
                current = current.as_str(),
                requested = status.as_str(),
                "approval request is already decided"
            );
            return Err(ApprovalError::InvalidTransition {
                id: approval_id.clone(),
                current,
                requested: status,
            });
        }

        let mut request = self.get_request(approval_id).await?;
        request.status = status;
        request.approver = Some(approver.to_string());
        request.comments = comments.map(str::to_string);
        request.decided_at = Some(Utc::now());

        if !self.store.update_if_pending(&request).await? {
            let current = self.get_request(approval_id).await?.status;
            return Err(ApprovalError::InvalidTransition {
                id: approval_id.clone(),
                current,
                requested: status,
            });
        }

        let outcome = if status.permits_execution() {
            AuditOutcome::Success
        } else {
            AuditOutcome::Rejected
        };
        info!(
            event_name = "engine.approval.decided",
            approval_id = %approval_id,
            operation_id = %request.operation_id,
            incident_id = %request.incident_id,
            status = status.as_str(),
            approver = %approver,
            "approval decision recorded"
        );
        self.audit.emit(
            AuditEvent::new("approval.decided", AuditCategory::Approval, approver, outcome)
                .with_operation_id(request.operation_id.clone())
                .with_metadata("approval_id", approval_id.0.clone())
                .with_metadata("status", status.as_str()),
        );
        Ok(request)
    }

    /// PENDING requests that have not yet lapsed, oldest first.
    pub async fn list_pending(&self) -> Result<Vec<ApprovalRequest>, ApprovalError> {
        let now = Utc::now();
        let pending = self.store.list_by_status(ApprovalStatus::Pending).await?;
        Ok(pending.into_iter().filter(|request| !request.is_expired_at(now)).collect())
    }
}
