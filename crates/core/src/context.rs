//! Shared engine dependencies, built once at startup and handed to the
//! components that need them.

use std::sync::Arc;
use std::time::Duration;

use crate::approvals::{ApprovalStore, ApprovalWorkflow, InMemoryApprovalStore};
use crate::audit::{AuditSink, TracingAuditSink};
use crate::catalog::OperationCatalog;
use crate::config::EngineConfig;
use crate::domain::execution::Environment;
use crate::domain::operation::OperationDefinition;
use crate::execution::RetryPolicy;
use crate::rollback::RollbackManager;
use crate::safety::{PermissionProbe, ResourceExistenceProbe, SafetyValidator};

#[derive(Clone)]
pub struct EngineContext {
    pub config: EngineConfig,
    pub catalog: Arc<OperationCatalog>,
    pub environment: Environment,
    pub audit: Arc<dyn AuditSink>,
    pub approval_store: Arc<dyn ApprovalStore>,
    pub existence_probe: Option<Arc<dyn ResourceExistenceProbe>>,
    pub permission_probe: Option<Arc<dyn PermissionProbe>>,
}

impl EngineContext {
    /// Tracing audit sink and in-memory approval store until overridden.
    pub fn new(config: EngineConfig, catalog: OperationCatalog, environment: Environment) -> Self {
        Self {
            config,
            catalog: Arc::new(catalog),
            environment,
            audit: Arc::new(TracingAuditSink),
            approval_store: Arc::new(InMemoryApprovalStore::default()),
            existence_probe: None,
            permission_probe: None,
        }
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_approval_store(mut self, store: Arc<dyn ApprovalStore>) -> Self {
        self.approval_store = store;
        self
    }

    pub fn with_existence_probe(mut self, probe: Arc<dyn ResourceExistenceProbe>) -> Self {
        self.existence_probe = Some(probe);
        self
    }

    pub fn with_permission_probe(mut self, probe: Arc<dyn PermissionProbe>) -> Self {
        self.permission_probe = Some(probe);
        self
    }

    pub fn safety_validator(&self) -> SafetyValidator {
        let mut validator =
            SafetyValidator::new(Arc::clone(&self.catalog), self.config.safety.clone());
        if let Some(probe) = &self.existence_probe {
            validator = validator.with_existence_probe(Arc::clone(probe));
        }
        if let Some(probe) = &self.permission_probe {
            validator = validator.with_permission_probe(Arc::clone(probe));
        }
        validator
    }

    pub fn approval_workflow(&self) -> ApprovalWorkflow {
        ApprovalWorkflow::new(
            Arc::clone(&self.approval_store),
            self.config.approval.clone(),
            Arc::clone(&self.audit),
        )
    }

    pub fn rollback_manager(&self) -> RollbackManager {
        RollbackManager::new(
            Arc::clone(&self.catalog),
            Arc::clone(&self.audit),
            self.config.rollback.window_hours,
        )
    }

    /// Definition values win over the engine defaults.
    pub fn retry_policy_for(&self, definition: &OperationDefinition) -> RetryPolicy {
        let max_retries =
            definition.max_retries.unwrap_or(self.config.execution.default_max_retries);
        RetryPolicy::from_config(&self.config.retry, max_retries)
    }

    pub fn timeout_for(&self, definition: &OperationDefinition) -> Duration {
        Duration::from_secs(
            definition.timeout_seconds.unwrap_or(self.config.execution.default_timeout_seconds),
        )
    }

    /// Lock lifetime covering a leading dry run, every attempt and the
    /// jittered backoff between attempts. Never shorter than the configured TTL.
    pub fn lock_ttl_for(&self, definition: &OperationDefinition) -> Duration {
        let timeout = self.timeout_for(definition);
        let retry = self.retry_policy_for(definition);
        let jittered_delay = retry.max_delay + retry.max_delay / 10;
        let budget = timeout
            .saturating_mul(retry.max_retries.saturating_add(2))
            .saturating_add(jittered_delay.saturating_mul(retry.max_retries));
        budget.max(Duration::from_secs(self.config.safety.lock_ttl_seconds))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::EngineContext;
    use crate::catalog::standard::standard_catalog;
    use crate::config::EngineConfig;
    use crate::domain::execution::Environment;
    use crate::domain::operation::{OperationCategory, OperationDefinition, RiskLevel};

    #[test]
    fn definition_limits_fall_back_to_engine_defaults() {
        let mut config = EngineConfig::default();
        config.execution.default_timeout_seconds = 45;
        config.execution.default_max_retries = 2;
        let context = EngineContext::new(config, standard_catalog(), Environment::new("proj"));

        let bare = OperationDefinition::new("noop", OperationCategory::Other, RiskLevel::Low);
        assert_eq!(context.timeout_for(&bare), Duration::from_secs(45));
        assert_eq!(context.retry_policy_for(&bare).max_retries, 2);

        let tuned = bare.timeout_seconds(10).max_retries(0);
        assert_eq!(context.timeout_for(&tuned), Duration::from_secs(10));
        assert_eq!(context.retry_policy_for(&tuned).max_retries, 0);
    }

    #[test]
    fn lock_ttl_outlasts_every_attempt() {
        let mut config = EngineConfig::default();
        config.safety.lock_ttl_seconds = 300;
        config.retry.max_delay_ms = 10_000;
        let context = EngineContext::new(config, standard_catalog(), Environment::new("proj"));

        let short = OperationDefinition::new("noop", OperationCategory::Other, RiskLevel::Low)
            .timeout_seconds(5)
            .max_retries(0);
        assert_eq!(context.lock_ttl_for(&short), Duration::from_secs(300));

        let long = OperationDefinition::new("snapshot", OperationCategory::Compute, RiskLevel::Low)
            .timeout_seconds(600)
            .max_retries(2);
        assert_eq!(context.lock_ttl_for(&long), Duration::from_secs(600 * 4 + 11 * 2));
    }
}
