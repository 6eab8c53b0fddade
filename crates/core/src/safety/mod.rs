//! Pre-execution safety pipeline and the advisory resource lock table.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::catalog::OperationCatalog;
use crate::config::{ResourceCheckMode, SafetyConfig};
use crate::domain::operation::{
    Operation, OperationDefinition, OperationId, Params, RiskLevel, RESOURCE_TYPE_PARAM,
};
use crate::errors::{ConflictError, ValidationError};

/// Answers whether a cloud resource exists.
#[async_trait]
pub trait ResourceExistenceProbe: Send + Sync {
    async fn exists(&self, resource_kind: &str, resource_id: &str, context: &Params) -> bool;
}

/// Answers whether the engine holds the permissions an operation needs.
#[async_trait]
pub trait PermissionProbe: Send + Sync {
    async fn has_permissions(
        &self,
        operation: &Operation,
        required_permissions: &BTreeSet<String>,
    ) -> bool;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_safe: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub checks_performed: u32,
    pub requires_approval: bool,
    pub requires_dry_run: bool,
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self {
            is_safe: true,
            errors: Vec::new(),
            warnings: Vec::new(),
            checks_performed: 0,
            requires_approval: false,
            requires_dry_run: false,
        }
    }
}

impl ValidationResult {
    pub fn add_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
        self.is_safe = false;
    }

    pub fn add_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLock {
    pub resource: String,
    pub owner: OperationId,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ResourceLock {
    fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(Clone, Debug)]
struct ActiveOperation {
    action_type: String,
    target_resource: String,
}

pub struct SafetyValidator {
    catalog: Arc<OperationCatalog>,
    config: SafetyConfig,
    existence_probe: Option<Arc<dyn ResourceExistenceProbe>>,
    permission_probe: Option<Arc<dyn PermissionProbe>>,
    locks: Mutex<HashMap<String, ResourceLock>>,
    active: Mutex<HashMap<OperationId, ActiveOperation>>,
}

impl SafetyValidator {
    pub fn new(catalog: Arc<OperationCatalog>, config: SafetyConfig) -> Self {
        Self {
            catalog,
            config,
            existence_probe: None,
            permission_probe: None,
            locks: Mutex::new(HashMap::new()),
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_existence_probe(mut self, probe: Arc<dyn ResourceExistenceProbe>) -> Self {
        self.existence_probe = Some(probe);
        self
    }

    pub fn with_permission_probe(mut self, probe: Arc<dyn PermissionProbe>) -> Self {
        self.permission_probe = Some(probe);
        self
    }

    pub fn config(&self) -> &SafetyConfig {
        &self.config
    }

    fn locks(&self) -> MutexGuard<'_, HashMap<String, ResourceLock>> {
        match self.locks.lock() {
            Ok(locks) => locks,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn active(&self) -> MutexGuard<'_, HashMap<OperationId, ActiveOperation>> {
        match self.active.lock() {
            Ok(active) => active,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Runs every stage and returns the accumulated verdict.
    pub async fn validate(&self, operation: &Operation) -> ValidationResult {
        let mut result = ValidationResult::default();

        let Some(definition) = self.catalog.get_definition(&operation.action_type) else {
            result.checks_performed += 1;
            result.add_error(
                ValidationError::UnknownActionType(operation.action_type.clone()).to_string(),
            );
            self.log_verdict(operation, &result);
            return result;
        };

        self.check_parameters(operation, definition, &mut result);
        self.check_risk(definition, &mut result);
        self.check_existence(operation, definition, &mut result).await;
        self.check_permissions(operation, definition, &mut result).await;
        self.check_conflicts(operation, &mut result);

        self.log_verdict(operation, &result);
        result
    }

    fn check_parameters(
        &self,
        operation: &Operation,
        definition: &OperationDefinition,
        result: &mut ValidationResult,
    ) {
        result.checks_performed += 1;
        for violation in definition.parameter_violations(&operation.params) {
            result.add_error(violation.to_string());
        }
    }

    fn check_risk(&self, definition: &OperationDefinition, result: &mut ValidationResult) {
        result.checks_performed += 1;
        if definition.requires_approval {
            result.requires_approval = true;
        }
        match definition.risk_level {
            RiskLevel::High => result.requires_approval = true,
            RiskLevel::Critical => {
                result.requires_approval = true;
                result.requires_dry_run = true;
                result.add_warning(format!(
                    "`{}` is a critical-risk action; approval and a dry run are required",
                    definition.action_type
                ));
            }
            RiskLevel::Low | RiskLevel::Medium => {}
        }
    }

    async fn check_existence(
        &self,
        operation: &Operation,
        definition: &OperationDefinition,
        result: &mut ValidationResult,
    ) {
        if self.config.resource_check == ResourceCheckMode::Disabled {
            return;
        }
        let Some(probe) = &self.existence_probe else {
            return;
        };
        result.checks_performed += 1;

        let resource_kind = operation
            .param_str(RESOURCE_TYPE_PARAM)
            .or_else(|| definition.supported_resource_types.iter().next().map(String::as_str))
            .unwrap_or("unknown");

        if probe.exists(resource_kind, &operation.target_resource, &operation.params).await {
            return;
        }

        let message =
            format!("{resource_kind} `{}` was not found", operation.target_resource);
        match self.config.resource_check {
            ResourceCheckMode::Enforce => result.add_error(message),
            _ => result.add_warning(message),
        }
    }

    async fn check_permissions(
        &self,
        operation: &Operation,
        definition: &OperationDefinition,
        result: &mut ValidationResult,
    ) {
        let Some(probe) = &self.permission_probe else {
            return;
        };
        result.checks_performed += 1;

        if !probe.has_permissions(operation, &definition.required_permissions).await {
            let required: Vec<&str> =
                definition.required_permissions.iter().map(String::as_str).collect();
            result.add_error(format!(
                "missing permissions for `{}`: {}",
                operation.action_type,
                required.join(", ")
            ));
        }
    }

    fn check_conflicts(&self, operation: &Operation, result: &mut ValidationResult) {
        result.checks_performed += 1;
        self.cleanup_expired_locks();

        if let Some(lock) = self.locks().get(&operation.target_resource) {
            if lock.owner != operation.operation_id {
                result.add_error(
                    ConflictError::ResourceLocked {
                        resource: operation.target_resource.clone(),
                        owner: lock.owner.clone(),
                    }
                    .to_string(),
                );
            }
        }

        let concurrent: Vec<(OperationId, ActiveOperation)> = self
            .active()
            .iter()
            .filter(|(id, active)| {
                **id != operation.operation_id
                    && active.target_resource == operation.target_resource
            })
            .map(|(id, active)| (id.clone(), active.clone()))
            .collect();

        for (active_id, active) in &concurrent {
            if self.is_conflicting_pair(&operation.action_type, &active.action_type) {
                result.add_error(
                    ConflictError::MutuallyExclusive {
                        resource: operation.target_resource.clone(),
                        action_type: operation.action_type.clone(),
                        active_action_type: active.action_type.clone(),
                        active_operation: active_id.clone(),
                    }
                    .to_string(),
                );
            }
        }

        let exclusive = self.is_exclusive(&operation.action_type)
            || concurrent.iter().any(|(_, active)| self.is_exclusive(&active.action_type));
        if exclusive && !concurrent.is_empty() {
            result.add_error(
                ConflictError::ExclusiveAccess {
                    resource: operation.target_resource.clone(),
                    action_type: operation.action_type.clone(),
                    active: concurrent.len(),
                }
                .to_string(),
            );
        }
    }

    fn is_conflicting_pair(&self, left: &str, right: &str) -> bool {
        self.config
            .conflicting_action_pairs
            .iter()
            .any(|[a, b]| (a == left && b == right) || (a == right && b == left))
    }

    fn is_exclusive(&self, action_type: &str) -> bool {
        self.config.exclusive_action_markers.iter().any(|marker| action_type.contains(marker.as_str()))
    }

    fn log_verdict(&self, operation: &Operation, result: &ValidationResult) {
        if result.is_safe {
            debug!(
                event_name = "engine.safety.passed",
                operation_id = %operation.operation_id,
                incident_id = %operation.incident_id,
                checks = result.checks_performed,
                requires_approval = result.requires_approval,
                "operation passed safety validation"
            );
        } else {
            info!(
                event_name = "engine.safety.blocked",
                operation_id = %operation.operation_id,
                incident_id = %operation.incident_id,
                errors = ?result.errors,
                "operation blocked by safety validation"
            );
        }
    }

    /// Takes the lock on `resource` for `owner`. The same owner refreshes its lock.
    pub fn lock_resource(&self, resource: &str, owner: &OperationId, ttl: Option<Duration>) -> bool {
        let ttl = ttl.unwrap_or(Duration::from_secs(self.config.lock_ttl_seconds));
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(36_500));
        let now = Utc::now();
        let mut locks = self.locks();

        if let Some(existing) = locks.get(resource) {
            if !existing.is_expired_at(now) && &existing.owner != owner {
                return false;
            }
        }

        locks.insert(
            resource.to_string(),
            ResourceLock {
                resource: resource.to_string(),
                owner: owner.clone(),
                acquired_at: now,
                expires_at: now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
            },
        );
        debug!(
            event_name = "engine.safety.locked",
            operation_id = %owner,
            resource = %resource,
            "resource locked"
        );
        true
    }

    pub fn unlock_resource(&self, resource: &str) -> bool {
        self.locks().remove(resource).is_some()
    }

    /// Unlocks only when `owner` still holds the lock.
    pub fn unlock_resource_if_owner(&self, resource: &str, owner: &OperationId) -> bool {
        let mut locks = self.locks();
        match locks.get(resource) {
            Some(lock) if &lock.owner == owner => {
                locks.remove(resource);
                true
            }
            _ => false,
        }
    }

    pub fn lock_holder(&self, resource: &str) -> Option<OperationId> {
        let now = Utc::now();
        self.locks()
            .get(resource)
            .filter(|lock| !lock.is_expired_at(now))
            .map(|lock| lock.owner.clone())
    }

    /// Drops expired locks and returns how many were removed.
    pub fn cleanup_expired_locks(&self) -> usize {
        let now = Utc::now();
        let mut locks = self.locks();
        let before = locks.len();
        locks.retain(|_, lock| !lock.is_expired_at(now));
        let removed = before - locks.len();
        if removed > 0 {
            warn!(
                event_name = "engine.safety.locks_expired",
                removed,
                "expired resource locks cleaned up"
            );
        }
        removed
    }

    pub fn register_active(&self, operation: &Operation) {
        self.active().insert(
            operation.operation_id.clone(),
            ActiveOperation {
                action_type: operation.action_type.clone(),
                target_resource: operation.target_resource.clone(),
            },
        );
    }

    pub fn deactivate(&self, operation_id: &OperationId) {
        self.active().remove(operation_id);
    }

    pub fn active_count(&self) -> usize {
        self.active().len()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::{PermissionProbe, ResourceExistenceProbe, SafetyValidator};
    use crate::catalog::OperationCatalog;
    use crate::config::{EngineConfig, ResourceCheckMode, SafetyConfig};
    use crate::domain::operation::{
        Operation, OperationCategory, OperationDefinition, OperationId, Params, RiskLevel,
    };

    struct FixedExistence(bool);

    #[async_trait]
    impl ResourceExistenceProbe for FixedExistence {
        async fn exists(&self, _kind: &str, _id: &str, _context: &Params) -> bool {
            self.0
        }
    }

    struct FixedPermissions(bool);

    #[async_trait]
    impl PermissionProbe for FixedPermissions {
        async fn has_permissions(&self, _op: &Operation, _required: &BTreeSet<String>) -> bool {
            self.0
        }
    }

    fn catalog() -> Arc<OperationCatalog> {
        let mut catalog = OperationCatalog::new();
        catalog.register_definition(
            OperationDefinition::new("test_op", OperationCategory::Other, RiskLevel::Low)
                .required(&["a", "b"]),
        );
        catalog.register_definition(
            OperationDefinition::new("stop_x", OperationCategory::Compute, RiskLevel::Medium)
                .permissions(&["compute.instances.stop"]),
        );
        catalog.register_definition(OperationDefinition::new(
            "start_x",
            OperationCategory::Compute,
            RiskLevel::Medium,
        ));
        catalog.register_definition(OperationDefinition::new(
            "restore_x",
            OperationCategory::Compute,
            RiskLevel::Medium,
        ));
        catalog.register_definition(OperationDefinition::new(
            "wipe_x",
            OperationCategory::Compute,
            RiskLevel::Critical,
        ));
        catalog.register_definition(OperationDefinition::new(
            "drain_x",
            OperationCategory::Compute,
            RiskLevel::High,
        ));
        Arc::new(catalog)
    }

    fn safety_config() -> SafetyConfig {
        SafetyConfig {
            conflicting_action_pairs: vec![["stop_x".to_string(), "start_x".to_string()]],
            ..EngineConfig::default().safety
        }
    }

    fn validator() -> SafetyValidator {
        SafetyValidator::new(catalog(), safety_config())
    }

    #[tokio::test]
    async fn missing_parameter_is_named_in_the_errors() {
        let validator = validator();
        let op = Operation::new("inc", "test_op", "res").with_param("a", 1);

        let result = validator.validate(&op).await;

        assert!(!result.is_safe);
        assert!(result.errors.iter().any(|error| error.contains('b')));
        assert_eq!(result.checks_performed, 3);
    }

    #[tokio::test]
    async fn unknown_action_type_stops_after_first_stage() {
        let validator = validator();
        let op = Operation::new("inc", "mystery", "res");

        let result = validator.validate(&op).await;

        assert!(!result.is_safe);
        assert_eq!(result.checks_performed, 1);
        assert!(result.errors[0].contains("mystery"));
    }

    #[tokio::test]
    async fn risk_gating_sets_flags_without_failing() {
        let validator = validator();

        let high = validator.validate(&Operation::new("inc", "drain_x", "vm")).await;
        assert!(high.is_safe);
        assert!(high.requires_approval);
        assert!(!high.requires_dry_run);

        let critical = validator.validate(&Operation::new("inc", "wipe_x", "vm")).await;
        assert!(critical.is_safe);
        assert!(critical.requires_approval && critical.requires_dry_run);
        assert_eq!(critical.warnings.len(), 1);
    }

    #[tokio::test]
    async fn mutually_exclusive_actions_conflict_on_same_resource() {
        let validator = validator();
        let stop = Operation::new("inc", "stop_x", "R");
        let start = Operation::new("inc", "start_x", "R");
        let elsewhere = Operation::new("inc", "start_x", "other");
        validator.register_active(&stop);

        let conflicting = validator.validate(&start).await;
        assert!(!conflicting.is_safe);
        assert!(conflicting.errors.iter().any(|error| error.contains("conflicts")));

        assert!(validator.validate(&elsewhere).await.is_safe);

        validator.deactivate(&stop.operation_id);
        assert!(validator.validate(&start).await.is_safe);
    }

    #[tokio::test]
    async fn exclusive_actions_conflict_with_anything_active() {
        let validator = validator();
        let drain = Operation::new("inc", "drain_x", "R");
        validator.register_active(&drain);

        let restore = validator.validate(&Operation::new("inc", "restore_x", "R")).await;

        assert!(!restore.is_safe);
        assert!(restore.errors.iter().any(|error| error.contains("exclusive access")));
    }

    #[tokio::test]
    async fn locked_resource_blocks_other_operations() {
        let validator = validator();
        let holder = OperationId("holder".to_string());
        assert!(validator.lock_resource("R", &holder, None));

        let op = Operation::new("inc", "start_x", "R");
        let result = validator.validate(&op).await;
        assert!(!result.is_safe);
        assert!(result.errors.iter().any(|error| error.contains("locked")));

        assert!(validator.validate(&op.clone().with_id("holder")).await.is_safe);
    }

    #[test]
    fn at_most_one_valid_lock_per_resource() {
        let validator = validator();
        let first = OperationId("first".to_string());
        let second = OperationId("second".to_string());

        assert!(validator.lock_resource("R", &first, None));
        assert!(!validator.lock_resource("R", &second, None));
        assert!(validator.lock_resource("R", &first, None));
        assert!(!validator.unlock_resource_if_owner("R", &second));
        assert!(validator.unlock_resource("R"));
        assert!(validator.lock_resource("R", &second, None));
        assert_eq!(validator.lock_holder("R"), Some(second));
    }

    #[test]
    fn expired_locks_are_replaced_and_swept() {
        let validator = validator();
        let first = OperationId("first".to_string());
        let second = OperationId("second".to_string());

        assert!(validator.lock_resource("R", &first, Some(Duration::ZERO)));
        assert!(validator.lock_holder("R").is_none());
        assert!(validator.lock_resource("R", &second, None));

        assert!(validator.lock_resource("S", &first, Some(Duration::ZERO)));
        assert_eq!(validator.cleanup_expired_locks(), 1);
    }

    #[tokio::test]
    async fn existence_probe_follows_configured_mode() {
        let op = Operation::new("inc", "start_x", "ghost-vm");

        let warn_only = validator().with_existence_probe(Arc::new(FixedExistence(false)));
        let result = warn_only.validate(&op).await;
        assert!(result.is_safe);
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.checks_performed, 4);

        let enforce = SafetyValidator::new(
            catalog(),
            SafetyConfig { resource_check: ResourceCheckMode::Enforce, ..safety_config() },
        )
        .with_existence_probe(Arc::new(FixedExistence(false)));
        assert!(!enforce.validate(&op).await.is_safe);

        let disabled = SafetyValidator::new(
            catalog(),
            SafetyConfig { resource_check: ResourceCheckMode::Disabled, ..safety_config() },
        )
        .with_existence_probe(Arc::new(FixedExistence(false)));
        let result = disabled.validate(&op).await;
        assert!(result.is_safe);
        assert_eq!(result.checks_performed, 3);
    }

    #[tokio::test]
    async fn missing_permissions_are_hard_errors() {
        let validator = validator().with_permission_probe(Arc::new(FixedPermissions(false)));

        let result = validator.validate(&Operation::new("inc", "stop_x", "vm")).await;

        assert!(!result.is_safe);
        assert!(result.errors.iter().any(|error| error.contains("compute.instances.stop")));
        assert_eq!(result.checks_performed, 4);
    }
}
