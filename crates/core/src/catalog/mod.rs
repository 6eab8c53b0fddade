//! Registry of remediation operation definitions and their implementations.
//!
//! Definitions describe the contract and risk posture of an action type;
//! implementations carry it out against an environment. Each catalog owns its
//! own registry, so several engines can coexist in one process.

pub mod standard;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::domain::execution::{Environment, ExecutionOutcome};
use crate::domain::operation::{Operation, OperationDefinition, RollbackSpec, StateSnapshot};
use crate::errors::{ConfigurationError, ExecutionFailure, ValidationError};

/// Params copied from an original operation into its derived rollback.
pub const CONTEXTUAL_PARAMS: &[&str] = &["project_id", "region", "zone"];

/// Executes one action type against the environment.
#[async_trait]
pub trait OperationImplementation: Send + Sync {
    async fn execute(
        &self,
        operation: &Operation,
        environment: &Environment,
        dry_run: bool,
    ) -> Result<ExecutionOutcome, ExecutionFailure>;

    async fn validate_prerequisites(
        &self,
        _operation: &Operation,
        _environment: &Environment,
    ) -> bool {
        true
    }

    /// Resource state needed to reverse the operation later.
    async fn capture_state(
        &self,
        _operation: &Operation,
        _environment: &Environment,
    ) -> Result<StateSnapshot, ExecutionFailure> {
        Ok(StateSnapshot::new())
    }

    fn rollback_spec(&self) -> Option<RollbackSpec> {
        None
    }
}

pub type ImplementationFactory = Arc<dyn Fn() -> Arc<dyn OperationImplementation> + Send + Sync>;

struct ImplementationSlot {
    factory: ImplementationFactory,
    instance: OnceLock<Arc<dyn OperationImplementation>>,
}

impl ImplementationSlot {
    fn get(&self) -> Arc<dyn OperationImplementation> {
        Arc::clone(self.instance.get_or_init(|| (self.factory)()))
    }
}

#[derive(Default)]
pub struct OperationCatalog {
    definitions: BTreeMap<String, OperationDefinition>,
    implementations: BTreeMap<String, ImplementationSlot>,
}

impl fmt::Debug for OperationCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationCatalog")
            .field("definitions", &self.definitions.keys().collect::<Vec<_>>())
            .field("implementations", &self.implementations.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl OperationCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the definition keyed by its action type.
    pub fn register_definition(&mut self, definition: OperationDefinition) {
        debug!(
            event_name = "engine.catalog.definition_registered",
            action_type = %definition.action_type,
            risk_level = definition.risk_level.as_str(),
            "operation definition registered"
        );
        self.definitions.insert(definition.action_type.clone(), definition);
    }

    /// Registers a factory; the instance is built on first use and cached.
    pub fn register_implementation<F>(
        &mut self,
        action_type: &str,
        factory: F,
    ) -> Result<(), ConfigurationError>
    where
        F: Fn() -> Arc<dyn OperationImplementation> + Send + Sync + 'static,
    {
        if !self.definitions.contains_key(action_type) {
            return Err(ConfigurationError::UnknownActionType(action_type.to_string()));
        }
        self.implementations.insert(
            action_type.to_string(),
            ImplementationSlot { factory: Arc::new(factory), instance: OnceLock::new() },
        );
        Ok(())
    }

    pub fn get_definition(&self, action_type: &str) -> Option<&OperationDefinition> {
        self.definitions.get(action_type)
    }

    pub fn definitions(&self) -> impl Iterator<Item = &OperationDefinition> {
        self.definitions.values()
    }

    pub fn action_types(&self) -> BTreeSet<String> {
        self.definitions.keys().cloned().collect()
    }

    pub fn has_implementation(&self, action_type: &str) -> bool {
        self.implementations.contains_key(action_type)
    }

    pub fn get_implementation(&self, action_type: &str) -> Option<Arc<dyn OperationImplementation>> {
        self.implementations.get(action_type).map(ImplementationSlot::get)
    }

    /// Typed parameter check naming every offending parameter.
    pub fn validate_params(&self, operation: &Operation) -> Result<(), Vec<ValidationError>> {
        let Some(definition) = self.get_definition(&operation.action_type) else {
            return Err(vec![ValidationError::UnknownActionType(operation.action_type.clone())]);
        };
        let violations = definition.parameter_violations(&operation.params);
        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }

    /// Fails closed: unknown action types and bad params are logged and yield false.
    pub fn validate(&self, operation: &Operation) -> bool {
        match self.validate_params(operation) {
            Ok(()) => true,
            Err(violations) => {
                for violation in &violations {
                    warn!(
                        event_name = "engine.catalog.validation_failed",
                        operation_id = %operation.operation_id,
                        action_type = %operation.action_type,
                        error = %violation,
                        "operation failed catalog validation"
                    );
                }
                false
            }
        }
    }

    /// True when every prerequisite action type is in `available_types`.
    pub fn check_prerequisites(
        &self,
        operation: &Operation,
        available_types: &BTreeSet<String>,
    ) -> bool {
        let Some(definition) = self.get_definition(&operation.action_type) else {
            return false;
        };
        let missing: Vec<&String> = definition
            .prerequisites
            .iter()
            .filter(|prerequisite| !available_types.contains(*prerequisite))
            .collect();
        if missing.is_empty() {
            return true;
        }
        debug!(
            event_name = "engine.catalog.prerequisites_missing",
            operation_id = %operation.operation_id,
            missing = ?missing,
            "operation prerequisites not satisfied"
        );
        false
    }

    /// Builds the inverse operation for `original` from its captured state.
    pub fn derive_rollback(
        &self,
        original: &Operation,
        snapshot: &StateSnapshot,
    ) -> Option<Operation> {
        let definition = self.get_definition(&original.action_type)?;
        if !definition.is_reversible {
            return None;
        }
        let spec = self.get_implementation(&original.action_type)?.rollback_spec()?;

        let mut rollback = Operation::new(
            original.incident_id.0.clone(),
            spec.rollback_action_type.clone(),
            original.target_resource.clone(),
        )
        .with_description(format!(
            "Rollback of {} ({})",
            original.action_type, original.operation_id
        ));

        for (param, snapshot_key) in &spec.state_param_mapping {
            match snapshot.get(snapshot_key) {
                Some(value) => {
                    rollback.params.insert(param.clone(), value.clone());
                }
                None => warn!(
                    event_name = "engine.catalog.snapshot_key_missing",
                    operation_id = %original.operation_id,
                    snapshot_key = %snapshot_key,
                    "state snapshot lacks a key mapped into the rollback"
                ),
            }
        }

        for (key, value) in &spec.additional_params {
            rollback.params.insert(key.clone(), value.clone());
        }

        for key in CONTEXTUAL_PARAMS {
            if rollback.params.contains_key(*key) {
                continue;
            }
            if let Some(value) = original.params.get(*key) {
                rollback.params.insert((*key).to_string(), value.clone());
            }
        }

        Some(rollback)
    }
}
