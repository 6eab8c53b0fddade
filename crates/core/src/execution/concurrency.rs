use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog::standard::standard_definitions;
use crate::catalog::OperationCatalog;
use crate::config::ExecutionConfig;
use crate::domain::operation::{Operation, OperationCategory, OperationId};

/// Bucket for action types absent from the resource-type table.
pub const GENERIC_RESOURCE_TYPE: &str = "generic";

/// Concurrency bucket for a definition's category.
pub fn resource_type_for_category(category: OperationCategory) -> &'static str {
    match category {
        OperationCategory::Network => "network",
        OperationCategory::Compute => "compute",
        OperationCategory::Identity => "iam",
        OperationCategory::Storage => "storage",
        OperationCategory::Logging => "logging",
        OperationCategory::Other => GENERIC_RESOURCE_TYPE,
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcurrencyStatus {
    pub active_total: usize,
    pub max_concurrent: usize,
    pub available_slots: usize,
    pub active_by_type: BTreeMap<String, usize>,
    pub limits_by_type: BTreeMap<String, usize>,
}

#[derive(Default)]
struct Slots {
    active_by_type: HashMap<String, usize>,
    tracked: HashMap<OperationId, String>,
}

/// Global and per-resource-type slot accounting. `acquire` never blocks.
pub struct ConcurrencyController {
    max_concurrent: usize,
    limits_by_type: BTreeMap<String, usize>,
    resource_types: HashMap<String, String>,
    slots: Mutex<Slots>,
}

impl ConcurrencyController {
    /// Buckets every built-in action by its category.
    pub fn new(max_concurrent: usize, limits_by_type: BTreeMap<String, usize>) -> Self {
        let resource_types = standard_definitions()
            .into_iter()
            .map(|definition| {
                let kind = resource_type_for_category(definition.category).to_string();
                (definition.action_type, kind)
            })
            .collect();
        Self { max_concurrent, limits_by_type, resource_types, slots: Mutex::new(Slots::default()) }
    }

    pub fn from_config(config: &ExecutionConfig) -> Self {
        Self::new(config.max_concurrent_actions, config.max_per_resource_type.clone())
    }

    /// Buckets every definition in `catalog` by its category.
    pub fn with_catalog(mut self, catalog: &OperationCatalog) -> Self {
        for definition in catalog.definitions() {
            self.resource_types.insert(
                definition.action_type.clone(),
                resource_type_for_category(definition.category).to_string(),
            );
        }
        self
    }

    /// Maps an additional action type onto a resource type.
    pub fn with_resource_type(
        mut self,
        action_type: impl Into<String>,
        resource_type: impl Into<String>,
    ) -> Self {
        self.resource_types.insert(action_type.into(), resource_type.into());
        self
    }

    fn slots(&self) -> MutexGuard<'_, Slots> {
        match self.slots.lock() {
            Ok(slots) => slots,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn resource_type_of(&self, operation: &Operation) -> String {
        self.resource_types
            .get(&operation.action_type)
            .cloned()
            .unwrap_or_else(|| GENERIC_RESOURCE_TYPE.to_string())
    }

    /// Takes a global slot and a per-type slot together, or neither.
    pub fn acquire(&self, operation: &Operation) -> bool {
        let resource_type = self.resource_type_of(operation);
        let mut slots = self.slots();

        if slots.tracked.contains_key(&operation.operation_id) {
            return false;
        }
        if slots.tracked.len() >= self.max_concurrent {
            return false;
        }
        let active_for_type = slots.active_by_type.get(&resource_type).copied().unwrap_or(0);
        if let Some(limit) = self.limits_by_type.get(&resource_type) {
            if active_for_type >= *limit {
                return false;
            }
        }

        *slots.active_by_type.entry(resource_type.clone()).or_insert(0) += 1;
        slots.tracked.insert(operation.operation_id.clone(), resource_type.clone());
        debug!(
            event_name = "engine.concurrency.acquired",
            operation_id = %operation.operation_id,
            resource_type = %resource_type,
            active = slots.tracked.len(),
            "concurrency slot acquired"
        );
        true
    }

    /// No-op for operations that hold no slot.
    pub fn release(&self, operation_id: &OperationId) {
        let mut slots = self.slots();
        let Some(resource_type) = slots.tracked.remove(operation_id) else {
            return;
        };
        if let Some(count) = slots.active_by_type.get_mut(&resource_type) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                slots.active_by_type.remove(&resource_type);
            }
        }
        debug!(
            event_name = "engine.concurrency.released",
            operation_id = %operation_id,
            resource_type = %resource_type,
            "concurrency slot released"
        );
    }

    pub fn active_count(&self) -> usize {
        self.slots().tracked.len()
    }

    pub fn status(&self) -> ConcurrencyStatus {
        let slots = self.slots();
        let active_total = slots.tracked.len();
        ConcurrencyStatus {
            active_total,
            max_concurrent: self.max_concurrent,
            available_slots: self.max_concurrent.saturating_sub(active_total),
            active_by_type: slots
                .active_by_type
                .iter()
                .map(|(kind, count)| (kind.clone(), *count))
                .collect(),
            limits_by_type: self.limits_by_type.clone(),
        }
    }
}
