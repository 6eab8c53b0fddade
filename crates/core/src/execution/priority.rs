use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::operation::{Operation, OperationCategory, OperationDefinition, RiskLevel};

/// Queue priority. Lower values are dequeued first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(pub u8);

impl Priority {
    pub const CRITICAL: Self = Self(1);
    pub const HIGH: Self = Self(2);
    pub const MEDIUM: Self = Self(3);
    pub const LOW: Self = Self(4);

    pub fn value(&self) -> u8 {
        self.0
    }

    pub fn from_risk(risk: RiskLevel) -> Self {
        match risk {
            RiskLevel::Critical => Self::CRITICAL,
            RiskLevel::High => Self::HIGH,
            RiskLevel::Medium => Self::MEDIUM,
            RiskLevel::Low => Self::LOW,
        }
    }

    fn from_param(value: &Value) -> Option<Self> {
        match value {
            Value::Number(number) => number
                .as_u64()
                .filter(|n| (1..=u64::from(u8::MAX)).contains(n))
                .and_then(|n| u8::try_from(n).ok())
                .map(Self),
            Value::String(text) => match text.trim().parse::<u8>() {
                Ok(n) if n > 0 => Some(Self(n)),
                _ => RiskLevel::parse(text).map(Self::from_risk),
            },
            _ => None,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Param that overrides the computed queue priority. Kept apart from
/// action params such as a firewall rule's `priority`.
pub const QUEUE_PRIORITY_PARAM: &str = "queue_priority";

const CONTAINMENT_PREFIXES: &[&str] =
    &["block_", "disable_", "isolate_", "revoke_", "remove_", "stop_", "rotate_"];
const ADDITIVE_PREFIXES: &[&str] = &["enable_audit", "enable_vpc_flow", "snapshot_"];

/// Picks the queue priority for an operation.
///
/// An explicit `queue_priority` param wins, then the incident `severity` param,
/// then the nature of the action: containment is HIGH, audit and other
/// purely additive actions are LOW, everything else MEDIUM.
pub fn determine_priority(operation: &Operation, definition: &OperationDefinition) -> Priority {
    if let Some(priority) =
        operation.params.get(QUEUE_PRIORITY_PARAM).and_then(Priority::from_param)
    {
        return priority;
    }

    if let Some(severity) = operation.param_str("severity").and_then(RiskLevel::parse) {
        return Priority::from_risk(severity);
    }

    let action = operation.action_type.as_str();
    if CONTAINMENT_PREFIXES.iter().any(|prefix| action.starts_with(prefix)) {
        Priority::HIGH
    } else if definition.category == OperationCategory::Logging
        || ADDITIVE_PREFIXES.iter().any(|prefix| action.starts_with(prefix))
    {
        Priority::LOW
    } else {
        Priority::MEDIUM
    }
}
