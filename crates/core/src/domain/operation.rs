use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::errors::ValidationError;

/// Free-form operation parameters, keyed by name.
pub type Params = Map<String, Value>;

/// Resource state captured before an operation mutates it.
pub type StateSnapshot = Map<String, Value>;

/// Parameter carrying an explicit resource type for the target.
pub const RESOURCE_TYPE_PARAM: &str = "resource_type";

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(pub String);

impl OperationId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IncidentId(pub String);

impl fmt::Display for IncidentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationCategory {
    Network,
    Identity,
    Compute,
    Storage,
    Logging,
    Other,
}

impl OperationCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Identity => "identity",
            Self::Compute => "compute",
            Self::Storage => "storage",
            Self::Logging => "logging",
            Self::Other => "other",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    Validated,
    Rejected,
    AwaitingApproval,
    Queued,
    Executing,
    Completed,
    Failed,
    TimedOut,
    Cancelled,
    RolledBack,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Validated => "validated",
            Self::Rejected => "rejected",
            Self::AwaitingApproval => "awaiting_approval",
            Self::Queued => "queued",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
            Self::RolledBack => "rolled_back",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Rejected
                | Self::Completed
                | Self::Failed
                | Self::TimedOut
                | Self::Cancelled
                | Self::RolledBack
        )
    }
}

/// A single corrective action submitted for execution.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub operation_id: OperationId,
    pub incident_id: IncidentId,
    pub action_type: String,
    pub description: String,
    pub target_resource: String,
    pub params: Params,
    pub status: OperationStatus,
    pub created_at: DateTime<Utc>,
}

impl Operation {
    pub fn new(
        incident_id: impl Into<String>,
        action_type: impl Into<String>,
        target_resource: impl Into<String>,
    ) -> Self {
        Self {
            operation_id: OperationId::generate(),
            incident_id: IncidentId(incident_id.into()),
            action_type: action_type.into(),
            description: String::new(),
            target_resource: target_resource.into(),
            params: Params::new(),
            status: OperationStatus::Pending,
            created_at: Utc::now(),
        }
    }

    pub fn with_id(mut self, operation_id: impl Into<String>) -> Self {
        self.operation_id = OperationId(operation_id.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }
}

/// Inverse-operation recipe supplied by an implementation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RollbackSpec {
    pub rollback_action_type: String,
    /// Rollback param name -> snapshot key.
    pub state_param_mapping: BTreeMap<String, String>,
    pub additional_params: Params,
}

impl RollbackSpec {
    pub fn new(rollback_action_type: impl Into<String>) -> Self {
        Self {
            rollback_action_type: rollback_action_type.into(),
            state_param_mapping: BTreeMap::new(),
            additional_params: Params::new(),
        }
    }

    pub fn map_state(mut self, param: impl Into<String>, snapshot_key: impl Into<String>) -> Self {
        self.state_param_mapping.insert(param.into(), snapshot_key.into());
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.additional_params.insert(key.into(), value.into());
        self
    }
}

/// Registered contract and risk posture of one action type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationDefinition {
    pub action_type: String,
    pub category: OperationCategory,
    pub risk_level: RiskLevel,
    pub required_params: BTreeSet<String>,
    pub optional_params: BTreeSet<String>,
    pub required_permissions: BTreeSet<String>,
    pub prerequisites: BTreeSet<String>,
    pub supported_resource_types: BTreeSet<String>,
    pub is_reversible: bool,
    pub requires_approval: bool,
    /// Falls back to the engine default when unset.
    pub timeout_seconds: Option<u64>,
    /// Falls back to the engine default when unset.
    pub max_retries: Option<u32>,
}

impl OperationDefinition {
    pub fn new(
        action_type: impl Into<String>,
        category: OperationCategory,
        risk_level: RiskLevel,
    ) -> Self {
        Self {
            action_type: action_type.into(),
            category,
            risk_level,
            required_params: BTreeSet::new(),
            optional_params: BTreeSet::new(),
            required_permissions: BTreeSet::new(),
            prerequisites: BTreeSet::new(),
            supported_resource_types: BTreeSet::new(),
            is_reversible: false,
            requires_approval: false,
            timeout_seconds: None,
            max_retries: None,
        }
    }

    pub fn required(mut self, params: &[&str]) -> Self {
        self.required_params.extend(params.iter().map(|p| p.to_string()));
        self
    }

    pub fn optional(mut self, params: &[&str]) -> Self {
        self.optional_params.extend(params.iter().map(|p| p.to_string()));
        self
    }

    pub fn permissions(mut self, permissions: &[&str]) -> Self {
        self.required_permissions.extend(permissions.iter().map(|p| p.to_string()));
        self
    }

    pub fn prerequisites(mut self, action_types: &[&str]) -> Self {
        self.prerequisites.extend(action_types.iter().map(|p| p.to_string()));
        self
    }

    pub fn resource_types(mut self, resource_types: &[&str]) -> Self {
        self.supported_resource_types.extend(resource_types.iter().map(|p| p.to_string()));
        self
    }

    pub fn reversible(mut self) -> Self {
        self.is_reversible = true;
        self
    }

    pub fn approval_required(mut self) -> Self {
        self.requires_approval = true;
        self
    }

    pub fn timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    /// Every parameter problem found in `params`, in a stable order.
    pub fn parameter_violations(&self, params: &Params) -> Vec<ValidationError> {
        let mut violations = Vec::new();

        let missing: Vec<String> = self
            .required_params
            .iter()
            .filter(|name| !params.contains_key(name.as_str()))
            .cloned()
            .collect();
        if !missing.is_empty() {
            violations.push(ValidationError::MissingParameters {
                action_type: self.action_type.clone(),
                missing,
            });
        }

        let null: Vec<String> = self
            .required_params
            .iter()
            .filter(|name| !self.optional_params.contains(name.as_str()))
            .filter(|name| params.get(name.as_str()).is_some_and(Value::is_null))
            .cloned()
            .collect();
        if !null.is_empty() {
            violations.push(ValidationError::NullParameters {
                action_type: self.action_type.clone(),
                params: null,
            });
        }

        if let Some(resource_type) = params.get(RESOURCE_TYPE_PARAM).and_then(Value::as_str) {
            if !self.supported_resource_types.is_empty()
                && !self.supported_resource_types.contains(resource_type)
            {
                violations.push(ValidationError::UnsupportedResourceType {
                    action_type: self.action_type.clone(),
                    resource_type: resource_type.to_string(),
                    supported: self.supported_resource_types.iter().cloned().collect(),
                });
            }
        }

        violations
    }

    /// Raises the first parameter problem as a [`ValidationError`].
    pub fn validate_params(&self, params: &Params) -> Result<(), ValidationError> {
        match self.parameter_violations(params).into_iter().next() {
            Some(violation) => Err(violation),
            None => Ok(()),
        }
    }
}
