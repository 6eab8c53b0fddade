use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Result reported by an operation implementation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub dry_run: bool,
    pub message: String,
    pub details: Map<String, Value>,
}

impl ExecutionOutcome {
    pub fn succeeded(message: impl Into<String>) -> Self {
        Self { success: true, dry_run: false, message: message.into(), details: Map::new() }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self { success: false, dry_run: false, message: message.into(), details: Map::new() }
    }

    pub fn simulated(message: impl Into<String>) -> Self {
        Self { success: true, dry_run: true, message: message.into(), details: Map::new() }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

/// Target environment handed to implementations on every call.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    pub project_id: String,
    pub settings: BTreeMap<String, String>,
}

impl Environment {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self { project_id: project_id.into(), settings: BTreeMap::new() }
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    pub fn setting(&self, key: &str) -> Option<&str> {
        self.settings.get(key).map(String::as_str)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorState {
    Executing,
    TimedOut,
}

impl MonitorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Executing => "executing",
            Self::TimedOut => "timed_out",
        }
    }
}
