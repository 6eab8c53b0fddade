use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::approval::{ApprovalId, ApprovalStatus};
use crate::domain::operation::OperationId;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("no operation definition registered for action type `{0}`")]
    UnknownActionType(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("unknown action type `{0}`")]
    UnknownActionType(String),
    #[error("{action_type}: missing required parameters: {}", .missing.join(", "))]
    MissingParameters { action_type: String, missing: Vec<String> },
    #[error("{action_type}: required parameters must not be null: {}", .params.join(", "))]
    NullParameters { action_type: String, params: Vec<String> },
    #[error(
        "{action_type}: resource type `{resource_type}` is not supported (supported: {})",
        .supported.join(", ")
    )]
    UnsupportedResourceType { action_type: String, resource_type: String, supported: Vec<String> },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConflictError {
    #[error("resource `{resource}` is locked by operation {owner}")]
    ResourceLocked { resource: String, owner: OperationId },
    #[error(
        "`{action_type}` conflicts with active `{active_action_type}` ({active_operation}) on `{resource}`"
    )]
    MutuallyExclusive {
        resource: String,
        action_type: String,
        active_action_type: String,
        active_operation: OperationId,
    },
    #[error("`{action_type}` requires exclusive access to `{resource}` but {active} other operation(s) are active")]
    ExclusiveAccess { resource: String, action_type: String, active: usize },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("operation {operation_id} exceeded its timeout of {timeout_seconds}s")]
pub struct TimeoutError {
    pub operation_id: OperationId,
    pub timeout_seconds: u64,
}

#[derive(Debug, Error)]
pub enum RollbackError {
    #[error("no rollback plan is retained for operation {0}")]
    NoPlan(OperationId),
    #[error("no implementation registered for rollback action `{0}`")]
    NoImplementation(String),
    #[error("rollback {rollback_id} for operation {original_operation_id} failed")]
    ExecutionFailed {
        rollback_id: OperationId,
        original_operation_id: OperationId,
        #[source]
        source: ExecutionFailure,
    },
    #[error("rollback {rollback_id} was rejected: {message}")]
    Rejected { rollback_id: OperationId, message: String },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("approval store backend failure: {0}")]
    Backend(String),
    #[error("approval store returned an undecodable record: {0}")]
    Decode(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApprovalError {
    #[error("approval request {0} not found")]
    NotFound(ApprovalId),
    #[error("approval request {id} is already {current} and cannot become {requested}")]
    InvalidTransition { id: ApprovalId, current: ApprovalStatus, requested: ApprovalStatus },
    #[error("`{0}` is not a decision an approver can record")]
    InvalidDecision(ApprovalStatus),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Closed classification of failures raised by operation implementations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    Connection,
    RateLimited,
    QuotaExceeded,
    Unavailable,
    PermissionDenied,
    NotFound,
    InvalidArgument,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Connection => "connection",
            Self::RateLimited => "rate_limited",
            Self::QuotaExceeded => "quota_exceeded",
            Self::Unavailable => "unavailable",
            Self::PermissionDenied => "permission_denied",
            Self::NotFound => "not_found",
            Self::InvalidArgument => "invalid_argument",
            Self::Internal => "internal",
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout
                | Self::Connection
                | Self::RateLimited
                | Self::QuotaExceeded
                | Self::Unavailable
        )
    }

    /// Maps a raw provider error message onto a kind. Used once, where
    /// external failures enter the engine.
    pub fn classify(message: &str) -> Self {
        let message = message.to_ascii_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|needle| message.contains(needle));

        if has(&["rate limit", "rate-limit", "too many requests", "429"]) {
            Self::RateLimited
        } else if has(&["quota"]) {
            Self::QuotaExceeded
        } else if has(&["timed out", "timeout", "deadline exceeded"]) {
            Self::Timeout
        } else if has(&["unavailable", "503", "try again"]) {
            Self::Unavailable
        } else if has(&["connection", "connect", "reset by peer", "broken pipe"]) {
            Self::Connection
        } else if has(&["permission", "forbidden", "unauthorized", "403", "401"]) {
            Self::PermissionDenied
        } else if has(&["not found", "404", "does not exist"]) {
            Self::NotFound
        } else if has(&["invalid", "malformed", "400"]) {
            Self::InvalidArgument
        } else {
            Self::Internal
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure returned by an operation implementation.
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct ExecutionFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl ExecutionFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    /// Builds a failure from an untyped provider message.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        Self { kind: ErrorKind::classify(&message), message }
    }
}

impl From<TimeoutError> for ExecutionFailure {
    fn from(value: TimeoutError) -> Self {
        Self::new(ErrorKind::Timeout, value.to_string())
    }
}
