pub mod approvals;
pub mod audit;
pub mod catalog;
pub mod config;
pub mod context;
pub mod domain;
pub mod errors;
pub mod execution;
pub mod rollback;
pub mod safety;

pub use approvals::{ApprovalStore, ApprovalWorkflow, InMemoryApprovalStore};
pub use audit::{AuditEvent, AuditSink, InMemoryAuditSink, TracingAuditSink};
pub use catalog::{OperationCatalog, OperationImplementation};
pub use config::{ConfigError, ConfigOverrides, EngineConfig, LoadOptions};
pub use context::EngineContext;
pub use domain::approval::{ApprovalId, ApprovalRequest, ApprovalStatus};
pub use domain::execution::{Environment, ExecutionOutcome};
pub use domain::operation::{
    IncidentId, Operation, OperationDefinition, OperationId, OperationStatus, RiskLevel,
};
pub use errors::{ApprovalError, ExecutionFailure, RollbackError, StoreError, ValidationError};
pub use execution::{RemediationScheduler, SchedulerStatus, SubmissionOutcome};
pub use rollback::RollbackManager;
pub use safety::{SafetyValidator, ValidationResult};
