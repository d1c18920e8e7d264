//! Domain errors for the anvil convergence engine.

use thiserror::Error;

/// Engine-level errors surfaced by planning, execution, and the gate
/// subsystems.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Validation failed for {resource_id}: {message}")]
    Validation { resource_id: String, message: String },

    #[error("No provider registered for resource type: {0}")]
    UnknownResourceType(String),

    #[error("Failed to read state of {resource_id}: {message}")]
    Read { resource_id: String, message: String },

    #[error("Failed to diff {resource_id}: {message}")]
    Diff { resource_id: String, message: String },

    #[error("Failed to apply {resource_id}: {message}")]
    Apply { resource_id: String, message: String },

    #[error("Circular dependency detected involving resource: {0}")]
    CircularDependency(String),

    #[error("Unknown dependency {dependency} referenced by {resource_id}")]
    UnknownDependency { resource_id: String, dependency: String },

    #[error("Module validation failed: {0}")]
    InvalidModule(String),

    #[error("Policy violations block {subject}: {count} violation(s)")]
    PolicyDenied { subject: String, count: usize },

    #[error("User {user} is not authorized for {permission}")]
    AuthorizationDenied { user: String, permission: String },

    #[error("Approval required for {action} on module {module}")]
    ApprovalRequired { action: String, module: String },

    #[error("Approval request {0} has expired")]
    ApprovalExpired(String),

    #[error("{approver} is not an approver for the current stage of request {request_id}")]
    ApprovalUnauthorized { request_id: String, approver: String },

    #[error("Approval request not found: {0}")]
    ApprovalNotFound(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Operation canceled")]
    Canceled,

    #[error("Executor error: {0}")]
    Executor(String),

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for EngineError {
    fn from(err: serde_yaml::Error) -> Self {
        EngineError::Serialization(err.to_string())
    }
}
