//! Domain models for the anvil engine.

pub mod approval;
pub mod audit;
pub mod config;
pub mod drift;
pub mod execution;
pub mod inventory;
pub mod module;
pub mod notification;
pub mod plan;
pub mod rbac;
pub mod resource;
pub mod rollback;

pub use approval::{
    ApprovalDecision, ApprovalRequest, ApprovalStatus, ConditionOperator, Workflow,
    WorkflowCondition, WorkflowStage,
};
pub use audit::{AuditEntry, AuditEventType};
pub use config::Config;
pub use drift::{DriftReport, DriftResult};
pub use execution::{Batch, ExecutionPlan, ExecutionResult, ExecutionSummary};
pub use inventory::{ConnectionConfig, Inventory, TargetGroup};
pub use module::{Module, ModuleMetadata, ModuleSpec, API_VERSION, KIND_MODULE};
pub use notification::{Notification, NotificationLevel};
pub use plan::{Action, Change, Plan, PlanExport, PlanSummary, PropertyChange, ResourceDiff};
pub use rbac::{Permission, Role, User};
pub use resource::{Resource, ResourceState};
pub use rollback::{RollbackAction, RollbackOutcome, RollbackPlan};
