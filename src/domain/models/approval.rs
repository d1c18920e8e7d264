//! Approval workflow domain models.
//!
//! A workflow is an ordered pipeline of stages, each requiring a number of
//! approve decisions from a listed set of approvers. Conditions select
//! which workflow applies to a given (action, module) pair.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::models::module::Module;

/// Lifecycle status of an approval request. `Pending` is the only
/// non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl ApprovalStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// A single approve/reject decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub approver: String,
    pub approved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub stage: usize,
    pub decided_at: DateTime<Utc>,
}

/// One stage of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStage {
    pub name: String,
    pub approvers: Vec<String>,
    pub required_count: usize,
}

/// Comparison operator for workflow conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
}

/// A predicate on the (action, module) pair selecting whether a workflow
/// applies. Fields resolve to `action`, `module_name`, `environment` (from
/// labels), or any other label key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowCondition {
    pub field: String,
    pub operator: ConditionOperator,
    pub value: String,
}

impl WorkflowCondition {
    /// Evaluate against an action and module.
    pub fn matches(&self, action: &str, module: &Module) -> bool {
        let resolved: Option<String> = match self.field.as_str() {
            "action" => Some(action.to_string()),
            "module_name" => Some(module.metadata.name.clone()),
            "environment" => module.metadata.labels.get("environment").cloned(),
            other => module.metadata.labels.get(other).cloned(),
        };
        let Some(actual) = resolved else {
            // A missing field only satisfies negative operators.
            return matches!(
                self.operator,
                ConditionOperator::NotEquals | ConditionOperator::NotContains
            );
        };
        match self.operator {
            ConditionOperator::Equals => actual == self.value,
            ConditionOperator::NotEquals => actual != self.value,
            ConditionOperator::Contains => actual.contains(&self.value),
            ConditionOperator::NotContains => !actual.contains(&self.value),
        }
    }
}

/// An approval pipeline: ordered stages plus the conditions gating whether
/// it applies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub name: String,
    pub stages: Vec<WorkflowStage>,
    #[serde(default)]
    pub conditions: Vec<WorkflowCondition>,
    /// Request lifetime; requests past this age expire.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    24 * 60 * 60
}

impl Workflow {
    /// A workflow matches when every condition evaluates true.
    pub fn matches(&self, action: &str, module: &Module) -> bool {
        self.conditions.iter().all(|c| c.matches(action, module))
    }
}

/// A pending or resolved request to perform a gated action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: Uuid,
    pub submitter: String,
    pub action: String,
    pub module: String,
    pub workflow_name: String,
    pub status: ApprovalStatus,
    pub approvals: Vec<ApprovalDecision>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub current_stage: usize,
}

impl ApprovalRequest {
    pub fn new(
        submitter: impl Into<String>,
        action: impl Into<String>,
        module: impl Into<String>,
        workflow: &Workflow,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            submitter: submitter.into(),
            action: action.into(),
            module: module.into(),
            workflow_name: workflow.name.clone(),
            status: ApprovalStatus::Pending,
            approvals: Vec::new(),
            created_at: now,
            expires_at: now + Duration::seconds(workflow.timeout_secs as i64),
            current_stage: 0,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Approve decisions recorded for the given stage.
    pub fn approvals_for_stage(&self, stage: usize) -> usize {
        self.approvals
            .iter()
            .filter(|d| d.stage == stage && d.approved)
            .count()
    }
}
