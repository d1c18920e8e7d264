//! Plan domain models: diffs, changes, and the plan itself.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::models::resource::Resource;

/// The kind of change a provider computed for a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Update,
    Delete,
    Noop,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Noop => "noop",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single property transition within a diff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyChange {
    pub from: Value,
    pub to: Value,
}

/// Output of a provider's diff step.
///
/// Invariant: `action == Noop` if and only if `changes` is empty. The
/// constructors maintain this; [`Self::is_consistent`] checks it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDiff {
    pub resource_id: String,
    pub action: Action,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub changes: BTreeMap<String, PropertyChange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ResourceDiff {
    /// A diff recording no divergence.
    pub fn noop(resource_id: impl Into<String>) -> Self {
        Self {
            resource_id: resource_id.into(),
            action: Action::Noop,
            changes: BTreeMap::new(),
            reason: None,
        }
    }

    /// A diff with the given action and no changes recorded yet. Callers
    /// must add at least one change before the diff is consistent.
    pub fn new(resource_id: impl Into<String>, action: Action) -> Self {
        Self {
            resource_id: resource_id.into(),
            action,
            changes: BTreeMap::new(),
            reason: None,
        }
    }

    pub fn with_change(
        mut self,
        property: impl Into<String>,
        from: impl Into<Value>,
        to: impl Into<Value>,
    ) -> Self {
        self.changes.insert(
            property.into(),
            PropertyChange {
                from: from.into(),
                to: to.into(),
            },
        );
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn is_noop(&self) -> bool {
        self.action == Action::Noop
    }

    /// Check the noop ⇔ empty-changes invariant.
    pub fn is_consistent(&self) -> bool {
        (self.action == Action::Noop) == self.changes.is_empty()
    }
}

/// A planned change for one resource, possibly carrying a planning-time
/// error instead of a diff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Change {
    pub resource: Resource,
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<ResourceDiff>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Change {
    pub fn resource_id(&self) -> String {
        self.resource.id()
    }

    /// True for changes the executor should attempt: a real action with no
    /// planning-time error.
    pub fn is_actionable(&self) -> bool {
        self.action != Action::Noop && self.error.is_none()
    }
}

/// Per-action counters for a plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub to_create: usize,
    pub to_update: usize,
    pub to_delete: usize,
    pub no_changes: usize,
    pub errors: usize,
}

/// The ordered set of computed changes for a module. Built by the planner,
/// consumed by the executor, never mutated thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub module_name: String,
    pub module_version: String,
    pub created_at: DateTime<Utc>,
    pub changes: Vec<Change>,
}

impl Plan {
    pub fn new(module_name: impl Into<String>, module_version: impl Into<String>) -> Self {
        Self {
            module_name: module_name.into(),
            module_version: module_version.into(),
            created_at: Utc::now(),
            changes: Vec::new(),
        }
    }

    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary::default();
        for change in &self.changes {
            if change.error.is_some() {
                summary.errors += 1;
                continue;
            }
            match change.action {
                Action::Create => summary.to_create += 1,
                Action::Update => summary.to_update += 1,
                Action::Delete => summary.to_delete += 1,
                Action::Noop => summary.no_changes += 1,
            }
        }
        summary
    }

    /// True iff at least one error-free change carries a real action.
    pub fn has_changes(&self) -> bool {
        self.changes.iter().any(Change::is_actionable)
    }

    pub fn has_errors(&self) -> bool {
        self.changes.iter().any(|c| c.error.is_some())
    }

    /// The shape written by `plan --output`.
    pub fn export(&self) -> PlanExport {
        let summary = self.summary();
        PlanExport {
            changes: summary.to_create + summary.to_update + summary.to_delete,
            summary,
        }
    }
}

/// JSON export payload for `plan --output`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanExport {
    pub changes: usize,
    pub summary: PlanSummary,
}
