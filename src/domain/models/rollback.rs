//! Rollback domain models.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::models::plan::Action;

/// A single reversion targeting a resource whose apply succeeded before an
/// overall failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackAction {
    pub resource_id: String,
    /// Observed state captured before execution started.
    pub prior_state: BTreeMap<String, Value>,
    pub action: Action,
    pub description: String,
}

/// Reverse-ordered reversions derived from successful execution results
/// plus previously captured prior states.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackPlan {
    pub module_name: String,
    pub created_at: DateTime<Utc>,
    pub actions: Vec<RollbackAction>,
}

impl RollbackPlan {
    pub fn new(module_name: impl Into<String>) -> Self {
        Self {
            module_name: module_name.into(),
            created_at: Utc::now(),
            actions: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }
}

/// Outcome of running a rollback plan. Failed reversions are counted but do
/// not stop the remaining actions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RollbackOutcome {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<String>,
}

impl RollbackOutcome {
    pub fn fully_reverted(&self) -> bool {
        self.failed == 0
    }
}
