//! Execution domain models: batched plans, per-resource results, and the
//! aggregate summary.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::models::plan::Change;

/// A set of changes safe to apply concurrently: no change in a batch
/// depends on another member of the same batch.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    pub changes: Vec<Change>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// A plan partitioned into dependency-ordered batches. Earlier batches must
/// fully complete before a later batch starts.
#[derive(Debug, Clone, Default)]
pub struct ExecutionPlan {
    pub module_name: String,
    pub batches: Vec<Batch>,
}

impl ExecutionPlan {
    pub fn total_changes(&self) -> usize {
        self.batches.iter().map(Batch::len).sum()
    }
}

/// Outcome of applying a single resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub resource_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration: Duration,
    /// Property names that were changed, for reporting.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changes: Vec<String>,
    pub finished_at: DateTime<Utc>,
}

impl ExecutionResult {
    pub fn success(resource_id: impl Into<String>, duration: Duration, changes: Vec<String>) -> Self {
        Self {
            resource_id: resource_id.into(),
            success: true,
            error: None,
            duration,
            changes,
            finished_at: Utc::now(),
        }
    }

    pub fn failure(
        resource_id: impl Into<String>,
        duration: Duration,
        error: impl Into<String>,
    ) -> Self {
        Self {
            resource_id: resource_id.into(),
            success: false,
            error: Some(error.into()),
            duration,
            changes: Vec::new(),
            finished_at: Utc::now(),
        }
    }
}

/// Aggregate counters over an execution.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration: Duration,
}

impl ExecutionSummary {
    pub fn from_results(results: &[ExecutionResult], total: usize, duration: Duration) -> Self {
        let succeeded = results.iter().filter(|r| r.success).count();
        let failed = results.iter().filter(|r| !r.success).count();
        Self {
            total,
            succeeded,
            failed,
            skipped: total.saturating_sub(results.len()),
            duration,
        }
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed == 0 && self.skipped == 0
    }
}
