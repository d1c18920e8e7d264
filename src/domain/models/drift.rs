//! Drift detection domain models.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::models::plan::ResourceDiff;

/// Per-resource drift check outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftResult {
    pub resource_id: String,
    pub has_drift: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changes: Option<ResourceDiff>,
    pub checked_at: DateTime<Utc>,
    pub duration: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DriftResult {
    pub fn clean(resource_id: impl Into<String>, duration: Duration) -> Self {
        Self {
            resource_id: resource_id.into(),
            has_drift: false,
            changes: None,
            checked_at: Utc::now(),
            duration,
            error: None,
        }
    }

    pub fn drifted(resource_id: impl Into<String>, diff: ResourceDiff, duration: Duration) -> Self {
        Self {
            resource_id: resource_id.into(),
            has_drift: true,
            changes: Some(diff),
            checked_at: Utc::now(),
            duration,
            error: None,
        }
    }

    pub fn errored(
        resource_id: impl Into<String>,
        error: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self {
            resource_id: resource_id.into(),
            has_drift: false,
            changes: None,
            checked_at: Utc::now(),
            duration,
            error: Some(error.into()),
        }
    }
}

/// Module-scoped drift report with counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftReport {
    pub module: String,
    pub checked_at: DateTime<Utc>,
    pub total_checked: usize,
    pub drift_detected: usize,
    pub errors: usize,
    pub duration: Duration,
    pub results: Vec<DriftResult>,
}

impl DriftReport {
    pub fn from_results(
        module: impl Into<String>,
        results: Vec<DriftResult>,
        duration: Duration,
    ) -> Self {
        let drift_detected = results.iter().filter(|r| r.has_drift).count();
        let errors = results.iter().filter(|r| r.error.is_some()).count();
        Self {
            module: module.into(),
            checked_at: Utc::now(),
            total_checked: results.len(),
            drift_detected,
            errors,
            duration,
            results,
        }
    }

    pub fn has_drift(&self) -> bool {
        self.drift_detected > 0
    }
}
