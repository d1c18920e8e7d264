//! Provider port - the uniform contract every resource kind implements.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::errors::EngineResult;
use crate::domain::models::{Resource, ResourceDiff};

/// Observed state of a resource: a flat property map. Providers encode
/// absence as `{"state": "absent"}`.
pub type ObservedState = BTreeMap<String, Value>;

/// The converge contract for one resource kind.
///
/// The planner drives every kind through the same pipeline:
/// validate → read → diff, and the executor later calls apply. `diff` is a
/// pure computation and must be deterministic for identical inputs;
/// `apply` must be idempotent, so re-applying a diff after success yields
/// success with no additional observable change.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Constant kind identifier used for registry dispatch.
    fn type_name(&self) -> &'static str;

    /// Structural and semantic checks on desired state, without contacting
    /// any remote system.
    fn validate(&self, resource: &Resource) -> EngineResult<()>;

    /// Observe the current remote state of exactly this resource.
    async fn read(&self, resource: &Resource) -> EngineResult<ObservedState>;

    /// Compare desired vs observed state. Properties not declared on the
    /// desired resource are not compared.
    fn diff(&self, resource: &Resource, current: &ObservedState) -> EngineResult<ResourceDiff>;

    /// Effect the change described by `diff`.
    async fn apply(&self, resource: &Resource, diff: &ResourceDiff) -> EngineResult<()>;
}

/// Helper: the conventional absent-state observation.
pub fn absent_state() -> ObservedState {
    let mut state = ObservedState::new();
    state.insert("state".to_string(), Value::String("absent".to_string()));
    state
}

/// Helper: true when an observation uses the absence convention.
pub fn is_absent(state: &ObservedState) -> bool {
    state
        .get("state")
        .and_then(Value::as_str)
        .map(|s| s == "absent")
        .unwrap_or(state.is_empty())
}
