//! Rollback service.
//!
//! Builds a reverse-ordered rollback plan from successful execution
//! results plus previously captured prior states, and re-converges each
//! resource to its prior state with a retry policy.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::domain::models::{
    Action, ExecutionResult, Resource, ResourceDiff, ResourceState, RollbackAction,
    RollbackOutcome, RollbackPlan,
};
use crate::domain::ports::ObservedState;
use crate::providers::ProviderRegistry;
use crate::services::recovery::RetryPolicy;

pub struct RollbackManager {
    registry: Arc<ProviderRegistry>,
    policy: RetryPolicy,
}

impl RollbackManager {
    pub fn new(registry: Arc<ProviderRegistry>, policy: RetryPolicy) -> Self {
        Self { registry, policy }
    }

    /// Derive a rollback plan: successful results, reverse chronological
    /// order, restricted to resources with a captured prior state. The
    /// failing resource never appears because it has no successful result.
    pub fn build_plan(
        &self,
        module_name: &str,
        results: &[ExecutionResult],
        priors: &HashMap<String, ObservedState>,
    ) -> RollbackPlan {
        let mut plan = RollbackPlan::new(module_name);
        for result in results.iter().rev() {
            if !result.success {
                continue;
            }
            let Some(prior) = priors.get(&result.resource_id) else {
                warn!(
                    resource = %result.resource_id,
                    "no prior state captured; resource cannot be rolled back"
                );
                continue;
            };
            plan.actions.push(RollbackAction {
                resource_id: result.resource_id.clone(),
                prior_state: prior.clone(),
                action: Action::Update,
                description: format!(
                    "revert {} to the state captured before execution",
                    result.resource_id
                ),
            });
        }
        plan
    }

    /// Run the rollback plan. Each action is retried per the policy;
    /// failures are counted and the remaining actions still run.
    pub async fn execute(
        &self,
        plan: &RollbackPlan,
        resources: &HashMap<String, Resource>,
        cancel: &CancellationToken,
    ) -> RollbackOutcome {
        let mut outcome = RollbackOutcome::default();

        for action in &plan.actions {
            outcome.attempted += 1;

            let result = self.revert_one(action, resources, cancel).await;
            match result {
                Ok(()) => {
                    info!(resource = %action.resource_id, "rolled back");
                    outcome.succeeded += 1;
                }
                Err(e) => {
                    warn!(resource = %action.resource_id, error = %e, "rollback action failed");
                    outcome.failed += 1;
                    outcome
                        .failures
                        .push(format!("{}: {e}", action.resource_id));
                }
            }
        }

        outcome
    }

    async fn revert_one(
        &self,
        action: &RollbackAction,
        resources: &HashMap<String, Resource>,
        cancel: &CancellationToken,
    ) -> crate::domain::errors::EngineResult<()> {
        let original = resources.get(&action.resource_id).ok_or_else(|| {
            crate::domain::errors::EngineError::Apply {
                resource_id: action.resource_id.clone(),
                message: "resource missing from rollback context".to_string(),
            }
        })?;

        let target = resource_at_prior_state(original, &action.prior_state);
        let diff = synthetic_reversion_diff(action);
        let provider = self.registry.get(&target.resource_type)?;

        self.policy
            .execute(cancel, || provider.apply(&target, &diff))
            .await
    }
}

/// Reconstruct the resource as it looked before execution: same identity,
/// properties replaced by the captured prior state.
fn resource_at_prior_state(
    original: &Resource,
    prior: &std::collections::BTreeMap<String, Value>,
) -> Resource {
    let mut target = original.clone();
    target.properties.clear();
    target.state = None;
    for (key, value) in prior {
        if key == "state" {
            if let Some(state) = value.as_str().and_then(|s| ResourceState::from_str(s).ok()) {
                target.state = Some(state);
                continue;
            }
        }
        target.properties.insert(key.clone(), value.clone());
    }
    target
}

/// The synthetic diff directing the provider to re-converge to the prior
/// state.
fn synthetic_reversion_diff(action: &RollbackAction) -> ResourceDiff {
    let mut diff =
        ResourceDiff::new(action.resource_id.clone(), Action::Update).with_reason("rollback");
    for (key, value) in &action.prior_state {
        diff = diff.with_change(key.clone(), Value::Null, value.clone());
    }
    if diff.changes.is_empty() {
        diff = diff.with_change("state", Value::Null, "absent");
    }
    diff
}
