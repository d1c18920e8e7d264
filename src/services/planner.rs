//! Planner service.
//!
//! Walks a module's resources in declaration order, drives each through
//! its provider's validate → read → diff pipeline, and assembles the
//! typed change set. Per-resource failures become errored changes;
//! planning always continues to the end of the module.

use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::{Action, Change, Module, Plan, Resource, ResourceDiff, ResourceState};
use crate::domain::ports::is_absent;
use crate::providers::ProviderRegistry;

pub struct Planner {
    registry: Arc<ProviderRegistry>,
}

impl Planner {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self { registry }
    }

    /// Compute the plan for a validated module.
    #[instrument(skip(self, module), fields(module = %module.name()))]
    pub async fn plan(&self, module: &Module) -> EngineResult<Plan> {
        module.validate()?;

        let mut plan = Plan::new(module.name(), module.metadata.version.clone());
        for resource in &module.spec.resources {
            plan.changes.push(self.plan_resource(resource).await);
        }

        debug!(
            changes = plan.changes.len(),
            has_changes = plan.has_changes(),
            "plan assembled"
        );
        Ok(plan)
    }

    async fn plan_resource(&self, resource: &Resource) -> Change {
        match self.compute_diff(resource).await {
            Ok(diff) => Change {
                resource: resource.clone(),
                action: diff.action,
                diff: Some(diff),
                error: None,
            },
            Err(e) => {
                warn!(resource = %resource.id(), error = %e, "planning failed for resource");
                Change {
                    resource: resource.clone(),
                    action: Action::Noop,
                    diff: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn compute_diff(&self, resource: &Resource) -> EngineResult<ResourceDiff> {
        let provider = self.registry.get(&resource.resource_type)?;
        provider.validate(resource)?;

        let current = provider.read(resource).await?;
        let diff = provider.diff(resource, &current)?;

        // State tie-break: a desired-absent resource either deletes (when
        // present) or noops (when absent), regardless of property deltas a
        // provider may have surfaced.
        if resource.desired_state() == Some(ResourceState::Absent) {
            if is_absent(&current) {
                return Ok(ResourceDiff::noop(resource.id()));
            }
            if diff.action != Action::Delete {
                return Ok(ResourceDiff::new(resource.id(), Action::Delete)
                    .with_change("state", "present", "absent")
                    .with_reason("resource declared absent"));
            }
        }

        if !diff.is_consistent() {
            return Err(EngineError::Diff {
                resource_id: resource.id(),
                message: format!(
                    "provider returned inconsistent diff: action {} with {} changes",
                    diff.action,
                    diff.changes.len()
                ),
            });
        }

        Ok(diff)
    }
}
