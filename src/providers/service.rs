//! Service resource provider (systemd).

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::{Action, Resource, ResourceDiff, ResourceState};
use crate::domain::ports::{absent_state, is_absent, CommandExecutor, ObservedState, Provider};
use crate::providers::file::shell_quote;

pub struct ServiceProvider {
    executor: Arc<dyn CommandExecutor>,
}

impl ServiceProvider {
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self { executor }
    }

    fn unit_name(resource: &Resource) -> String {
        resource
            .property_str("unit")
            .map(String::from)
            .unwrap_or_else(|| resource.name.clone())
    }

    async fn systemctl(&self, resource: &Resource, verb: &str) -> EngineResult<()> {
        let unit = shell_quote(&Self::unit_name(resource));
        let out = self
            .executor
            .run(&format!("systemctl {verb} {unit}"))
            .await
            .map_err(|e| EngineError::Apply {
                resource_id: resource.id(),
                message: e.to_string(),
            })?;
        if !out.success() {
            return Err(EngineError::Apply {
                resource_id: resource.id(),
                message: format!("systemctl {verb} failed: {}", out.stderr.trim()),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Provider for ServiceProvider {
    fn type_name(&self) -> &'static str {
        "service"
    }

    fn validate(&self, resource: &Resource) -> EngineResult<()> {
        match resource.desired_state() {
            None | Some(ResourceState::Running | ResourceState::Stopped) => Ok(()),
            Some(other) => Err(EngineError::Validation {
                resource_id: resource.id(),
                message: format!("state {other} is not valid for service resources"),
            }),
        }
    }

    async fn read(&self, resource: &Resource) -> EngineResult<ObservedState> {
        let unit = shell_quote(&Self::unit_name(resource));

        let active = self
            .executor
            .run(&format!("systemctl is-active {unit}"))
            .await
            .map_err(|e| EngineError::Read {
                resource_id: resource.id(),
                message: e.to_string(),
            })?;
        // Exit code 4 means no such unit.
        if active.exit_code == 4 {
            return Ok(absent_state());
        }

        let mut state = ObservedState::new();
        let running = active.stdout_trimmed() == "active";
        state.insert(
            "state".to_string(),
            Value::String(if running { "running" } else { "stopped" }.to_string()),
        );

        let enabled = self
            .executor
            .run(&format!("systemctl is-enabled {unit}"))
            .await
            .map_err(|e| EngineError::Read {
                resource_id: resource.id(),
                message: e.to_string(),
            })?;
        state.insert(
            "enabled".to_string(),
            Value::Bool(enabled.stdout_trimmed() == "enabled"),
        );

        Ok(state)
    }

    fn diff(&self, resource: &Resource, current: &ObservedState) -> EngineResult<ResourceDiff> {
        let id = resource.id();

        if is_absent(current) {
            return Err(EngineError::Diff {
                resource_id: id,
                message: format!(
                    "unit {} not found on target",
                    Self::unit_name(resource)
                ),
            });
        }

        let mut diff = ResourceDiff::new(id.clone(), Action::Update);

        if let Some(desired) = resource.desired_state() {
            let want = desired.as_str();
            let have = current.get("state").and_then(Value::as_str).unwrap_or("");
            if want != have {
                diff = diff.with_change("state", have, want);
            }
        }

        if let Some(want_enabled) = resource.property_bool("enabled") {
            let have_enabled = current
                .get("enabled")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            if want_enabled != have_enabled {
                diff = diff.with_change("enabled", have_enabled, want_enabled);
            }
        }

        if diff.changes.is_empty() {
            return Ok(ResourceDiff::noop(id));
        }
        Ok(diff)
    }

    async fn apply(&self, resource: &Resource, diff: &ResourceDiff) -> EngineResult<()> {
        if let Some(change) = diff.changes.get("state") {
            match change.to.as_str() {
                Some("running") => self.systemctl(resource, "start").await?,
                Some("stopped") => self.systemctl(resource, "stop").await?,
                other => {
                    return Err(EngineError::Apply {
                        resource_id: resource.id(),
                        message: format!("unsupported service state transition: {other:?}"),
                    })
                }
            }
        }
        if let Some(change) = diff.changes.get("enabled") {
            let verb = if change.to.as_bool().unwrap_or(false) {
                "enable"
            } else {
                "disable"
            };
            self.systemctl(resource, verb).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::transport::LocalExecutor;

    fn provider() -> ServiceProvider {
        ServiceProvider::new(Arc::new(LocalExecutor::new()))
    }

    fn running(enabled: bool) -> ObservedState {
        let mut state = ObservedState::new();
        state.insert("state".to_string(), Value::String("running".to_string()));
        state.insert("enabled".to_string(), Value::Bool(enabled));
        state
    }

    #[test]
    fn test_validate_rejects_pkg_states() {
        let resource = Resource::new("service", "nginx").with_state(ResourceState::Latest);
        assert!(provider().validate(&resource).is_err());
    }

    #[test]
    fn test_diff_running_to_stopped() {
        let resource = Resource::new("service", "nginx").with_state(ResourceState::Stopped);
        let diff = provider().diff(&resource, &running(true)).unwrap();
        assert_eq!(diff.action, Action::Update);
        assert_eq!(
            diff.changes.get("state").map(|c| c.to.clone()),
            Some(Value::String("stopped".to_string()))
        );
    }

    #[test]
    fn test_diff_enabled_flag() {
        let resource = Resource::new("service", "nginx")
            .with_state(ResourceState::Running)
            .with_property("enabled", true);
        let diff = provider().diff(&resource, &running(false)).unwrap();
        assert!(diff.changes.contains_key("enabled"));
        assert!(!diff.changes.contains_key("state"));
    }

    #[test]
    fn test_diff_matching_is_noop() {
        let resource = Resource::new("service", "nginx")
            .with_state(ResourceState::Running)
            .with_property("enabled", true);
        let diff = provider().diff(&resource, &running(true)).unwrap();
        assert!(diff.is_noop());
    }

    #[test]
    fn test_missing_unit_is_diff_error() {
        let resource = Resource::new("service", "ghost").with_state(ResourceState::Running);
        assert!(provider().diff(&resource, &absent_state()).is_err());
    }
}
