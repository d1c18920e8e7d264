//! Shell command resource provider.
//!
//! Runs a command under an optional user, working directory, and timeout.
//! Guards make it convergent: `creates` skips when a path exists, `unless`
//! skips when a command succeeds, `only_if` skips when a command fails.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::{Action, Resource, ResourceDiff};
use crate::domain::ports::{CommandExecutor, ObservedState, Provider, RunOptions};
use crate::providers::file::shell_quote;

pub struct ShellProvider {
    executor: Arc<dyn CommandExecutor>,
}

impl ShellProvider {
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self { executor }
    }

    fn command_of(resource: &Resource) -> EngineResult<String> {
        resource
            .property_str("command")
            .map(String::from)
            .ok_or_else(|| EngineError::Validation {
                resource_id: resource.id(),
                message: "shell resource requires a command property".to_string(),
            })
    }

    /// Evaluate the guards. Returns true when the command is already
    /// satisfied and should not run.
    async fn guards_satisfied(&self, resource: &Resource) -> EngineResult<bool> {
        if let Some(creates) = resource.property_str("creates") {
            let out = self
                .executor
                .run(&format!("test -e {}", shell_quote(creates)))
                .await?;
            if out.success() {
                return Ok(true);
            }
        }
        if let Some(unless) = resource.property_str("unless") {
            let out = self.executor.run(unless).await?;
            if out.success() {
                return Ok(true);
            }
        }
        // only_if is usually the resource-level field; accept a property
        // spelling as well.
        let only_if = resource
            .only_if
            .as_deref()
            .or_else(|| resource.property_str("only_if"));
        if let Some(only_if) = only_if {
            let out = self.executor.run(only_if).await?;
            if !out.success() {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[async_trait]
impl Provider for ShellProvider {
    fn type_name(&self) -> &'static str {
        "shell"
    }

    fn validate(&self, resource: &Resource) -> EngineResult<()> {
        Self::command_of(resource)?;
        if let Some(timeout) = resource.properties.get("timeout") {
            if timeout.as_u64().is_none() {
                return Err(EngineError::Validation {
                    resource_id: resource.id(),
                    message: "timeout must be a non-negative integer of seconds".to_string(),
                });
            }
        }
        Ok(())
    }

    async fn read(&self, resource: &Resource) -> EngineResult<ObservedState> {
        let satisfied = self
            .guards_satisfied(resource)
            .await
            .map_err(|e| EngineError::Read {
                resource_id: resource.id(),
                message: e.to_string(),
            })?;
        let mut state = ObservedState::new();
        state.insert(
            "state".to_string(),
            Value::String(if satisfied { "satisfied" } else { "pending" }.to_string()),
        );
        Ok(state)
    }

    fn diff(&self, resource: &Resource, current: &ObservedState) -> EngineResult<ResourceDiff> {
        let id = resource.id();
        let satisfied = current
            .get("state")
            .and_then(Value::as_str)
            .map(|s| s == "satisfied")
            .unwrap_or(false);

        if satisfied {
            return Ok(ResourceDiff::noop(id));
        }
        let command = Self::command_of(resource)?;
        Ok(ResourceDiff::new(id, Action::Create)
            .with_change("command", Value::Null, command)
            .with_reason("guards indicate the command has not run"))
    }

    async fn apply(&self, resource: &Resource, diff: &ResourceDiff) -> EngineResult<()> {
        if diff.is_noop() {
            return Ok(());
        }
        // Guards are re-checked at apply time so a command satisfied since
        // planning is not run twice.
        if self
            .guards_satisfied(resource)
            .await
            .map_err(|e| EngineError::Apply {
                resource_id: resource.id(),
                message: e.to_string(),
            })?
        {
            return Ok(());
        }

        let command = Self::command_of(resource)?;
        let options = RunOptions {
            user: resource.property_str("user").map(String::from),
            cwd: resource.property_str("cwd").map(String::from),
            timeout: resource
                .properties
                .get("timeout")
                .and_then(Value::as_u64)
                .map(Duration::from_secs),
        };

        let out = self
            .executor
            .run_with(&command, options)
            .await
            .map_err(|e| EngineError::Apply {
                resource_id: resource.id(),
                message: e.to_string(),
            })?;
        if !out.success() {
            return Err(EngineError::Apply {
                resource_id: resource.id(),
                message: format!(
                    "command exited with {}: {}",
                    out.exit_code,
                    out.stderr.trim()
                ),
            });
        }
        Ok(())
    }
}
