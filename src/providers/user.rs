//! User resource provider.
//!
//! Manages system accounts: presence, uid, gid, home, shell, and
//! supplementary groups, through useradd/usermod/userdel.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::{Action, Resource, ResourceDiff, ResourceState};
use crate::domain::ports::{absent_state, is_absent, CommandExecutor, ObservedState, Provider};
use crate::providers::file::shell_quote;

pub struct UserProvider {
    executor: Arc<dyn CommandExecutor>,
}

impl UserProvider {
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self { executor }
    }

    /// Build the flag list shared by useradd and usermod.
    fn account_flags(resource: &Resource) -> Vec<String> {
        let mut flags = Vec::new();
        if let Some(uid) = resource.property_i64("uid") {
            flags.push(format!("-u {uid}"));
        }
        if let Some(gid) = resource.property_i64("gid") {
            flags.push(format!("-g {gid}"));
        }
        if let Some(home) = resource.property_str("home") {
            flags.push(format!("-d {}", shell_quote(home)));
        }
        if let Some(shell) = resource.property_str("shell") {
            flags.push(format!("-s {}", shell_quote(shell)));
        }
        if let Some(groups) = resource.property_str_list("groups") {
            if !groups.is_empty() {
                flags.push(format!("-G {}", shell_quote(&groups.join(","))));
            }
        }
        flags
    }

    async fn run_checked(&self, resource: &Resource, command: &str) -> EngineResult<()> {
        let out = self
            .executor
            .run(command)
            .await
            .map_err(|e| EngineError::Apply {
                resource_id: resource.id(),
                message: e.to_string(),
            })?;
        if !out.success() {
            return Err(EngineError::Apply {
                resource_id: resource.id(),
                message: format!("{command} failed: {}", out.stderr.trim()),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Provider for UserProvider {
    fn type_name(&self) -> &'static str {
        "user"
    }

    fn validate(&self, resource: &Resource) -> EngineResult<()> {
        match resource.desired_state() {
            None | Some(ResourceState::Present | ResourceState::Absent) => {}
            Some(other) => {
                return Err(EngineError::Validation {
                    resource_id: resource.id(),
                    message: format!("state {other} is not valid for user resources"),
                })
            }
        }
        for key in ["uid", "gid"] {
            if let Some(value) = resource.properties.get(key) {
                if value.as_i64().is_none() {
                    return Err(EngineError::Validation {
                        resource_id: resource.id(),
                        message: format!("{key} must be an integer"),
                    });
                }
            }
        }
        Ok(())
    }

    async fn read(&self, resource: &Resource) -> EngineResult<ObservedState> {
        let username = shell_quote(&resource.name);
        let passwd = self
            .executor
            .run(&format!("getent passwd {username}"))
            .await
            .map_err(|e| EngineError::Read {
                resource_id: resource.id(),
                message: e.to_string(),
            })?;
        if !passwd.success() {
            return Ok(absent_state());
        }

        // name:x:uid:gid:gecos:home:shell
        let line = passwd.stdout_trimmed();
        let fields: Vec<&str> = line.split(':').collect();
        let mut state = ObservedState::new();
        state.insert("state".to_string(), Value::String("present".to_string()));
        if let Some(uid) = fields.get(2).and_then(|f| f.parse::<i64>().ok()) {
            state.insert("uid".to_string(), Value::from(uid));
        }
        if let Some(gid) = fields.get(3).and_then(|f| f.parse::<i64>().ok()) {
            state.insert("gid".to_string(), Value::from(gid));
        }
        if let Some(home) = fields.get(5) {
            state.insert("home".to_string(), Value::String((*home).to_string()));
        }
        if let Some(shell) = fields.get(6) {
            state.insert("shell".to_string(), Value::String((*shell).to_string()));
        }

        let groups = self
            .executor
            .run(&format!("id -Gn {username}"))
            .await
            .map_err(|e| EngineError::Read {
                resource_id: resource.id(),
                message: e.to_string(),
            })?;
        if groups.success() {
            let list: Vec<Value> = groups
                .stdout_trimmed()
                .split_whitespace()
                .map(|g| Value::String(g.to_string()))
                .collect();
            state.insert("groups".to_string(), Value::Array(list));
        }

        Ok(state)
    }

    fn diff(&self, resource: &Resource, current: &ObservedState) -> EngineResult<ResourceDiff> {
        let id = resource.id();
        let currently_absent = is_absent(current);
        let wants_absent = resource.desired_state() == Some(ResourceState::Absent);

        if wants_absent {
            if currently_absent {
                return Ok(ResourceDiff::noop(id));
            }
            return Ok(ResourceDiff::new(id, Action::Delete)
                .with_change("state", "present", "absent")
                .with_reason("account exists but is declared absent"));
        }

        if currently_absent {
            let mut diff = ResourceDiff::new(id, Action::Create)
                .with_change("state", "absent", "present")
                .with_reason("account does not exist");
            for key in ["uid", "gid", "home", "shell", "groups"] {
                if let Some(want) = resource.properties.get(key) {
                    diff = diff.with_change(key, Value::Null, want.clone());
                }
            }
            return Ok(diff);
        }

        let mut diff = ResourceDiff::new(id.clone(), Action::Update);
        for key in ["uid", "gid", "home", "shell"] {
            if let Some(want) = resource.properties.get(key) {
                let have = current.get(key).cloned().unwrap_or(Value::Null);
                if &have != want {
                    diff = diff.with_change(key, have, want.clone());
                }
            }
        }
        // Group membership compares as a set: order from id -Gn is not
        // meaningful.
        if let Some(want_groups) = resource.property_str_list("groups") {
            let mut want_sorted = want_groups.clone();
            want_sorted.sort();
            let mut have_sorted: Vec<String> = current
                .get("groups")
                .and_then(Value::as_array)
                .map(|a| {
                    a.iter()
                        .filter_map(Value::as_str)
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default();
            have_sorted.sort();
            if want_sorted != have_sorted {
                diff = diff.with_change(
                    "groups",
                    Value::Array(have_sorted.into_iter().map(Value::String).collect()),
                    Value::Array(want_sorted.into_iter().map(Value::String).collect()),
                );
            }
        }

        if diff.changes.is_empty() {
            return Ok(ResourceDiff::noop(id));
        }
        Ok(diff)
    }

    async fn apply(&self, resource: &Resource, diff: &ResourceDiff) -> EngineResult<()> {
        let username = shell_quote(&resource.name);
        match diff.action {
            Action::Noop => Ok(()),
            Action::Delete => {
                self.run_checked(resource, &format!("userdel {username}"))
                    .await
            }
            Action::Create => {
                let flags = Self::account_flags(resource).join(" ");
                let command = if flags.is_empty() {
                    format!("useradd {username}")
                } else {
                    format!("useradd {flags} {username}")
                };
                self.run_checked(resource, &command).await
            }
            Action::Update => {
                let flags = Self::account_flags(resource).join(" ");
                if flags.is_empty() {
                    return Ok(());
                }
                self.run_checked(resource, &format!("usermod {flags} {username}"))
                    .await
            }
        }
    }
}
