//! File resource provider.
//!
//! Ensures a path is present or absent with the declared content (direct or
//! templated), mode, owner, and group. Writes go to `<path>.tmp` followed
//! by an atomic rename.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::{Action, Resource, ResourceDiff, ResourceState};
use crate::domain::ports::{absent_state, is_absent, CommandExecutor, ObservedState, Provider};

pub struct FileProvider {
    executor: Arc<dyn CommandExecutor>,
}

impl FileProvider {
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self { executor }
    }

    fn path_of(resource: &Resource) -> EngineResult<String> {
        resource
            .property_str("path")
            .map(String::from)
            .ok_or_else(|| EngineError::Validation {
                resource_id: resource.id(),
                message: "file resource requires a path property".to_string(),
            })
    }

    /// Resolve the desired file content: `content` directly, or `template`
    /// rendered against the `vars` mapping.
    fn desired_content(resource: &Resource) -> Option<String> {
        if let Some(content) = resource.property_str("content") {
            return Some(content.to_string());
        }
        let template = resource.property_str("template")?;
        let vars = resource
            .properties
            .get("vars")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        Some(render_template(template, &vars))
    }
}

/// Substitute `{{ key }}` placeholders from a vars mapping. Unknown keys
/// are left in place so missing variables are visible in the diff.
fn render_template(template: &str, vars: &serde_json::Map<String, Value>) -> String {
    let mut rendered = template.to_string();
    for (key, value) in vars {
        let needle_spaced = format!("{{{{ {key} }}}}");
        let needle_tight = format!("{{{{{key}}}}}");
        let replacement = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        rendered = rendered.replace(&needle_spaced, &replacement);
        rendered = rendered.replace(&needle_tight, &replacement);
    }
    rendered
}

/// Normalize an octal mode string for comparison ("0644" == "644").
fn normalize_mode(mode: &str) -> Option<u32> {
    u32::from_str_radix(mode.trim_start_matches('0'), 8).ok().or_else(|| {
        if mode.chars().all(|c| c == '0') {
            Some(0)
        } else {
            None
        }
    })
}

#[async_trait]
impl Provider for FileProvider {
    fn type_name(&self) -> &'static str {
        "file"
    }

    fn validate(&self, resource: &Resource) -> EngineResult<()> {
        Self::path_of(resource)?;

        if let Some(mode) = resource.property_str("mode") {
            if normalize_mode(mode).is_none() {
                return Err(EngineError::Validation {
                    resource_id: resource.id(),
                    message: format!("mode {mode:?} is not a valid octal string"),
                });
            }
        }
        if resource.property_str("content").is_some() && resource.property_str("template").is_some()
        {
            return Err(EngineError::Validation {
                resource_id: resource.id(),
                message: "content and template are mutually exclusive".to_string(),
            });
        }
        Ok(())
    }

    async fn read(&self, resource: &Resource) -> EngineResult<ObservedState> {
        let path = Self::path_of(resource)?;

        let exists = self
            .executor
            .run(&format!("test -e {}", shell_quote(&path)))
            .await
            .map_err(|e| EngineError::Read {
                resource_id: resource.id(),
                message: e.to_string(),
            })?;
        if !exists.success() {
            return Ok(absent_state());
        }

        let mut state = ObservedState::new();
        state.insert("state".to_string(), Value::String("present".to_string()));

        let stat = self
            .executor
            .run(&format!("stat -c '%a %U %G' {}", shell_quote(&path)))
            .await
            .map_err(|e| EngineError::Read {
                resource_id: resource.id(),
                message: e.to_string(),
            })?;
        if stat.success() {
            let fields: Vec<&str> = stat.stdout_trimmed().split_whitespace().collect();
            if let [mode, owner, group] = fields.as_slice() {
                state.insert("mode".to_string(), Value::String((*mode).to_string()));
                state.insert("owner".to_string(), Value::String((*owner).to_string()));
                state.insert("group".to_string(), Value::String((*group).to_string()));
            }
        }

        // Content is only observed when the resource declares it, so large
        // unmanaged files are never pulled over the transport.
        if Self::desired_content(resource).is_some() {
            if let Some(bytes) = self.executor.read_file(&path).await? {
                state.insert(
                    "content".to_string(),
                    Value::String(String::from_utf8_lossy(&bytes).into_owned()),
                );
            }
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
                .with_reason("file exists but is declared absent"));
        }

        let mut desired: BTreeMap<String, Value> = BTreeMap::new();
        if let Some(content) = Self::desired_content(resource) {
            desired.insert("content".to_string(), Value::String(content));
        }
        if let Some(owner) = resource.property_str("owner") {
            desired.insert("owner".to_string(), Value::String(owner.to_string()));
        }
        if let Some(group) = resource.property_str("group") {
            desired.insert("group".to_string(), Value::String(group.to_string()));
        }

        if currently_absent {
            let mut diff = ResourceDiff::new(id, Action::Create)
                .with_change("state", "absent", "present")
                .with_reason("file does not exist");
            for (key, value) in desired {
                diff = diff.with_change(key, Value::Null, value);
            }
            if let Some(mode) = resource.property_str("mode") {
                diff = diff.with_change("mode", Value::Null, mode);
            }
            return Ok(diff);
        }

        let mut diff = ResourceDiff::new(id, Action::Update);
        for (key, want) in desired {
            let have = current.get(&key).cloned().unwrap_or(Value::Null);
            if have != want {
                diff = diff.with_change(key, have, want);
            }
        }
        // Modes compare numerically so "0644" and "644" agree.
        if let Some(want_mode) = resource.property_str("mode") {
            let have_mode = current.get("mode").and_then(Value::as_str).unwrap_or("");
            if normalize_mode(want_mode) != normalize_mode(have_mode) {
                diff = diff.with_change("mode", have_mode, want_mode);
            }
        }

        if diff.changes.is_empty() {
            return Ok(ResourceDiff::noop(resource.id()));
        }
        Ok(diff)
    }

    async fn apply(&self, resource: &Resource, diff: &ResourceDiff) -> EngineResult<()> {
        let path = Self::path_of(resource)?;
        let quoted = shell_quote(&path);

        match diff.action {
            Action::Noop => Ok(()),
            Action::Delete => {
                let out = self
                    .executor
                    .run(&format!("rm -f {quoted}"))
                    .await
                    .map_err(apply_err(resource))?;
                if !out.success() {
                    return Err(EngineError::Apply {
                        resource_id: resource.id(),
                        message: format!("rm failed: {}", out.stderr.trim()),
                    });
                }
                Ok(())
            }
            Action::Create | Action::Update => {
                if diff.changes.contains_key("content")
                    || (diff.action == Action::Create && Self::desired_content(resource).is_some())
                {
                    let content = Self::desired_content(resource).unwrap_or_default();
                    let tmp = format!("{path}.tmp");
                    self.executor.write_file(&tmp, content.as_bytes()).await?;
                    let out = self
                        .executor
                        .run(&format!("mv -f {} {quoted}", shell_quote(&tmp)))
                        .await
                        .map_err(apply_err(resource))?;
                    if !out.success() {
                        return Err(EngineError::Apply {
                            resource_id: resource.id(),
                            message: format!("rename failed: {}", out.stderr.trim()),
                        });
                    }
                } else if diff.action == Action::Create {
                    // Presence without managed content.
                    let out = self
                        .executor
                        .run(&format!("touch {quoted}"))
                        .await
                        .map_err(apply_err(resource))?;
                    if !out.success() {
                        return Err(EngineError::Apply {
                            resource_id: resource.id(),
                            message: format!("touch failed: {}", out.stderr.trim()),
                        });
                    }
                }

                if let Some(mode) = resource.property_str("mode") {
                    if diff.changes.contains_key("mode") {
                        let out = self
                            .executor
                            .run(&format!("chmod {mode} {quoted}"))
                            .await
                            .map_err(apply_err(resource))?;
                        if !out.success() {
                            return Err(EngineError::Apply {
                                resource_id: resource.id(),
                                message: format!("chmod failed: {}", out.stderr.trim()),
                            });
                        }
                    }
                }
                if diff.changes.contains_key("owner") || diff.changes.contains_key("group") {
                    let owner = resource.property_str("owner").unwrap_or("");
                    let group = resource.property_str("group").unwrap_or("");
                    let spec = match (owner.is_empty(), group.is_empty()) {
                        (false, false) => format!("{owner}:{group}"),
                        (false, true) => owner.to_string(),
                        (true, false) => format!(":{group}"),
                        (true, true) => String::new(),
                    };
                    if !spec.is_empty() {
                        let out = self
                            .executor
                            .run(&format!("chown {spec} {quoted}"))
                            .await
                            .map_err(apply_err(resource))?;
                        if !out.success() {
                            return Err(EngineError::Apply {
                                resource_id: resource.id(),
                                message: format!("chown failed: {}", out.stderr.trim()),
                            });
                        }
                    }
                }
                Ok(())
            }
        }
    }
}

fn apply_err(resource: &Resource) -> impl FnOnce(EngineError) -> EngineError {
    let resource_id = resource.id();
    move |e| EngineError::Apply {
        resource_id,
        message: e.to_string(),
    }
}

/// Single-quote a path for the shell.
pub(crate) fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}
