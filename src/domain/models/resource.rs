//! Resource domain model.
//!
//! A resource is the atomic unit of desired state: a typed, named
//! declaration with free-form properties, explicit dependencies, and
//! optional guard commands.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::errors::{EngineError, EngineResult};

/// Desired lifecycle state of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceState {
    Present,
    Absent,
    Running,
    Stopped,
    Latest,
}

impl ResourceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Present => "present",
            Self::Absent => "absent",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Latest => "latest",
        }
    }
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "present" => Ok(Self::Present),
            "absent" => Ok(Self::Absent),
            "running" => Ok(Self::Running),
            "stopped" => Ok(Self::Stopped),
            "latest" => Ok(Self::Latest),
            other => Err(format!("unknown resource state: {other}")),
        }
    }
}

/// A declarative resource within a module.
///
/// Properties not covered by the named fields are collected into
/// `properties` via serde flattening, so module YAML can declare them
/// inline next to `type` and `name`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<ResourceState>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notify: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub only_if: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_if: Option<String>,
    #[serde(flatten)]
    pub properties: BTreeMap<String, Value>,
}

impl Resource {
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            name: name.into(),
            state: None,
            depends_on: Vec::new(),
            notify: Vec::new(),
            only_if: None,
            not_if: None,
            properties: BTreeMap::new(),
        }
    }

    /// Builder-style state setter.
    pub fn with_state(mut self, state: ResourceState) -> Self {
        self.state = Some(state);
        self
    }

    /// Builder-style property setter.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Builder-style dependency setter.
    pub fn with_dependency(mut self, id: impl Into<String>) -> Self {
        self.depends_on.push(id.into());
        self
    }

    /// The resource ID: `<type>.<name>`, unique within a module.
    pub fn id(&self) -> String {
        format!("{}.{}", self.resource_type, self.name)
    }

    /// Resolve the desired state.
    ///
    /// The dedicated `state` field is authoritative; a `"state"` key under
    /// the generic properties is accepted as a fallback. Declaring both with
    /// conflicting values is a validation error, caught by [`Self::validate`].
    pub fn desired_state(&self) -> Option<ResourceState> {
        if let Some(state) = self.state {
            return Some(state);
        }
        self.property_str("state")
            .and_then(|s| ResourceState::from_str(s).ok())
    }

    /// Get a property as a string slice.
    pub fn property_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(Value::as_str)
    }

    /// Get a property as a bool.
    pub fn property_bool(&self, key: &str) -> Option<bool> {
        self.properties.get(key).and_then(Value::as_bool)
    }

    /// Get a property as an i64.
    pub fn property_i64(&self, key: &str) -> Option<i64> {
        self.properties.get(key).and_then(Value::as_i64)
    }

    /// Get a property as a list of strings, accepting either a YAML list
    /// or a comma-separated scalar.
    pub fn property_str_list(&self, key: &str) -> Option<Vec<String>> {
        match self.properties.get(key)? {
            Value::Array(items) => Some(
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect(),
            ),
            Value::String(s) => Some(s.split(',').map(|p| p.trim().to_string()).collect()),
            _ => None,
        }
    }

    /// Structural validation: non-empty identifiers and a coherent state
    /// declaration.
    pub fn validate(&self) -> EngineResult<()> {
        if self.resource_type.trim().is_empty() {
            return Err(EngineError::Validation {
                resource_id: self.id(),
                message: "resource type must not be empty".to_string(),
            });
        }
        if self.name.trim().is_empty() {
            return Err(EngineError::Validation {
                resource_id: self.id(),
                message: "resource name must not be empty".to_string(),
            });
        }

        if let Some(raw) = self.property_str("state") {
            let parsed = ResourceState::from_str(raw).map_err(|e| EngineError::Validation {
                resource_id: self.id(),
                message: e,
            })?;
            if let Some(field_state) = self.state {
                if field_state != parsed {
                    return Err(EngineError::Validation {
                        resource_id: self.id(),
                        message: format!(
                            "conflicting state declarations: field says {field_state}, property says {parsed}"
                        ),
                    });
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_id() {
        let resource = Resource::new("pkg", "nginx");
        assert_eq!(resource.id(), "pkg.nginx");
    }

    #[test]
    fn test_validate_empty_name() {
        let resource = Resource::new("file", "");
        assert!(resource.validate().is_err());
    }

    #[test]
    fn test_validate_empty_type() {
        let resource = Resource::new("", "nginx");
        assert!(resource.validate().is_err());
    }

    #[test]
    fn test_desired_state_field_wins() {
        let resource = Resource::new("pkg", "git")
            .with_state(ResourceState::Present)
            .with_property("state", "present");
        assert_eq!(resource.desired_state(), Some(ResourceState::Present));
        assert!(resource.validate().is_ok());
    }

    #[test]
    fn test_conflicting_state_declarations_rejected() {
        let resource = Resource::new("pkg", "git")
            .with_state(ResourceState::Present)
            .with_property("state", "absent");
        let err = resource.validate().unwrap_err();
        assert!(err.to_string().contains("conflicting state"));
    }

    #[test]
    fn test_state_property_fallback() {
        let resource = Resource::new("pkg", "git").with_property("state", "latest");
        assert_eq!(resource.desired_state(), Some(ResourceState::Latest));
    }

    #[test]
    fn test_property_str_list_accepts_scalar_and_array() {
        let from_scalar = Resource::new("user", "web").with_property("groups", "adm, www-data");
        assert_eq!(
            from_scalar.property_str_list("groups"),
            Some(vec!["adm".to_string(), "www-data".to_string()])
        );

        let from_array = Resource::new("user", "web")
            .with_property("groups", serde_json::json!(["adm", "www-data"]));
        assert_eq!(
            from_array.property_str_list("groups"),
            Some(vec!["adm".to_string(), "www-data".to_string()])
        );
    }

    #[test]
    fn test_yaml_roundtrip_with_inline_properties() {
        let yaml = r#"
type: file
name: motd
state: present
path: /etc/motd
mode: "0644"
depends_on: ["user.web"]
"#;
        let resource: Resource = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(resource.id(), "file.motd");
        assert_eq!(resource.property_str("path"), Some("/etc/motd"));
        assert_eq!(resource.property_str("mode"), Some("0644"));
        assert_eq!(resource.depends_on, vec!["user.web".to_string()]);
    }
}
