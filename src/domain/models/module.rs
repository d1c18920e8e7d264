//! Module domain model: a named, versioned group of resources.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::resource::Resource;

/// The schema version every module file must declare.
pub const API_VERSION: &str = "anvil.dev/anvil/v1";
/// Expected `kind` for module documents.
pub const KIND_MODULE: &str = "Module";

/// Module metadata block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleMetadata {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// Module spec block: the ordered resource list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModuleSpec {
    #[serde(default)]
    pub resources: Vec<Resource>,
}

/// A declarative module: apiVersion + kind envelope, metadata, and the
/// desired resources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Module {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    pub metadata: ModuleMetadata,
    pub spec: ModuleSpec,
}

impl Module {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND_MODULE.to_string(),
            metadata: ModuleMetadata {
                name: name.into(),
                version: version.into(),
                description: None,
                labels: BTreeMap::new(),
            },
            spec: ModuleSpec::default(),
        }
    }

    /// Builder-style resource append.
    pub fn with_resource(mut self, resource: Resource) -> Self {
        self.spec.resources.push(resource);
        self
    }

    /// Builder-style label setter.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.labels.insert(key.into(), value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Look up a resource by its ID.
    pub fn resource(&self, id: &str) -> Option<&Resource> {
        self.spec.resources.iter().find(|r| r.id() == id)
    }

    /// Validate the envelope, metadata, and every resource.
    ///
    /// Checks: apiVersion and kind match the engine's expected values, the
    /// version is semver, the name is non-empty, resource IDs are unique,
    /// and every `depends_on` target is declared in this module.
    pub fn validate(&self) -> EngineResult<()> {
        if self.api_version != API_VERSION {
            return Err(EngineError::InvalidModule(format!(
                "unsupported apiVersion {:?}, expected {API_VERSION:?}",
                self.api_version
            )));
        }
        if self.kind != KIND_MODULE {
            return Err(EngineError::InvalidModule(format!(
                "unsupported kind {:?}, expected {KIND_MODULE:?}",
                self.kind
            )));
        }
        if self.metadata.name.trim().is_empty() {
            return Err(EngineError::InvalidModule(
                "metadata.name must not be empty".to_string(),
            ));
        }
        semver::Version::parse(&self.metadata.version).map_err(|e| {
            EngineError::InvalidModule(format!(
                "metadata.version {:?} is not valid semver: {e}",
                self.metadata.version
            ))
        })?;

        let mut seen: HashSet<String> = HashSet::new();
        for resource in &self.spec.resources {
            resource.validate()?;
            if !seen.insert(resource.id()) {
                return Err(EngineError::InvalidModule(format!(
                    "duplicate resource ID: {}",
                    resource.id()
                )));
            }
        }

        for resource in &self.spec.resources {
            for dep in &resource.depends_on {
                if !seen.contains(dep) {
                    return Err(EngineError::UnknownDependency {
                        resource_id: resource.id(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        Ok(())
    }
}
