//! Inventory domain model: target groups and connection settings.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::module::API_VERSION;

/// Expected `kind` for inventory documents.
pub const KIND_INVENTORY: &str = "Inventory";

/// Connection settings for reaching hosts in a group.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// A named group of targets: either a static host list or a discovery
/// selector, never both.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetGroup {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hosts: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<ConnectionConfig>,
}

/// Inventory document: apiVersion + kind envelope plus target groups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Inventory {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub targets: BTreeMap<String, TargetGroup>,
}

impl Inventory {
    /// Validate the envelope and the exactly-one-of hosts/selector rule.
    pub fn validate(&self) -> EngineResult<()> {
        if self.api_version != API_VERSION {
            return Err(EngineError::Config(format!(
                "unsupported inventory apiVersion {:?}, expected {API_VERSION:?}",
                self.api_version
            )));
        }
        if self.kind != KIND_INVENTORY {
            return Err(EngineError::Config(format!(
                "unsupported inventory kind {:?}, expected {KIND_INVENTORY:?}",
                self.kind
            )));
        }
        for (group, target) in &self.targets {
            match (&target.hosts, &target.selector) {
                (Some(_), Some(_)) => {
                    return Err(EngineError::Config(format!(
                        "target group {group:?} declares both hosts and selector"
                    )));
                }
                (None, None) => {
                    return Err(EngineError::Config(format!(
                        "target group {group:?} declares neither hosts nor selector"
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }
}
