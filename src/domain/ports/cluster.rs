//! ClusterClient port - the Kubernetes API surface the kubernetes provider
//! consumes.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::errors::EngineResult;

/// The enumerated set of Kubernetes kinds the engine manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClusterKind {
    Deployment,
    Service,
    ConfigMap,
    Secret,
    Namespace,
    Pod,
}

impl ClusterKind {
    pub const ALL: [ClusterKind; 6] = [
        Self::Deployment,
        Self::Service,
        Self::ConfigMap,
        Self::Secret,
        Self::Namespace,
        Self::Pod,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deployment => "Deployment",
            Self::Service => "Service",
            Self::ConfigMap => "ConfigMap",
            Self::Secret => "Secret",
            Self::Namespace => "Namespace",
            Self::Pod => "Pod",
        }
    }
}

impl fmt::Display for ClusterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClusterKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| format!("unsupported kubernetes kind: {s}"))
    }
}

/// Namespaced CRUD over cluster objects, manifests as JSON values.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Fetch an object, or `None` when absent.
    async fn get(
        &self,
        kind: ClusterKind,
        namespace: &str,
        name: &str,
    ) -> EngineResult<Option<Value>>;

    /// Create or update an object from a manifest.
    async fn apply(
        &self,
        kind: ClusterKind,
        namespace: &str,
        name: &str,
        manifest: &Value,
    ) -> EngineResult<()>;

    /// Delete an object. Deleting an absent object is not an error.
    async fn delete(&self, kind: ClusterKind, namespace: &str, name: &str) -> EngineResult<()>;
}
