//! Kubernetes resource provider.
//!
//! Namespaced CRUD over an enumerated set of kinds, driven entirely
//! through the [`ClusterClient`] port; the provider never talks to the API
//! server directly.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::{Action, Resource, ResourceDiff, ResourceState};
use crate::domain::ports::{absent_state, is_absent, ClusterClient, ClusterKind, ObservedState, Provider};

const DEFAULT_NAMESPACE: &str = "default";

pub struct KubernetesProvider {
    client: Arc<dyn ClusterClient>,
}

impl KubernetesProvider {
    pub fn new(client: Arc<dyn ClusterClient>) -> Self {
        Self { client }
    }

    fn kind_of(resource: &Resource) -> EngineResult<ClusterKind> {
        let raw = resource
            .property_str("kind")
            .ok_or_else(|| EngineError::Validation {
                resource_id: resource.id(),
                message: "kubernetes resource requires a kind property".to_string(),
            })?;
        ClusterKind::from_str(raw).map_err(|message| EngineError::Validation {
            resource_id: resource.id(),
            message,
        })
    }

    fn namespace_of(resource: &Resource) -> String {
        resource
            .property_str("namespace")
            .unwrap_or(DEFAULT_NAMESPACE)
            .to_string()
    }
}

/// True when every field declared in `desired` matches `current`,
/// recursing into nested mappings. Fields present only in `current` are
/// not compared.
fn manifest_subset_matches(desired: &Value, current: &Value) -> bool {
    match (desired, current) {
        (Value::Object(want), Value::Object(have)) => want.iter().all(|(key, want_value)| {
            have.get(key)
                .map(|have_value| manifest_subset_matches(want_value, have_value))
                .unwrap_or(false)
        }),
        (want, have) => want == have,
    }
}

#[async_trait]
impl Provider for KubernetesProvider {
    fn type_name(&self) -> &'static str {
        "kubernetes"
    }

    fn validate(&self, resource: &Resource) -> EngineResult<()> {
        Self::kind_of(resource)?;
        match resource.desired_state() {
            None | Some(ResourceState::Present | ResourceState::Absent) => {}
            Some(other) => {
                return Err(EngineError::Validation {
                    resource_id: resource.id(),
                    message: format!("state {other} is not valid for kubernetes resources"),
                })
            }
        }
        let wants_absent = resource.desired_state() == Some(ResourceState::Absent);
        if !wants_absent && !resource.properties.contains_key("manifest") {
            return Err(EngineError::Validation {
                resource_id: resource.id(),
                message: "kubernetes resource requires a manifest unless declared absent"
                    .to_string(),
            });
        }
        Ok(())
    }

    async fn read(&self, resource: &Resource) -> EngineResult<ObservedState> {
        let kind = Self::kind_of(resource)?;
        let namespace = Self::namespace_of(resource);
        let object = self
            .client
            .get(kind, &namespace, &resource.name)
            .await
            .map_err(|e| EngineError::Read {
                resource_id: resource.id(),
                message: e.to_string(),
            })?;

        match object {
            None => Ok(absent_state()),
            Some(manifest) => {
                let mut state = ObservedState::new();
                state.insert("state".to_string(), Value::String("present".to_string()));
                state.insert("manifest".to_string(), manifest);
                Ok(state)
            }
        }
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
                .with_reason("object exists but is declared absent"));
        }

        let desired_manifest = resource
            .properties
            .get("manifest")
            .cloned()
            .unwrap_or(Value::Null);

        if currently_absent {
            return Ok(ResourceDiff::new(id, Action::Create)
                .with_change("state", "absent", "present")
                .with_change("manifest", Value::Null, desired_manifest)
                .with_reason("object does not exist"));
        }

        let current_manifest = current.get("manifest").cloned().unwrap_or(Value::Null);
        if manifest_subset_matches(&desired_manifest, &current_manifest) {
            return Ok(ResourceDiff::noop(id));
        }
        Ok(ResourceDiff::new(id, Action::Update)
            .with_change("manifest", current_manifest, desired_manifest)
            .with_reason("declared manifest fields diverge"))
    }

    async fn apply(&self, resource: &Resource, diff: &ResourceDiff) -> EngineResult<()> {
        let kind = Self::kind_of(resource)?;
        let namespace = Self::namespace_of(resource);
        match diff.action {
            Action::Noop => Ok(()),
            Action::Delete => self
                .client
                .delete(kind, &namespace, &resource.name)
                .await
                .map_err(|e| EngineError::Apply {
                    resource_id: resource.id(),
                    message: e.to_string(),
                }),
            Action::Create | Action::Update => {
                let manifest = resource
                    .properties
                    .get("manifest")
                    .ok_or_else(|| EngineError::Apply {
                        resource_id: resource.id(),
                        message: "manifest property missing at apply time".to_string(),
                    })?;
                self.client
                    .apply(kind, &namespace, &resource.name, manifest)
                    .await
                    .map_err(|e| EngineError::Apply {
                        resource_id: resource.id(),
                        message: e.to_string(),
                    })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    /// In-memory cluster for tests.
    #[derive(Default)]
    struct FakeCluster {
        objects: Mutex<HashMap<(ClusterKind, String, String), Value>>,
    }

    #[async_trait]
    impl ClusterClient for FakeCluster {
        async fn get(
            &self,
            kind: ClusterKind,
            namespace: &str,
            name: &str,
        ) -> EngineResult<Option<Value>> {
            let objects = self.objects.lock().await;
            Ok(objects
                .get(&(kind, namespace.to_string(), name.to_string()))
                .cloned())
        }

        async fn apply(
            &self,
            kind: ClusterKind,
            namespace: &str,
            name: &str,
            manifest: &Value,
        ) -> EngineResult<()> {
            let mut objects = self.objects.lock().await;
            objects.insert(
                (kind, namespace.to_string(), name.to_string()),
                manifest.clone(),
            );
            Ok(())
        }

        async fn delete(
            &self,
            kind: ClusterKind,
            namespace: &str,
            name: &str,
        ) -> EngineResult<()> {
            let mut objects = self.objects.lock().await;
            objects.remove(&(kind, namespace.to_string(), name.to_string()));
            Ok(())
        }
    }

    fn deployment(replicas: u32) -> Resource {
        Resource::new("kubernetes", "web")
            .with_property("kind", "Deployment")
            .with_property("namespace", "apps")
            .with_property(
                "manifest",
                serde_json::json!({"spec": {"replicas": replicas}}),
            )
    }

    #[test]
    fn test_validate_unknown_kind() {
        let provider = KubernetesProvider::new(Arc::new(FakeCluster::default()));
        let resource = Resource::new("kubernetes", "x").with_property("kind", "CronJob");
        assert!(provider.validate(&resource).is_err());
    }

    #[test]
    fn test_manifest_subset_semantics() {
        let want = serde_json::json!({"spec": {"replicas": 2}});
        let have = serde_json::json!({"spec": {"replicas": 2, "paused": false}, "status": {}});
        assert!(manifest_subset_matches(&want, &have));

        let have_drifted = serde_json::json!({"spec": {"replicas": 3}});
        assert!(!manifest_subset_matches(&want, &have_drifted));
    }

    #[tokio::test]
    async fn test_full_crud_cycle() {
        let cluster = Arc::new(FakeCluster::default());
        let provider = KubernetesProvider::new(cluster);
        let resource = deployment(2);

        // Absent: plan a create and apply it.
        let current = provider.read(&resource).await.unwrap();
        let diff = provider.diff(&resource, &current).unwrap();
        assert_eq!(diff.action, Action::Create);
        provider.apply(&resource, &diff).await.unwrap();

        // Converged: a second diff is a noop.
        let current = provider.read(&resource).await.unwrap();
        assert!(provider.diff(&resource, &current).unwrap().is_noop());

        // Scale: declared manifest diverges, update follows.
        let scaled = deployment(5);
        let current = provider.read(&scaled).await.unwrap();
        let diff = provider.diff(&scaled, &current).unwrap();
        assert_eq!(diff.action, Action::Update);
        provider.apply(&scaled, &diff).await.unwrap();

        // Delete.
        let absent = deployment(5).with_state(ResourceState::Absent);
        let current = provider.read(&absent).await.unwrap();
        let diff = provider.diff(&absent, &current).unwrap();
        assert_eq!(diff.action, Action::Delete);
        provider.apply(&absent, &diff).await.unwrap();
        let current = provider.read(&absent).await.unwrap();
        assert!(provider.diff(&absent, &current).unwrap().is_noop());
    }
}
