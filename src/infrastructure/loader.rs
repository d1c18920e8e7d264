//! Module and inventory file loading, plus target-group resolution.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context, Result};

use crate::domain::models::{Inventory, Module};
use crate::domain::ports::InventoryDiscovery;

/// Load and validate a module document from a YAML file.
pub async fn load_module(path: impl AsRef<Path>) -> Result<Module> {
    let path = path.as_ref();
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read module file {}", path.display()))?;
    let module: Module = serde_yaml::from_str(&contents)
        .with_context(|| format!("failed to parse module file {}", path.display()))?;
    module
        .validate()
        .with_context(|| format!("invalid module in {}", path.display()))?;
    Ok(module)
}

/// Load and validate an inventory document from a YAML file.
pub async fn load_inventory(path: impl AsRef<Path>) -> Result<Inventory> {
    let path = path.as_ref();
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read inventory file {}", path.display()))?;
    let inventory: Inventory = serde_yaml::from_str(&contents)
        .with_context(|| format!("failed to parse inventory file {}", path.display()))?;
    inventory
        .validate()
        .with_context(|| format!("invalid inventory in {}", path.display()))?;
    Ok(inventory)
}

/// Resolve every target group to concrete hostnames. Static `hosts`
/// lists pass through; `selector` groups go through the discovery
/// collaborator, which must be supplied when any group uses one.
pub async fn resolve_targets(
    inventory: &Inventory,
    discovery: Option<&dyn InventoryDiscovery>,
) -> Result<BTreeMap<String, Vec<String>>> {
    let mut resolved = BTreeMap::new();
    for (group, target) in &inventory.targets {
        let hosts = match (&target.hosts, &target.selector) {
            (Some(hosts), None) => hosts.clone(),
            (None, Some(selector)) => {
                let Some(discovery) = discovery else {
                    bail!("target group {group:?} uses a selector but no discovery source is configured");
                };
                discovery
                    .discover(selector)
                    .await
                    .with_context(|| format!("discovery failed for target group {group:?}"))?
            }
            _ => bail!("target group {group:?} must declare exactly one of hosts or selector"),
        };
        resolved.insert(group.clone(), hosts);
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::domain::errors::EngineResult;
    use crate::domain::models::{ConnectionConfig, TargetGroup};
    use crate::domain::models::module::API_VERSION;
    use crate::domain::models::inventory::KIND_INVENTORY;

    struct StaticDiscovery;

    #[async_trait]
    impl InventoryDiscovery for StaticDiscovery {
        fn source(&self) -> &'static str {
            "static"
        }

        async fn discover(&self, selector: &str) -> EngineResult<Vec<String>> {
            Ok(vec![format!("discovered-for-{selector}")])
        }
    }

    fn inventory() -> Inventory {
        let mut targets = BTreeMap::new();
        targets.insert(
            "web".to_string(),
            TargetGroup {
                hosts: Some(vec!["web-1".to_string()]),
                selector: None,
                connection: Some(ConnectionConfig::default()),
            },
        );
        targets.insert(
            "db".to_string(),
            TargetGroup {
                hosts: None,
                selector: Some("role=db".to_string()),
                connection: None,
            },
        );
        Inventory {
            api_version: API_VERSION.to_string(),
            kind: KIND_INVENTORY.to_string(),
            targets,
        }
    }

    #[tokio::test]
    async fn test_resolve_targets_mixes_static_and_discovered() {
        let resolved = resolve_targets(&inventory(), Some(&StaticDiscovery))
            .await
            .unwrap();
        assert_eq!(resolved["web"], vec!["web-1".to_string()]);
        assert_eq!(resolved["db"], vec!["discovered-for-role=db".to_string()]);
    }

    #[tokio::test]
    async fn test_selector_without_discovery_fails() {
        let err = resolve_targets(&inventory(), None).await.unwrap_err();
        assert!(err.to_string().contains("db"));
    }

    #[tokio::test]
    async fn test_load_module_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("module.yaml");
        tokio::fs::write(
            &path,
            r#"
apiVersion: "anvil.dev/anvil/v1"
kind: Module
metadata:
  name: demo
  version: 0.1.0
spec:
  resources:
    - type: pkg
      name: git
      state: present
"#,
        )
        .await
        .unwrap();

        let module = load_module(&path).await.unwrap();
        assert_eq!(module.name(), "demo");
        assert_eq!(module.spec.resources.len(), 1);
    }

    #[tokio::test]
    async fn test_load_module_invalid_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.yaml");
        tokio::fs::write(
            &path,
            "apiVersion: wrong/v9\nkind: Module\nmetadata:\n  name: x\n  version: 1.0.0\nspec:\n  resources: []\n",
        )
        .await
        .unwrap();
        assert!(load_module(&path).await.is_err());
    }

    #[tokio::test]
    async fn test_missing_file_fails_with_context() {
        let err = load_module("/nonexistent/module.yaml").await.unwrap_err();
        assert!(err.to_string().contains("module.yaml"));
    }
}
