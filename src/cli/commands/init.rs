//! `anvil init`: scaffold a project layout.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::info;

const CONFIG_TEMPLATE: &str = r#"# anvil engine configuration
executor:
  max_concurrency: 10
  resource_timeout_secs: 1800
rollback:
  enabled: false
drift:
  default_interval_secs: 300
audit:
  path: .anvil/audit.log
"#;

const MODULE_TEMPLATE: &str = r#"apiVersion: "anvil.dev/anvil/v1"
kind: Module
metadata:
  name: example
  version: 0.1.0
  description: Example module managing a package and its service
spec:
  resources:
    - type: pkg
      name: nginx
      state: present
    - type: service
      name: nginx
      state: running
      enabled: true
      depends_on: ["pkg.nginx"]
"#;

const INVENTORY_TEMPLATE: &str = r#"apiVersion: "anvil.dev/anvil/v1"
kind: Inventory
targets:
  local:
    hosts: ["localhost"]
"#;

pub async fn handle_init(name: Option<String>, force: bool) -> Result<i32> {
    let root = match name {
        Some(name) => PathBuf::from(name),
        None => PathBuf::from("."),
    };

    write_scaffold(&root.join(".anvil/config.yaml"), CONFIG_TEMPLATE, force).await?;
    write_scaffold(&root.join("modules/example.yaml"), MODULE_TEMPLATE, force).await?;
    write_scaffold(&root.join("inventory.yaml"), INVENTORY_TEMPLATE, force).await?;

    info!(root = %root.display(), "project initialized");
    println!("Initialized anvil project in {}", root.display());
    Ok(0)
}

async fn write_scaffold(path: &Path, contents: &str, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    tokio::fs::write(path, contents)
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
