//! Package resource provider.
//!
//! Probes the target for a known package manager (first probe that
//! succeeds wins) and drives install/remove/upgrade through it.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::{Action, Resource, ResourceDiff, ResourceState};
use crate::domain::ports::{absent_state, is_absent, CommandExecutor, ObservedState, Provider};
use crate::providers::file::shell_quote;

/// Command templates for one package manager. `{pkg}` is substituted with
/// the quoted package name.
#[derive(Debug, Clone)]
struct PackageManager {
    name: &'static str,
    probe: &'static str,
    query: &'static str,
    install: &'static str,
    remove: &'static str,
    upgrade: &'static str,
}

/// Probe order matters: the first manager present on the target wins.
const MANAGERS: &[PackageManager] = &[
    PackageManager {
        name: "apt",
        probe: "command -v apt-get",
        query: "dpkg-query -W -f='${Status}' {pkg} 2>/dev/null | grep -q 'install ok installed'",
        install: "DEBIAN_FRONTEND=noninteractive apt-get install -y {pkg}",
        remove: "DEBIAN_FRONTEND=noninteractive apt-get remove -y {pkg}",
        upgrade: "DEBIAN_FRONTEND=noninteractive apt-get install --only-upgrade -y {pkg}",
    },
    PackageManager {
        name: "dnf",
        probe: "command -v dnf",
        query: "rpm -q {pkg}",
        install: "dnf install -y {pkg}",
        remove: "dnf remove -y {pkg}",
        upgrade: "dnf upgrade -y {pkg}",
    },
    PackageManager {
        name: "yum",
        probe: "command -v yum",
        query: "rpm -q {pkg}",
        install: "yum install -y {pkg}",
        remove: "yum remove -y {pkg}",
        upgrade: "yum update -y {pkg}",
    },
    PackageManager {
        name: "apk",
        probe: "command -v apk",
        query: "apk info -e {pkg}",
        install: "apk add {pkg}",
        remove: "apk del {pkg}",
        upgrade: "apk add --upgrade {pkg}",
    },
    PackageManager {
        name: "pacman",
        probe: "command -v pacman",
        query: "pacman -Qi {pkg}",
        install: "pacman -S --noconfirm {pkg}",
        remove: "pacman -R --noconfirm {pkg}",
        upgrade: "pacman -S --noconfirm {pkg}",
    },
];

pub struct PkgProvider {
    executor: Arc<dyn CommandExecutor>,
    detected: OnceCell<&'static PackageManager>,
}

impl PkgProvider {
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            executor,
            detected: OnceCell::new(),
        }
    }

    fn package_name(resource: &Resource) -> String {
        resource
            .property_str("package")
            .map(String::from)
            .unwrap_or_else(|| resource.name.clone())
    }

    /// Detect the target's package manager; cached after the first probe.
    async fn manager(&self) -> EngineResult<&'static PackageManager> {
        self.detected
            .get_or_try_init(|| async {
                for manager in MANAGERS {
                    let out = self.executor.run(manager.probe).await?;
                    if out.success() {
                        debug!(manager = manager.name, "detected package manager");
                        return Ok(manager);
                    }
                }
                Err(EngineError::Executor(
                    "no supported package manager found on target".to_string(),
                ))
            })
            .await
            .copied()
    }

    async fn run_manager_command(
        &self,
        resource: &Resource,
        template: &str,
    ) -> EngineResult<()> {
        let command = template.replace("{pkg}", &shell_quote(&Self::package_name(resource)));
        let out = self
            .executor
            .run(&command)
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
impl Provider for PkgProvider {
    fn type_name(&self) -> &'static str {
        "pkg"
    }

    fn validate(&self, resource: &Resource) -> EngineResult<()> {
        match resource.desired_state() {
            None
            | Some(ResourceState::Present | ResourceState::Absent | ResourceState::Latest) => {
                Ok(())
            }
            Some(other) => Err(EngineError::Validation {
                resource_id: resource.id(),
                message: format!("state {other} is not valid for pkg resources"),
            }),
        }
    }

    async fn read(&self, resource: &Resource) -> EngineResult<ObservedState> {
        let manager = self.manager().await.map_err(|e| EngineError::Read {
            resource_id: resource.id(),
            message: e.to_string(),
        })?;
        let query = manager
            .query
            .replace("{pkg}", &shell_quote(&Self::package_name(resource)));
        let out = self
            .executor
            .run(&query)
            .await
            .map_err(|e| EngineError::Read {
                resource_id: resource.id(),
                message: e.to_string(),
            })?;

        if out.success() {
            let mut state = ObservedState::new();
            state.insert(
                "state".to_string(),
                serde_json::Value::String("present".to_string()),
            );
            Ok(state)
        } else {
            Ok(absent_state())
        }
    }

    fn diff(&self, resource: &Resource, current: &ObservedState) -> EngineResult<ResourceDiff> {
        let id = resource.id();
        let installed = !is_absent(current);
        let desired = resource.desired_state().unwrap_or(ResourceState::Present);

        let diff = match (desired, installed) {
            (ResourceState::Absent, false) => ResourceDiff::noop(id),
            (ResourceState::Absent, true) => ResourceDiff::new(id, Action::Delete)
                .with_change("state", "present", "absent")
                .with_reason("package installed but declared absent"),
            (ResourceState::Present, true) => ResourceDiff::noop(id),
            (ResourceState::Present | ResourceState::Latest, false) => {
                ResourceDiff::new(id, Action::Create)
                    .with_change("state", "absent", "present")
                    .with_reason("package not installed")
            }
            (ResourceState::Latest, true) => ResourceDiff::new(id, Action::Update)
                .with_change("state", "present", "latest")
                .with_reason("upgrade to latest available version"),
            (other, _) => {
                return Err(EngineError::Diff {
                    resource_id: resource.id(),
                    message: format!("state {other} is not valid for pkg resources"),
                })
            }
        };
        Ok(diff)
    }

    async fn apply(&self, resource: &Resource, diff: &ResourceDiff) -> EngineResult<()> {
        let manager = self.manager().await.map_err(|e| EngineError::Apply {
            resource_id: resource.id(),
            message: e.to_string(),
        })?;
        match diff.action {
            Action::Noop => Ok(()),
            Action::Create => self.run_manager_command(resource, manager.install).await,
            Action::Update => self.run_manager_command(resource, manager.upgrade).await,
            Action::Delete => self.run_manager_command(resource, manager.remove).await,
        }
    }
}
