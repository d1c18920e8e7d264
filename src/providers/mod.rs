//! Built-in resource providers and the kind registry.

pub mod file;
pub mod kubernetes;
pub mod pkg;
pub mod registry;
pub mod service;
pub mod shell;
pub mod user;

use std::sync::Arc;

use crate::domain::errors::EngineResult;
use crate::domain::ports::{ClusterClient, CommandExecutor};

pub use file::FileProvider;
pub use kubernetes::KubernetesProvider;
pub use pkg::PkgProvider;
pub use registry::ProviderRegistry;
pub use service::ServiceProvider;
pub use shell::ShellProvider;
pub use user::UserProvider;

/// Build a registry with every executor-backed built-in registered.
///
/// The kubernetes provider is registered separately when a cluster client
/// is configured; see [`register_kubernetes`].
pub fn builtin_registry(executor: Arc<dyn CommandExecutor>) -> EngineResult<ProviderRegistry> {
    let registry = ProviderRegistry::new();
    registry.register(Arc::new(FileProvider::new(executor.clone())))?;
    registry.register(Arc::new(PkgProvider::new(executor.clone())))?;
    registry.register(Arc::new(ServiceProvider::new(executor.clone())))?;
    registry.register(Arc::new(UserProvider::new(executor.clone())))?;
    registry.register(Arc::new(ShellProvider::new(executor)))?;
    Ok(registry)
}

/// Register the kubernetes provider against a cluster client.
pub fn register_kubernetes(
    registry: &ProviderRegistry,
    client: Arc<dyn ClusterClient>,
) -> EngineResult<()> {
    registry.register(Arc::new(KubernetesProvider::new(client)))
}
