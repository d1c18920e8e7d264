//! InventoryDiscovery port - how cloud discovery collaborators resolve a
//! selector into concrete hosts.

use async_trait::async_trait;

use crate::domain::errors::EngineResult;

/// Resolves a `k=v,k=v` selector into hostnames.
#[async_trait]
pub trait InventoryDiscovery: Send + Sync {
    /// Discovery source name, for logging.
    fn source(&self) -> &'static str;

    async fn discover(&self, selector: &str) -> EngineResult<Vec<String>>;
}
