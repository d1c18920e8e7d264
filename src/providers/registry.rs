//! Provider registry: kind → provider dispatch table.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::ports::Provider;

/// Registry mapping resource kinds to their providers.
///
/// Reads proceed concurrently; registration is exclusive. Lookups hand out
/// cloned `Arc`s so callers never hold the lock across provider calls.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: RwLock<HashMap<String, Arc<dyn Provider>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under its kind. Fails if the kind is empty or
    /// already registered.
    pub fn register(&self, provider: Arc<dyn Provider>) -> EngineResult<()> {
        let kind = provider.type_name().to_string();
        if kind.trim().is_empty() {
            return Err(EngineError::Config(
                "provider kind must not be empty".to_string(),
            ));
        }

        let mut providers = self
            .providers
            .write()
            .map_err(|_| EngineError::Executor("provider registry lock poisoned".to_string()))?;
        if providers.contains_key(&kind) {
            return Err(EngineError::Config(format!(
                "provider already registered for kind: {kind}"
            )));
        }
        providers.insert(kind, provider);
        Ok(())
    }

    /// Look up the provider for a kind.
    pub fn get(&self, kind: &str) -> EngineResult<Arc<dyn Provider>> {
        let providers = self
            .providers
            .read()
            .map_err(|_| EngineError::Executor("provider registry lock poisoned".to_string()))?;
        providers
            .get(kind)
            .cloned()
            .ok_or_else(|| EngineError::UnknownResourceType(kind.to_string()))
    }

    /// Registered kinds, sorted for stable output.
    pub fn kinds(&self) -> Vec<String> {
        let providers = match self.providers.read() {
            Ok(guard) => guard,
            Err(_) => return Vec::new(),
        };
        let mut kinds: Vec<String> = providers.keys().cloned().collect();
        kinds.sort();
        kinds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::domain::models::{Resource, ResourceDiff};
    use crate::domain::ports::ObservedState;

    struct StubProvider(&'static str);

    #[async_trait]
    impl Provider for StubProvider {
        fn type_name(&self) -> &'static str {
            self.0
        }

        fn validate(&self, _resource: &Resource) -> EngineResult<()> {
            Ok(())
        }

        async fn read(&self, _resource: &Resource) -> EngineResult<ObservedState> {
            Ok(ObservedState::new())
        }

        fn diff(
            &self,
            resource: &Resource,
            _current: &ObservedState,
        ) -> EngineResult<ResourceDiff> {
            Ok(ResourceDiff::noop(resource.id()))
        }

        async fn apply(&self, _resource: &Resource, _diff: &ResourceDiff) -> EngineResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = ProviderRegistry::new();
        registry.register(Arc::new(StubProvider("pkg"))).unwrap();

        assert!(registry.get("pkg").is_ok());
        assert!(matches!(
            registry.get("missing"),
            Err(EngineError::UnknownResourceType(_))
        ));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let registry = ProviderRegistry::new();
        registry.register(Arc::new(StubProvider("pkg"))).unwrap();
        assert!(registry.register(Arc::new(StubProvider("pkg"))).is_err());
    }

    #[test]
    fn test_empty_kind_rejected() {
        let registry = ProviderRegistry::new();
        assert!(registry.register(Arc::new(StubProvider(""))).is_err());
    }

    #[test]
    fn test_kinds_sorted() {
        let registry = ProviderRegistry::new();
        registry.register(Arc::new(StubProvider("service"))).unwrap();
        registry.register(Arc::new(StubProvider("file"))).unwrap();
        assert_eq!(registry.kinds(), vec!["file", "service"]);
    }
}
