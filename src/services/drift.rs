//! Drift detector.
//!
//! Re-reads a module's resources and reports divergence from the declared
//! state: a resource is drifting iff its diff action is not noop. Checks
//! run concurrently under a fleet-level semaphore with a per-resource
//! timeout.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, instrument};

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::{Config, DriftReport, DriftResult, Module, Resource};
use crate::providers::ProviderRegistry;
use crate::services::event_bus::{EngineEvent, EventBus};

/// Configuration for the drift detector.
#[derive(Debug, Clone)]
pub struct DriftConfig {
    /// Per-resource check timeout.
    pub check_timeout: Duration,
    /// Fleet-wide cap on concurrent resource checks.
    pub max_concurrent_checks: usize,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            check_timeout: Duration::from_secs(30),
            max_concurrent_checks: 8,
        }
    }
}

impl DriftConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            check_timeout: Duration::from_secs(config.drift.check_timeout_secs),
            max_concurrent_checks: config.drift.max_concurrent_checks.max(1),
        }
    }
}

pub struct DriftDetector {
    registry: Arc<ProviderRegistry>,
    config: DriftConfig,
    /// Shared across every module check so fleet-wide pressure stays
    /// bounded.
    semaphore: Arc<Semaphore>,
    event_bus: Option<Arc<EventBus>>,
}

impl DriftDetector {
    pub fn new(registry: Arc<ProviderRegistry>, config: DriftConfig) -> Self {
        let permits = config.max_concurrent_checks;
        Self {
            registry,
            config,
            semaphore: Arc::new(Semaphore::new(permits)),
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// One-shot drift check over every resource in the module.
    #[instrument(skip(self, module), fields(module = %module.name()))]
    pub async fn check_module(&self, module: &Module) -> EngineResult<DriftReport> {
        module.validate()?;
        let started = Instant::now();

        let mut tasks: JoinSet<DriftResult> = JoinSet::new();
        for resource in &module.spec.resources {
            let resource = resource.clone();
            let registry = Arc::clone(&self.registry);
            let semaphore = Arc::clone(&self.semaphore);
            let timeout = self.config.check_timeout;

            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return DriftResult::errored(
                        resource.id(),
                        "drift semaphore closed",
                        Duration::ZERO,
                    );
                };
                check_resource(&registry, &resource, timeout).await
            });
        }

        let mut results = Vec::with_capacity(module.spec.resources.len());
        while let Some(joined) = tasks.join_next().await {
            if let Ok(result) = joined {
                results.push(result);
            }
        }
        // Stable report order regardless of completion order.
        results.sort_by(|a, b| a.resource_id.cmp(&b.resource_id));

        let report = DriftReport::from_results(module.name(), results, started.elapsed());
        debug!(
            total = report.total_checked,
            drifted = report.drift_detected,
            errors = report.errors,
            "drift check finished"
        );

        if let Some(bus) = &self.event_bus {
            if report.has_drift() {
                bus.publish(&EngineEvent::DriftDetected {
                    module: module.name().to_string(),
                    drifted: report.drift_detected,
                    total: report.total_checked,
                })
                .await;
            }
        }

        Ok(report)
    }
}

async fn check_resource(
    registry: &ProviderRegistry,
    resource: &Resource,
    timeout: Duration,
) -> DriftResult {
    let started = Instant::now();
    let resource_id = resource.id();

    let outcome = tokio::time::timeout(timeout, async {
        let provider = registry.get(&resource.resource_type)?;
        let current = provider.read(resource).await?;
        provider.diff(resource, &current)
    })
    .await
    .map_err(|_| EngineError::Timeout(timeout))
    .and_then(|inner| inner);

    match outcome {
        Ok(diff) if diff.is_noop() => DriftResult::clean(resource_id, started.elapsed()),
        Ok(diff) => DriftResult::drifted(resource_id, diff, started.elapsed()),
        Err(e) => DriftResult::errored(resource_id, e.to_string(), started.elapsed()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::Value;

    use crate::domain::models::{Action, ResourceDiff};
    use crate::domain::ports::{ObservedState, Provider};

    /// Provider whose diff result depends on the resource name.
    struct SplitProvider;

    #[async_trait]
    impl Provider for SplitProvider {
        fn type_name(&self) -> &'static str {
            "probe"
        }

        fn validate(&self, _resource: &Resource) -> EngineResult<()> {
            Ok(())
        }

        async fn read(&self, resource: &Resource) -> EngineResult<ObservedState> {
            if resource.name == "slow" {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            if resource.name == "broken" {
                return Err(EngineError::Read {
                    resource_id: resource.id(),
                    message: "unreachable".to_string(),
                });
            }
            let mut state = ObservedState::new();
            state.insert("state".to_string(), Value::String("present".to_string()));
            Ok(state)
        }

        fn diff(&self, resource: &Resource, _current: &ObservedState) -> EngineResult<ResourceDiff> {
            if resource.name == "drifted" {
                Ok(ResourceDiff::new(resource.id(), Action::Update)
                    .with_change("content", "old", "new"))
            } else {
                Ok(ResourceDiff::noop(resource.id()))
            }
        }

        async fn apply(&self, _resource: &Resource, _diff: &ResourceDiff) -> EngineResult<()> {
            Ok(())
        }
    }

    fn detector(timeout: Duration) -> DriftDetector {
        let registry = ProviderRegistry::new();
        registry.register(Arc::new(SplitProvider)).unwrap();
        DriftDetector::new(
            Arc::new(registry),
            DriftConfig {
                check_timeout: timeout,
                max_concurrent_checks: 4,
            },
        )
    }

    #[tokio::test]
    async fn test_drift_counts() {
        let module = Module::new("m", "1.0.0")
            .with_resource(Resource::new("probe", "steady"))
            .with_resource(Resource::new("probe", "drifted"));

        let report = detector(Duration::from_secs(5))
            .check_module(&module)
            .await
            .unwrap();
        assert_eq!(report.total_checked, 2);
        assert_eq!(report.drift_detected, 1);
        assert_eq!(report.errors, 0);
    }

    #[tokio::test]
    async fn test_read_error_counts_as_error_not_drift() {
        let module = Module::new("m", "1.0.0")
            .with_resource(Resource::new("probe", "broken"))
            .with_resource(Resource::new("probe", "steady"));

        let report = detector(Duration::from_secs(5))
            .check_module(&module)
            .await
            .unwrap();
        assert_eq!(report.errors, 1);
        assert_eq!(report.drift_detected, 0);
    }

    #[tokio::test]
    async fn test_slow_resource_times_out() {
        let module = Module::new("m", "1.0.0").with_resource(Resource::new("probe", "slow"));

        let report = detector(Duration::from_millis(50))
            .check_module(&module)
            .await
            .unwrap();
        assert_eq!(report.errors, 1);
        assert!(report.results[0]
            .error
            .as_deref()
            .unwrap()
            .contains("timed out"));
    }
}
