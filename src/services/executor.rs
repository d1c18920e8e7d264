//! Dependency-aware batch executor.
//!
//! Partitions a plan into topological batches and applies each batch's
//! resources concurrently under a semaphore. Batches run strictly
//! sequentially; a failed batch is fully drained, then execution halts
//! before any later batch. With rollback enabled, prior states are
//! snapshotted up front and successfully changed resources are reverted on
//! failure.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::{
    Batch, Change, Config, ExecutionPlan, ExecutionResult, ExecutionSummary, Module, Plan,
    Resource, RollbackOutcome,
};
use crate::domain::ports::{CommandExecutor, ObservedState};
use crate::providers::ProviderRegistry;
use crate::services::event_bus::{EngineEvent, EventBus};
use crate::services::graph::DependencyGraph;
use crate::services::recovery::RecoveryDispatcher;
use crate::services::rollback::RollbackManager;

/// Configuration for the batch executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum resources applied concurrently within a batch.
    pub max_concurrency: usize,
    /// Per-resource apply timeout.
    pub resource_timeout: Duration,
    /// Extra attempts for applies failing with a transient classification.
    pub transient_retries: u32,
    /// Delay between transient retries.
    pub transient_retry_delay: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 10,
            resource_timeout: Duration::from_secs(30 * 60),
            transient_retries: 1,
            transient_retry_delay: Duration::from_secs(2),
        }
    }
}

impl ExecutorConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_concurrency: config.executor.max_concurrency.max(1),
            resource_timeout: config.executor.resource_timeout(),
            ..Self::default()
        }
    }
}

/// Everything the caller learns from an execution: per-resource results,
/// aggregate summary, and the rollback outcome when one ran. Partial
/// results are always present alongside a failure.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub module: String,
    pub summary: ExecutionSummary,
    pub results: Vec<ExecutionResult>,
    /// Index of the batch that failed, when execution halted early.
    pub halted_batch: Option<usize>,
    pub error: Option<String>,
    pub rollback: Option<RollbackOutcome>,
}

impl ExecutionReport {
    pub fn succeeded(&self) -> bool {
        self.error.is_none() && self.summary.failed == 0
    }
}

pub struct BatchExecutor {
    registry: Arc<ProviderRegistry>,
    transport: Arc<dyn CommandExecutor>,
    config: ExecutorConfig,
    event_bus: Option<Arc<EventBus>>,
    rollback: Option<Arc<RollbackManager>>,
    recovery: Arc<RecoveryDispatcher>,
    cancel: CancellationToken,
}

impl BatchExecutor {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        transport: Arc<dyn CommandExecutor>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            registry,
            transport,
            config,
            event_bus: None,
            rollback: None,
            recovery: Arc::new(RecoveryDispatcher::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Add an event bus for publishing execution lifecycle events.
    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Enable enhanced mode: prior-state snapshots plus rollback on failure.
    pub fn with_rollback(mut self, rollback: Arc<RollbackManager>) -> Self {
        self.rollback = Some(rollback);
        self
    }

    pub fn with_recovery(mut self, recovery: Arc<RecoveryDispatcher>) -> Self {
        self.recovery = recovery;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Partition the plan's actionable changes into dependency-ordered
    /// batches. Batches with nothing to do are dropped.
    pub fn build_execution_plan(
        &self,
        module: &Module,
        plan: &Plan,
    ) -> EngineResult<ExecutionPlan> {
        let graph = DependencyGraph::from_module(module);
        let id_batches = graph.execution_batches()?;

        let by_id: HashMap<String, &Change> = plan
            .changes
            .iter()
            .map(|c| (c.resource_id(), c))
            .collect();

        let mut batches = Vec::new();
        for ids in id_batches {
            let changes: Vec<Change> = ids
                .iter()
                .filter_map(|id| by_id.get(id))
                .filter(|c| c.is_actionable())
                .map(|c| (*c).clone())
                .collect();
            if !changes.is_empty() {
                batches.push(Batch { changes });
            }
        }

        Ok(ExecutionPlan {
            module_name: module.name().to_string(),
            batches,
        })
    }

    /// Execute a plan against its module.
    #[instrument(skip(self, module, plan), fields(module = %module.name()))]
    pub async fn execute(&self, module: &Module, plan: &Plan) -> EngineResult<ExecutionReport> {
        let execution_plan = self.build_execution_plan(module, plan)?;
        let total = execution_plan.total_changes();
        let started = Instant::now();

        self.publish(EngineEvent::ExecutionStarted {
            module: module.name().to_string(),
            total,
            batches: execution_plan.batches.len(),
        })
        .await;

        // Enhanced mode snapshots every resource up front, best-effort.
        let priors = if self.rollback.is_some() {
            self.snapshot_prior_states(&execution_plan).await
        } else {
            HashMap::new()
        };

        let mut results: Vec<ExecutionResult> = Vec::new();
        let mut halted_batch = None;
        let mut first_error: Option<String> = None;

        for (index, batch) in execution_plan.batches.iter().enumerate() {
            self.publish(EngineEvent::BatchStarted {
                module: module.name().to_string(),
                batch: index,
                size: batch.len(),
            })
            .await;

            let batch_results = self.execute_batch(batch).await;

            let succeeded = batch_results.iter().filter(|r| r.success).count();
            let failed = batch_results.len() - succeeded;
            for result in &batch_results {
                self.publish(EngineEvent::ResourceApplied {
                    module: module.name().to_string(),
                    resource_id: result.resource_id.clone(),
                    success: result.success,
                    error: result.error.clone(),
                    duration_ms: result.duration.as_millis() as u64,
                })
                .await;
            }
            self.publish(EngineEvent::BatchCompleted {
                module: module.name().to_string(),
                batch: index,
                succeeded,
                failed,
            })
            .await;

            results.extend(batch_results);

            if failed > 0 {
                first_error = results
                    .iter()
                    .find(|r| !r.success)
                    .and_then(|r| r.error.clone());
                halted_batch = Some(index);
                warn!(batch = index, failed, "batch failed; halting execution");
                break;
            }
            if self.cancel.is_cancelled() {
                first_error = Some(EngineError::Canceled.to_string());
                halted_batch = Some(index);
                break;
            }
        }

        let rollback_outcome = match (&first_error, &self.rollback) {
            (Some(_), Some(manager)) => {
                Some(self.run_rollback(module, manager, &results, &priors).await)
            }
            _ => None,
        };

        let summary = ExecutionSummary::from_results(&results, total, started.elapsed());
        self.publish(EngineEvent::ExecutionCompleted {
            module: module.name().to_string(),
            summary,
        })
        .await;

        info!(
            total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            "execution finished"
        );

        Ok(ExecutionReport {
            module: module.name().to_string(),
            summary,
            results,
            halted_batch,
            error: first_error,
            rollback: rollback_outcome,
        })
    }

    /// Run one batch to completion: every task is driven to its result even
    /// when peers fail.
    async fn execute_batch(&self, batch: &Batch) -> Vec<ExecutionResult> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency));
        let mut tasks: JoinSet<ExecutionResult> = JoinSet::new();

        for change in &batch.changes {
            let change = change.clone();
            let semaphore = Arc::clone(&semaphore);
            let registry = Arc::clone(&self.registry);
            let transport = Arc::clone(&self.transport);
            let recovery = Arc::clone(&self.recovery);
            let cancel = self.cancel.clone();
            let config = self.config.clone();

            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return ExecutionResult::failure(
                        change.resource_id(),
                        Duration::ZERO,
                        "executor semaphore closed",
                    );
                };
                apply_change(&registry, &transport, &recovery, &config, &cancel, &change).await
            });
        }

        let mut results = Vec::with_capacity(batch.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => {
                    warn!(error = %e, "apply task panicked");
                }
            }
        }
        results
    }

    /// Best-effort read of every resource scheduled for execution.
    async fn snapshot_prior_states(
        &self,
        plan: &ExecutionPlan,
    ) -> HashMap<String, ObservedState> {
        let mut priors = HashMap::new();
        for batch in &plan.batches {
            for change in &batch.changes {
                let resource = &change.resource;
                let Ok(provider) = self.registry.get(&resource.resource_type) else {
                    continue;
                };
                match provider.read(resource).await {
                    Ok(state) => {
                        priors.insert(resource.id(), state);
                    }
                    Err(e) => {
                        warn!(resource = %resource.id(), error = %e, "prior state unreadable; skipping snapshot");
                    }
                }
            }
        }
        debug!(count = priors.len(), "captured prior states");
        priors
    }

    async fn run_rollback(
        &self,
        module: &Module,
        manager: &RollbackManager,
        results: &[ExecutionResult],
        priors: &HashMap<String, ObservedState>,
    ) -> RollbackOutcome {
        let rollback_plan = manager.build_plan(module.name(), results, priors);
        self.publish(EngineEvent::RollbackStarted {
            module: module.name().to_string(),
            actions: rollback_plan.len(),
        })
        .await;

        let resources: HashMap<String, Resource> = module
            .spec
            .resources
            .iter()
            .map(|r| (r.id(), r.clone()))
            .collect();
        let outcome = manager
            .execute(&rollback_plan, &resources, &self.cancel)
            .await;

        self.publish(EngineEvent::RollbackCompleted {
            module: module.name().to_string(),
            succeeded: outcome.succeeded,
            failed: outcome.failed,
        })
        .await;
        outcome
    }

    async fn publish(&self, event: EngineEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish(&event).await;
        }
    }
}

/// Apply one change: guard evaluation, provider apply under timeout, and a
/// bounded retry when the failure classifies as transient.
async fn apply_change(
    registry: &ProviderRegistry,
    transport: &Arc<dyn CommandExecutor>,
    recovery: &RecoveryDispatcher,
    config: &ExecutorConfig,
    cancel: &CancellationToken,
    change: &Change,
) -> ExecutionResult {
    let resource = &change.resource;
    let resource_id = resource.id();
    let started = Instant::now();

    if cancel.is_cancelled() {
        return ExecutionResult::failure(
            resource_id,
            started.elapsed(),
            EngineError::Canceled.to_string(),
        );
    }

    match guards_allow(transport, resource).await {
        Ok(true) => {}
        Ok(false) => {
            debug!(resource = %resource_id, "skipped by guard");
            return ExecutionResult::success(resource_id, started.elapsed(), Vec::new());
        }
        Err(e) => {
            return ExecutionResult::failure(resource_id, started.elapsed(), e.to_string());
        }
    }

    let Some(diff) = &change.diff else {
        return ExecutionResult::failure(
            resource_id,
            started.elapsed(),
            "change has no diff to apply",
        );
    };
    let provider = match registry.get(&resource.resource_type) {
        Ok(provider) => provider,
        Err(e) => {
            return ExecutionResult::failure(resource_id, started.elapsed(), e.to_string());
        }
    };

    let mut attempt_error: Option<EngineError> = None;
    let attempts = config.transient_retries + 1;
    for attempt in 0..attempts {
        if attempt > 0 {
            tokio::select! {
                () = cancel.cancelled() => {
                    attempt_error = Some(EngineError::Canceled);
                    break;
                }
                () = tokio::time::sleep(config.transient_retry_delay) => {}
            }
        }

        let applied = tokio::time::timeout(config.resource_timeout, provider.apply(resource, diff))
            .await
            .map_err(|_| EngineError::Timeout(config.resource_timeout))
            .and_then(|inner| inner);

        match applied {
            Ok(()) => {
                let changed: Vec<String> = diff.changes.keys().cloned().collect();
                return ExecutionResult::success(resource_id, started.elapsed(), changed);
            }
            Err(e) => {
                let class = recovery.dispatch(&resource_id, &e.to_string()).await;
                // A per-resource timeout is never retried; other failures
                // retry only when classified transient.
                let retryable = !matches!(e, EngineError::Timeout(_) | EngineError::Canceled)
                    && class.is_transient();
                attempt_error = Some(e);
                if !retryable {
                    break;
                }
            }
        }
    }

    let error = attempt_error
        .map(|e| e.to_string())
        .unwrap_or_else(|| "apply failed".to_string());
    ExecutionResult::failure(resource_id, started.elapsed(), error)
}

/// Resource-level guards: `only_if` must succeed and `not_if` must fail
/// for the apply to proceed.
async fn guards_allow(
    transport: &Arc<dyn CommandExecutor>,
    resource: &Resource,
) -> EngineResult<bool> {
    if let Some(only_if) = &resource.only_if {
        if !transport.run(only_if).await?.success() {
            return Ok(false);
        }
    }
    if let Some(not_if) = &resource.not_if {
        if transport.run(not_if).await?.success() {
            return Ok(false);
        }
    }
    Ok(true)
}
