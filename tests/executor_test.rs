//! End-to-end scenarios for the planner + batch executor + rollback
//! pipeline, over the in-memory fake provider.

mod common;

use std::sync::Arc;

use anvil::domain::models::{Module, Resource, ResourceState};
use anvil::infrastructure::transport::LocalExecutor;
use anvil::providers::ProviderRegistry;
use anvil::services::{
    BatchExecutor, DependencyGraph, ExecutorConfig, Planner, RetryPolicy, RollbackManager,
};
use common::{empty_world, seed_present, FakeProvider};

fn fast_config() -> ExecutorConfig {
    ExecutorConfig {
        max_concurrency: 4,
        resource_timeout: std::time::Duration::from_secs(5),
        transient_retries: 0,
        transient_retry_delay: std::time::Duration::from_millis(1),
    }
}

fn registry_with(provider: FakeProvider) -> Arc<ProviderRegistry> {
    let registry = ProviderRegistry::new();
    registry.register(Arc::new(provider)).unwrap();
    Arc::new(registry)
}

fn executor(registry: Arc<ProviderRegistry>) -> BatchExecutor {
    BatchExecutor::new(registry, Arc::new(LocalExecutor::new()), fast_config())
}

/// Scenario: two independent packages, both absent. One batch, two
/// parallel creates, everything succeeds.
#[tokio::test]
async fn independent_creates_run_in_one_batch() {
    let world = empty_world();
    let provider = FakeProvider::new("pkg", world.clone());
    let apply_log = Arc::clone(&provider.apply_log);
    let registry = registry_with(provider);

    let module = Module::new("tools", "1.0.0")
        .with_resource(Resource::new("pkg", "git").with_state(ResourceState::Present))
        .with_resource(Resource::new("pkg", "vim").with_state(ResourceState::Present));

    let planner = Planner::new(registry.clone());
    let plan = planner.plan(&module).await.unwrap();
    assert_eq!(plan.summary().to_create, 2);

    let executor = executor(registry);
    let execution_plan = executor.build_execution_plan(&module, &plan).unwrap();
    assert_eq!(execution_plan.batches.len(), 1);
    assert_eq!(execution_plan.batches[0].len(), 2);

    let report = executor.execute(&module, &plan).await.unwrap();
    assert_eq!(report.summary.total, 2);
    assert_eq!(report.summary.succeeded, 2);
    assert_eq!(report.summary.failed, 0);
    assert!(report.succeeded());

    assert_eq!(apply_log.lock().await.len(), 2);
    assert!(world.lock().await.contains_key("pkg.git"));
    assert!(world.lock().await.contains_key("pkg.vim"));
}

/// Scenario: a file owned by a managed user forms two batches with the
/// user first; dropping the user resource collapses to one batch.
#[tokio::test]
async fn file_owner_dependency_orders_batches() {
    fn module_with_user() -> Module {
        Module::new("web", "1.0.0")
            .with_resource(Resource::new("user", "webuser"))
            .with_resource(
                Resource::new("file", "config")
                    .with_property("path", "/etc/web.conf")
                    .with_property("owner", "webuser"),
            )
    }

    let graph = DependencyGraph::from_module(&module_with_user());
    let batches = graph.execution_batches().unwrap();
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0], vec!["user.webuser".to_string()]);

    let mut without_user = module_with_user();
    without_user.spec.resources.remove(0);
    let graph = DependencyGraph::from_module(&without_user);
    assert_eq!(graph.execution_batches().unwrap().len(), 1);

    // Execution respects the ordering: the user is applied strictly
    // before the file.
    let world = empty_world();
    let user_provider = FakeProvider::new("user", world.clone());
    let file_provider = FakeProvider::new("file", world.clone());
    let apply_log = Arc::clone(&user_provider.apply_log);
    let file_log = Arc::clone(&file_provider.apply_log);

    let registry = ProviderRegistry::new();
    registry.register(Arc::new(user_provider)).unwrap();
    registry.register(Arc::new(file_provider)).unwrap();
    let registry = Arc::new(registry);

    let module = module_with_user();
    let plan = Planner::new(registry.clone()).plan(&module).await.unwrap();
    let report = executor(registry).execute(&module, &plan).await.unwrap();
    assert_eq!(report.summary.succeeded, 2);

    // The user provider's log has the first apply, the file provider's
    // the second; both saw exactly one.
    assert_eq!(apply_log.lock().await.as_slice(), ["user.webuser"]);
    assert_eq!(file_log.lock().await.as_slice(), ["file.config"]);
}

/// Scenario: a failure halts execution after the failing batch drains;
/// later batches never start, and partial results come back.
#[tokio::test]
async fn failure_halts_before_later_batches() {
    let world = empty_world();
    let provider = FakeProvider::new("shell", world.clone()).failing("breaks");
    let apply_log = Arc::clone(&provider.apply_log);
    let registry = registry_with(provider);

    let module = Module::new("m", "1.0.0")
        .with_resource(Resource::new("shell", "first").with_property("command", "true"))
        .with_resource(
            Resource::new("shell", "breaks")
                .with_property("command", "true")
                .with_dependency("shell.first"),
        )
        .with_resource(
            Resource::new("shell", "never")
                .with_property("command", "true")
                .with_dependency("shell.breaks"),
        );

    let plan = Planner::new(registry.clone()).plan(&module).await.unwrap();
    let report = executor(registry).execute(&module, &plan).await.unwrap();

    assert!(!report.succeeded());
    assert_eq!(report.halted_batch, Some(1));
    assert_eq!(report.summary.succeeded, 1);
    assert_eq!(report.summary.failed, 1);
    assert_eq!(report.summary.skipped, 1);
    assert!(report.error.as_deref().unwrap().contains("scripted apply failure"));

    let log = apply_log.lock().await;
    assert!(!log.contains(&"shell.never".to_string()));
}

/// Scenario 4: mid-batch failure with rollback enabled. Prior states are
/// captured, the rollback plan targets only the successful peer, and
/// afterwards its read returns the prior (absent) state.
#[tokio::test]
async fn rollback_reverts_successful_peer_on_batch_failure() {
    let world = empty_world();
    let provider = FakeProvider::new("pkg", world.clone()).failing("bad");
    let registry = registry_with(provider);

    let module = Module::new("m", "1.0.0")
        .with_resource(Resource::new("pkg", "good").with_state(ResourceState::Present))
        .with_resource(Resource::new("pkg", "bad").with_state(ResourceState::Present));

    let plan = Planner::new(registry.clone()).plan(&module).await.unwrap();
    let rollback = Arc::new(RollbackManager::new(
        registry.clone(),
        RetryPolicy::new(1, std::time::Duration::from_millis(1)),
    ));
    let executor = executor(registry).with_rollback(rollback);

    let report = executor.execute(&module, &plan).await.unwrap();
    assert!(!report.succeeded());

    let outcome = report.rollback.expect("rollback ran");
    assert_eq!(outcome.attempted, 1);
    assert_eq!(outcome.succeeded, 1);
    assert!(outcome.fully_reverted());

    // pkg.good was created, then reverted to its prior absent state.
    let world = world.lock().await;
    assert!(!world.contains_key("pkg.good"));
}

/// Rollback re-converges to a captured present state, not just absence.
#[tokio::test]
async fn rollback_restores_prior_present_state() {
    let world = empty_world();
    seed_present(&world, "pkg.existing").await;
    let provider = FakeProvider::new("pkg", world.clone()).failing("bad");
    let registry = registry_with(provider);

    let module = Module::new("m", "1.0.0")
        .with_resource(Resource::new("pkg", "existing").with_state(ResourceState::Absent))
        .with_resource(Resource::new("pkg", "bad").with_state(ResourceState::Present));

    let plan = Planner::new(registry.clone()).plan(&module).await.unwrap();
    let rollback = Arc::new(RollbackManager::new(
        registry.clone(),
        RetryPolicy::new(0, std::time::Duration::from_millis(1)),
    ));
    let executor = executor(registry).with_rollback(rollback);

    let report = executor.execute(&module, &plan).await.unwrap();
    assert!(!report.succeeded());
    assert!(report.rollback.unwrap().fully_reverted());

    // The deleted package is back.
    assert!(world.lock().await.contains_key("pkg.existing"));
}

/// Resource-level guards skip the apply without failing it.
#[tokio::test]
async fn guards_skip_apply() {
    let world = empty_world();
    let provider = FakeProvider::new("pkg", world.clone());
    let apply_log = Arc::clone(&provider.apply_log);
    let registry = registry_with(provider);

    let mut resource = Resource::new("pkg", "guarded").with_state(ResourceState::Present);
    resource.only_if = Some("false".to_string());
    let module = Module::new("m", "1.0.0").with_resource(resource);

    let plan = Planner::new(registry.clone()).plan(&module).await.unwrap();
    let report = executor(registry).execute(&module, &plan).await.unwrap();

    assert!(report.succeeded());
    assert!(apply_log.lock().await.is_empty());
    assert!(!world.lock().await.contains_key("pkg.guarded"));
}

/// Converged modules re-plan to noops: apply then plan again.
#[tokio::test]
async fn second_plan_after_apply_is_noop() {
    let world = empty_world();
    let provider = FakeProvider::new("pkg", world.clone());
    let registry = registry_with(provider);

    let module = Module::new("m", "1.0.0")
        .with_resource(
            Resource::new("pkg", "git")
                .with_state(ResourceState::Present)
                .with_property("version", "2.44"),
        );

    let planner = Planner::new(registry.clone());
    let plan = planner.plan(&module).await.unwrap();
    assert!(plan.has_changes());

    let report = executor(registry).execute(&module, &plan).await.unwrap();
    assert!(report.succeeded());

    let replanned = planner.plan(&module).await.unwrap();
    assert!(!replanned.has_changes());
    assert_eq!(replanned.summary().no_changes, 1);
}
