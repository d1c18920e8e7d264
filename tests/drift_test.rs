//! Drift detection over the fake provider, one-shot and scheduled.

mod common;

use std::sync::Arc;
use std::time::Duration;

use anvil::domain::models::{Config, Module, Resource, ResourceState};
use anvil::providers::ProviderRegistry;
use anvil::services::{DriftConfig, DriftDetector, DriftScheduler, ScheduleSpec};
use common::{empty_world, seed_present, FakeProvider};

fn registry(world: &common::World) -> Arc<ProviderRegistry> {
    let registry = ProviderRegistry::new();
    registry
        .register(Arc::new(FakeProvider::new("pkg", world.clone())))
        .unwrap();
    Arc::new(registry)
}

/// Scenario 6: one converged resource, one divergent. The report counts
/// exactly one drifting resource and no errors.
#[tokio::test]
async fn drift_report_counts() {
    let world = empty_world();
    seed_present(&world, "pkg.converged").await;

    let module = Module::new("m", "1.0.0")
        .with_resource(Resource::new("pkg", "converged").with_state(ResourceState::Present))
        .with_resource(Resource::new("pkg", "missing").with_state(ResourceState::Present));

    let detector = DriftDetector::new(registry(&world), DriftConfig::default());
    let report = detector.check_module(&module).await.unwrap();

    assert_eq!(report.total_checked, 2);
    assert_eq!(report.drift_detected, 1);
    assert_eq!(report.errors, 0);

    let drifting = report
        .results
        .iter()
        .find(|r| r.resource_id == "pkg.missing")
        .unwrap();
    assert!(drifting.has_drift);
    assert!(drifting.changes.is_some());
}

/// The scheduler picks up a due module, runs the check, stores the report
/// in the ring buffer, and advances its bookkeeping.
#[tokio::test]
async fn scheduler_runs_due_checks() {
    let world = empty_world();
    let module = Module::new("watched", "1.0.0")
        .with_resource(Resource::new("pkg", "missing").with_state(ResourceState::Present));

    let mut config = Config::default();
    config.drift.check_interval_secs = 1;
    let detector = Arc::new(DriftDetector::new(registry(&world), DriftConfig::default()));
    let scheduler = Arc::new(DriftScheduler::new(detector, &config));

    scheduler
        .add_module(
            module,
            ScheduleSpec {
                interval_secs: 1,
                enabled: true,
                ..ScheduleSpec::default()
            },
        )
        .await
        .unwrap();

    scheduler.start().await.unwrap();

    // Wait for at least one scheduled run to land.
    let mut ran = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if scheduler.status("watched").await.unwrap().run_count > 0 {
            ran = true;
            break;
        }
    }
    scheduler.stop().await;
    assert!(ran, "scheduled check never ran");

    let status = scheduler.status("watched").await.unwrap();
    assert!(status.last_run.is_some());
    assert_eq!(status.error_count, 0);

    let reports = scheduler.recent_reports(10).await;
    assert!(!reports.is_empty());
    assert_eq!(reports.last().unwrap().module, "watched");
    assert_eq!(reports.last().unwrap().drift_detected, 1);
}

/// Disabled schedules never run.
#[tokio::test]
async fn disabled_schedule_does_not_run() {
    let world = empty_world();
    let module = Module::new("idle", "1.0.0")
        .with_resource(Resource::new("pkg", "x").with_state(ResourceState::Present));

    let mut config = Config::default();
    config.drift.check_interval_secs = 1;
    let detector = Arc::new(DriftDetector::new(registry(&world), DriftConfig::default()));
    let scheduler = Arc::new(DriftScheduler::new(detector, &config));

    scheduler
        .add_module(
            module,
            ScheduleSpec {
                interval_secs: 1,
                enabled: false,
                ..ScheduleSpec::default()
            },
        )
        .await
        .unwrap();

    scheduler.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;
    scheduler.stop().await;

    assert_eq!(scheduler.status("idle").await.unwrap().run_count, 0);
}
