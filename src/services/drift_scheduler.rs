//! Drift check scheduler.
//!
//! A single wakeup loop dispatches per-module drift checks on their
//! configured intervals. The loop never blocks on work, only on the ticker
//! and the stop signal; each due module runs in its own task with retries.
//! Successful reports land in a bounded in-memory ring buffer.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::{Config, DriftReport, Module};
use crate::services::drift::DriftDetector;
use crate::services::event_bus::{EngineEvent, EventBus};
use crate::services::recovery::RetryPolicy;

/// Raw per-module schedule settings as supplied by callers. Negative
/// values are rejected; zeros fall back to scheduler defaults at insertion
/// time.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ScheduleSpec {
    #[serde(default)]
    pub interval_secs: i64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub max_retries: i64,
    #[serde(default)]
    pub retry_delay_secs: i64,
    #[serde(default)]
    pub timeout_secs: i64,
}

fn default_enabled() -> bool {
    true
}

/// Normalized schedule configuration.
#[derive(Debug, Clone, Copy)]
pub struct ScheduleConfig {
    pub interval: Duration,
    pub enabled: bool,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub timeout: Duration,
}

/// Defaults used to fill zero-valued spec fields.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerDefaults {
    pub interval: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub timeout: Duration,
}

impl Default for SchedulerDefaults {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
            timeout: Duration::from_secs(60),
        }
    }
}

impl ScheduleSpec {
    fn normalize(self, defaults: &SchedulerDefaults) -> EngineResult<ScheduleConfig> {
        for (name, value) in [
            ("interval_secs", self.interval_secs),
            ("max_retries", self.max_retries),
            ("retry_delay_secs", self.retry_delay_secs),
            ("timeout_secs", self.timeout_secs),
        ] {
            if value < 0 {
                return Err(EngineError::Scheduler(format!(
                    "{name} must not be negative (got {value})"
                )));
            }
        }

        Ok(ScheduleConfig {
            interval: if self.interval_secs == 0 {
                defaults.interval
            } else {
                Duration::from_secs(self.interval_secs as u64)
            },
            enabled: self.enabled,
            max_retries: if self.max_retries == 0 {
                defaults.max_retries
            } else {
                self.max_retries as u32
            },
            retry_delay: if self.retry_delay_secs == 0 {
                defaults.retry_delay
            } else {
                Duration::from_secs(self.retry_delay_secs as u64)
            },
            timeout: if self.timeout_secs == 0 {
                defaults.timeout
            } else {
                Duration::from_secs(self.timeout_secs as u64)
            },
        })
    }
}

/// Copyable view of one schedule's runtime state.
#[derive(Debug, Clone)]
pub struct ScheduleStatus {
    pub module: String,
    pub enabled: bool,
    pub interval: Duration,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: DateTime<Utc>,
    pub run_count: u64,
    pub error_count: u64,
}

struct ScheduleEntry {
    module: Module,
    config: ScheduleConfig,
    last_run: Option<DateTime<Utc>>,
    next_run: DateTime<Utc>,
    run_count: u64,
    error_count: u64,
}

pub struct DriftScheduler {
    detector: Arc<DriftDetector>,
    defaults: SchedulerDefaults,
    tick_interval: Duration,
    report_cap: usize,
    entries: Arc<RwLock<HashMap<String, ScheduleEntry>>>,
    reports: Arc<RwLock<VecDeque<DriftReport>>>,
    event_bus: Option<Arc<EventBus>>,
    running: Arc<AtomicBool>,
    stop: RwLock<Option<CancellationToken>>,
}

impl DriftScheduler {
    pub fn new(detector: Arc<DriftDetector>, config: &Config) -> Self {
        Self {
            detector,
            defaults: SchedulerDefaults {
                interval: Duration::from_secs(config.drift.default_interval_secs.max(1)),
                ..SchedulerDefaults::default()
            },
            tick_interval: Duration::from_secs(config.drift.check_interval_secs.max(1)),
            report_cap: config.drift.report_buffer.max(1),
            entries: Arc::new(RwLock::new(HashMap::new())),
            reports: Arc::new(RwLock::new(VecDeque::new())),
            event_bus: None,
            running: Arc::new(AtomicBool::new(false)),
            stop: RwLock::new(None),
        }
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Register (or replace) a module's drift schedule.
    pub async fn add_module(&self, module: Module, spec: ScheduleSpec) -> EngineResult<()> {
        module.validate()?;
        let config = spec.normalize(&self.defaults)?;
        let name = module.name().to_string();

        let entry = ScheduleEntry {
            module,
            config,
            last_run: None,
            next_run: Utc::now()
                + chrono::Duration::from_std(config.interval)
                    .map_err(|e| EngineError::Scheduler(e.to_string()))?,
            run_count: 0,
            error_count: 0,
        };
        let mut entries = self.entries.write().await;
        entries.insert(name.clone(), entry);
        info!(module = %name, interval = ?config.interval, "drift schedule registered");
        Ok(())
    }

    pub async fn remove_module(&self, name: &str) -> bool {
        let mut entries = self.entries.write().await;
        entries.remove(name).is_some()
    }

    /// Start the wakeup loop. Fails if the scheduler is already running.
    pub async fn start(self: &Arc<Self>) -> EngineResult<()> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(EngineError::Scheduler(
                "scheduler is already running".to_string(),
            ));
        }

        let token = CancellationToken::new();
        {
            let mut stop = self.stop.write().await;
            *stop = Some(token.clone());
        }

        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(scheduler.tick_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            info!("drift scheduler started");
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => scheduler.dispatch_due().await,
                }
            }
            info!("drift scheduler stopped");
        });

        Ok(())
    }

    /// Stop the loop. Safe to call repeatedly or when never started.
    pub async fn stop(&self) {
        let token = {
            let mut stop = self.stop.write().await;
            stop.take()
        };
        if let Some(token) = token {
            token.cancel();
        }
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Launch an independent check task for every due, enabled entry.
    async fn dispatch_due(self: &Arc<Self>) {
        let now = Utc::now();
        let due: Vec<(String, Module, ScheduleConfig)> = {
            let mut entries = self.entries.write().await;
            entries
                .iter_mut()
                .filter(|(_, entry)| entry.config.enabled && entry.next_run <= now)
                .map(|(name, entry)| {
                    // Push next_run forward immediately so a slow check is
                    // never dispatched twice.
                    entry.next_run = now
                        + chrono::Duration::from_std(entry.config.interval)
                            .unwrap_or_else(|_| chrono::Duration::seconds(300));
                    (name.clone(), entry.module.clone(), entry.config)
                })
                .collect()
        };

        for (name, module, config) in due {
            let scheduler = Arc::clone(self);
            tokio::spawn(async move {
                scheduler.run_check(&name, &module, config).await;
            });
        }
    }

    async fn run_check(&self, name: &str, module: &Module, config: ScheduleConfig) {
        debug!(module = %name, "running scheduled drift check");
        let policy = RetryPolicy::new(config.max_retries, config.retry_delay);
        let cancel = CancellationToken::new();
        let detector = Arc::clone(&self.detector);

        let outcome = policy
            .execute(&cancel, || {
                let detector = Arc::clone(&detector);
                let module = module.clone();
                async move {
                    tokio::time::timeout(config.timeout, detector.check_module(&module))
                        .await
                        .map_err(|_| EngineError::Timeout(config.timeout))
                        .and_then(|inner| inner)
                }
            })
            .await;

        let now = Utc::now();
        let mut entries = self.entries.write().await;
        let Some(entry) = entries.get_mut(name) else {
            return;
        };
        entry.last_run = Some(now);
        entry.next_run = now
            + chrono::Duration::from_std(entry.config.interval)
                .unwrap_or_else(|_| chrono::Duration::seconds(300));
        entry.run_count += 1;

        match outcome {
            Ok(report) => {
                drop(entries);
                self.push_report(report).await;
            }
            Err(e) => {
                entry.error_count += 1;
                drop(entries);
                warn!(module = %name, error = %e, "scheduled drift check failed");
                if let Some(bus) = &self.event_bus {
                    bus.publish(&EngineEvent::DriftCheckFailed {
                        module: name.to_string(),
                        error: e.to_string(),
                    })
                    .await;
                }
            }
        }
    }

    async fn push_report(&self, report: DriftReport) {
        let mut reports = self.reports.write().await;
        while reports.len() >= self.report_cap {
            reports.pop_front();
        }
        reports.push_back(report);
    }

    /// Most recent reports, newest last.
    pub async fn recent_reports(&self, limit: usize) -> Vec<DriftReport> {
        let reports = self.reports.read().await;
        reports
            .iter()
            .rev()
            .take(limit)
            .rev()
            .cloned()
            .collect()
    }

    /// Copy of one schedule's runtime state.
    pub async fn status(&self, name: &str) -> Option<ScheduleStatus> {
        let entries = self.entries.read().await;
        entries.get(name).map(|entry| ScheduleStatus {
            module: name.to_string(),
            enabled: entry.config.enabled,
            interval: entry.config.interval,
            last_run: entry.last_run,
            next_run: entry.next_run,
            run_count: entry.run_count,
            error_count: entry.error_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ProviderRegistry;
    use crate::services::drift::DriftConfig;

    fn scheduler_with(config: Config) -> Arc<DriftScheduler> {
        let registry = Arc::new(ProviderRegistry::new());
        let detector = Arc::new(DriftDetector::new(registry, DriftConfig::default()));
        Arc::new(DriftScheduler::new(detector, &config))
    }

    #[test]
    fn test_spec_rejects_negative_values() {
        let spec = ScheduleSpec {
            interval_secs: -5,
            ..ScheduleSpec::default()
        };
        assert!(spec.normalize(&SchedulerDefaults::default()).is_err());
    }

    #[test]
    fn test_spec_zeros_fill_from_defaults() {
        let defaults = SchedulerDefaults::default();
        let config = ScheduleSpec::default().normalize(&defaults).unwrap();
        assert_eq!(config.interval, defaults.interval);
        assert_eq!(config.max_retries, defaults.max_retries);
        assert_eq!(config.retry_delay, defaults.retry_delay);
        assert_eq!(config.timeout, defaults.timeout);
    }

    #[test]
    fn test_spec_explicit_values_kept() {
        let config = ScheduleSpec {
            interval_secs: 42,
            enabled: false,
            max_retries: 7,
            retry_delay_secs: 2,
            timeout_secs: 9,
        }
        .normalize(&SchedulerDefaults::default())
        .unwrap();
        assert_eq!(config.interval, Duration::from_secs(42));
        assert!(!config.enabled);
        assert_eq!(config.max_retries, 7);
    }

    #[tokio::test]
    async fn test_start_twice_fails_and_stop_is_idempotent() {
        let scheduler = scheduler_with(Config::default());

        scheduler.start().await.unwrap();
        assert!(scheduler.is_running());
        assert!(scheduler.start().await.is_err());

        scheduler.stop().await;
        assert!(!scheduler.is_running());
        scheduler.stop().await;

        // A stopped scheduler can be started again.
        scheduler.start().await.unwrap();
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_add_and_remove_module() {
        let scheduler = scheduler_with(Config::default());
        let module = Module::new("web", "1.0.0");

        scheduler
            .add_module(module, ScheduleSpec::default())
            .await
            .unwrap();
        let status = scheduler.status("web").await.unwrap();
        assert_eq!(status.run_count, 0);
        assert!(status.enabled);

        assert!(scheduler.remove_module("web").await);
        assert!(!scheduler.remove_module("web").await);
    }

    #[tokio::test]
    async fn test_report_ring_buffer_is_bounded() {
        let mut config = Config::default();
        config.drift.report_buffer = 3;
        let scheduler = scheduler_with(config);

        for i in 0..5 {
            let report = DriftReport::from_results(
                format!("m{i}"),
                Vec::new(),
                Duration::from_millis(1),
            );
            scheduler.push_report(report).await;
        }

        let recent = scheduler.recent_reports(10).await;
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].module, "m2");
        assert_eq!(recent[2].module, "m4");
    }
}
