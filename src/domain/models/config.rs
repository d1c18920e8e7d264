//! Engine configuration model.
//!
//! Loaded by the figment-based `ConfigLoader` with hierarchical merging;
//! every field has a serde default so partial config files work.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub executor: ExecutorSettings,
    #[serde(default)]
    pub rollback: RollbackSettings,
    #[serde(default)]
    pub drift: DriftSettings,
    #[serde(default)]
    pub audit: AuditSettings,
    #[serde(default)]
    pub notifications: NotificationSettings,
    #[serde(default)]
    pub logging: LogSettings,
}

/// Batch executor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorSettings {
    /// Maximum resources applied concurrently within a batch.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Per-resource apply timeout in seconds.
    #[serde(default = "default_resource_timeout_secs")]
    pub resource_timeout_secs: u64,
}

fn default_max_concurrency() -> usize {
    10
}

fn default_resource_timeout_secs() -> u64 {
    30 * 60
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            resource_timeout_secs: default_resource_timeout_secs(),
        }
    }
}

impl ExecutorSettings {
    pub fn resource_timeout(&self) -> Duration {
        Duration::from_secs(self.resource_timeout_secs)
    }
}

/// Rollback settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackSettings {
    /// Whether the executor snapshots prior state and rolls back on failure.
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_rollback_retries")]
    pub max_retries: u32,
    #[serde(default = "default_rollback_delay_secs")]
    pub retry_delay_secs: u64,
}

fn default_rollback_retries() -> u32 {
    3
}

fn default_rollback_delay_secs() -> u64 {
    5
}

impl Default for RollbackSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            max_retries: default_rollback_retries(),
            retry_delay_secs: default_rollback_delay_secs(),
        }
    }
}

impl RollbackSettings {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

/// Drift detector and scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftSettings {
    /// Scheduler wakeup cadence in seconds.
    #[serde(default = "default_drift_tick_secs")]
    pub check_interval_secs: u64,
    /// Default per-module re-check interval in seconds.
    #[serde(default = "default_drift_interval_secs")]
    pub default_interval_secs: u64,
    /// Per-resource drift check timeout in seconds.
    #[serde(default = "default_drift_timeout_secs")]
    pub check_timeout_secs: u64,
    /// Fleet-wide concurrent resource checks.
    #[serde(default = "default_drift_concurrency")]
    pub max_concurrent_checks: usize,
    /// Capacity of the in-memory drift report ring buffer.
    #[serde(default = "default_report_buffer")]
    pub report_buffer: usize,
}

fn default_drift_tick_secs() -> u64 {
    10
}

fn default_drift_interval_secs() -> u64 {
    300
}

fn default_drift_timeout_secs() -> u64 {
    30
}

fn default_drift_concurrency() -> usize {
    8
}

fn default_report_buffer() -> usize {
    100
}

impl Default for DriftSettings {
    fn default() -> Self {
        Self {
            check_interval_secs: default_drift_tick_secs(),
            default_interval_secs: default_drift_interval_secs(),
            check_timeout_secs: default_drift_timeout_secs(),
            max_concurrent_checks: default_drift_concurrency(),
            report_buffer: default_report_buffer(),
        }
    }
}

/// Audit log settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditSettings {
    #[serde(default = "default_audit_path")]
    pub path: String,
    /// Rotation threshold in bytes.
    #[serde(default = "default_audit_max_file_size")]
    pub max_file_size: u64,
    /// Rotated files kept before the oldest is discarded.
    #[serde(default = "default_audit_max_files")]
    pub max_files: usize,
}

fn default_audit_path() -> String {
    ".anvil/audit.log".to_string()
}

fn default_audit_max_file_size() -> u64 {
    100 * 1024 * 1024
}

fn default_audit_max_files() -> usize {
    10
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            path: default_audit_path(),
            max_file_size: default_audit_max_file_size(),
            max_files: default_audit_max_files(),
        }
    }
}

/// Notification rate limiting settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationSettings {
    #[serde(default = "default_rate_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_rate_refill_secs")]
    pub refill_interval_secs: u64,
}

fn default_rate_max_tokens() -> u32 {
    60
}

fn default_rate_refill_secs() -> u64 {
    60
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            max_tokens: default_rate_max_tokens(),
            refill_interval_secs: default_rate_refill_secs(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// "json" or "pretty".
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}
