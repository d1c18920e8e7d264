//! Append-only audit log.
//!
//! One structured JSON record per line, fsynced after each write, with
//! size-based rotation: the current file becomes `<name>.1`, existing
//! `.N` files shift to `.N+1`, and the oldest beyond `max_files` is
//! discarded. Writes from concurrent tasks are serialized under one lock,
//! which also keeps timestamps non-decreasing per writer.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::{AuditEntry, AuditEventType, Config};
use crate::services::event_bus::{EngineEvent, EventCategory, EventHandler};

/// Audit logger configuration.
#[derive(Debug, Clone)]
pub struct AuditLogConfig {
    pub path: PathBuf,
    pub max_file_size: u64,
    pub max_files: usize,
}

impl AuditLogConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            path: PathBuf::from(&config.audit.path),
            max_file_size: config.audit.max_file_size,
            max_files: config.audit.max_files.max(1),
        }
    }
}

struct WriterState {
    file: File,
    last_timestamp: Option<DateTime<Utc>>,
}

/// Process-wide audit logger with explicit lifecycle.
#[derive(Clone)]
pub struct AuditLogger {
    config: Arc<AuditLogConfig>,
    state: Arc<Mutex<WriterState>>,
    enabled: Arc<AtomicBool>,
}

impl AuditLogger {
    /// Open (or create) the audit log in append mode, creating parent
    /// directories as needed.
    pub fn new(config: AuditLogConfig) -> EngineResult<Self> {
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = open_append(&config.path)?;
        Ok(Self {
            config: Arc::new(config),
            state: Arc::new(Mutex::new(WriterState {
                file,
                last_timestamp: None,
            })),
            enabled: Arc::new(AtomicBool::new(true)),
        })
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Flush and disable the logger.
    pub async fn close(&self) -> EngineResult<()> {
        let state = self.state.lock().await;
        state.file.sync_all()?;
        drop(state);
        self.enabled.store(false, Ordering::SeqCst);
        info!("audit log closed");
        Ok(())
    }

    /// Append one entry. The write, fsync, and any rotation happen under
    /// the exclusive writer lock.
    pub async fn log(&self, mut entry: AuditEntry) -> EngineResult<()> {
        if !self.is_enabled() {
            return Err(EngineError::Config("audit logger is closed".to_string()));
        }
        entry
            .validate()
            .map_err(EngineError::Config)?;

        let mut state = self.state.lock().await;

        // Clamp so timestamps within this writer never go backwards.
        if let Some(last) = state.last_timestamp {
            if entry.timestamp < last {
                entry.timestamp = last;
            }
        }
        state.last_timestamp = Some(entry.timestamp);

        let json = serde_json::to_string(&entry)?;
        writeln!(state.file, "{json}")?;
        state.file.sync_data()?;

        let size = state.file.metadata()?.len();
        if size >= self.config.max_file_size {
            self.rotate(&mut state)?;
        }
        Ok(())
    }

    fn rotate(&self, state: &mut WriterState) -> EngineResult<()> {
        let path = &self.config.path;
        let max = self.config.max_files;

        let oldest = rotated_name(path, max);
        if oldest.exists() {
            std::fs::remove_file(&oldest)?;
        }
        for n in (1..max).rev() {
            let from = rotated_name(path, n);
            if from.exists() {
                std::fs::rename(&from, rotated_name(path, n + 1))?;
            }
        }
        state.file.sync_all()?;
        std::fs::rename(path, rotated_name(path, 1))?;
        state.file = open_append(path)?;
        info!(path = %path.display(), "rotated audit log");
        Ok(())
    }

    /// Convenience: record a resource apply outcome.
    pub async fn resource_change(
        &self,
        actor: &str,
        resource_id: &str,
        action: &str,
        success: bool,
        error: Option<&str>,
    ) {
        let mut entry = AuditEntry::new(AuditEventType::ResourceChange, actor, action)
            .with_resource(resource_id);
        if let Some(error) = error {
            entry = entry.failed(error);
        } else {
            entry.success = success;
        }
        self.log_best_effort(entry).await;
    }

    /// Convenience: record an authorization decision.
    pub async fn authorization(&self, actor: &str, permission: &str, allowed: bool) {
        let mut entry = AuditEntry::new(AuditEventType::Authorization, actor, permission);
        entry.success = allowed;
        self.log_best_effort(entry).await;
    }

    async fn log_best_effort(&self, entry: AuditEntry) {
        if let Err(e) = self.log(entry).await {
            warn!(error = %e, "failed to write audit entry");
        }
    }

    /// Read back entries from the current file, newest last.
    pub async fn query(&self, filter: AuditFilter) -> EngineResult<Vec<AuditEntry>> {
        // Hold the writer lock so a rotation cannot race the read.
        let _state = self.state.lock().await;
        let contents = match std::fs::read_to_string(&self.config.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(EngineError::Io(e)),
        };
        let mut entries: Vec<AuditEntry> = Vec::new();
        for line in contents.lines() {
            match serde_json::from_str::<AuditEntry>(line) {
                Ok(entry) => {
                    if filter.matches(&entry) {
                        entries.push(entry);
                    }
                }
                Err(e) => warn!(error = %e, "skipping malformed audit line"),
            }
        }
        if let Some(limit) = filter.limit {
            let excess = entries.len().saturating_sub(limit);
            entries.drain(..excess);
        }
        Ok(entries)
    }

    /// Aggregate counts over the current file.
    pub async fn stats(&self) -> EngineResult<AuditStats> {
        let entries = self.query(AuditFilter::default()).await?;
        let mut by_event_type: HashMap<String, usize> = HashMap::new();
        let mut failures = 0;
        for entry in &entries {
            *by_event_type
                .entry(entry.event_type.as_str().to_string())
                .or_default() += 1;
            if !entry.success {
                failures += 1;
            }
        }
        Ok(AuditStats {
            total_entries: entries.len(),
            failures,
            by_event_type,
            oldest: entries.first().map(|e| e.timestamp),
            newest: entries.last().map(|e| e.timestamp),
        })
    }
}

fn open_append(path: &Path) -> EngineResult<File> {
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

fn rotated_name(path: &Path, n: usize) -> PathBuf {
    PathBuf::from(format!("{}.{n}", path.display()))
}

/// Query filter over audit entries.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub event_type: Option<AuditEventType>,
    pub actor: Option<String>,
    pub resource_id: Option<String>,
    pub failures_only: bool,
    pub limit: Option<usize>,
}

impl AuditFilter {
    pub fn matches(&self, entry: &AuditEntry) -> bool {
        if let Some(event_type) = self.event_type {
            if entry.event_type != event_type {
                return false;
            }
        }
        if let Some(actor) = &self.actor {
            if &entry.actor != actor {
                return false;
            }
        }
        if let Some(resource_id) = &self.resource_id {
            if entry.resource_id.as_ref() != Some(resource_id) {
                return false;
            }
        }
        if self.failures_only && entry.success {
            return false;
        }
        true
    }
}

/// Aggregate audit statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AuditStats {
    pub total_entries: usize,
    pub failures: usize,
    pub by_event_type: HashMap<String, usize>,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

/// Event-bus subscriber that mirrors engine lifecycle events into the
/// audit trail.
pub struct AuditEventBridge {
    logger: AuditLogger,
}

impl AuditEventBridge {
    pub fn new(logger: AuditLogger) -> Self {
        Self { logger }
    }
}

#[async_trait]
impl EventHandler for AuditEventBridge {
    fn name(&self) -> &str {
        "audit-bridge"
    }

    fn categories(&self) -> Vec<EventCategory> {
        vec![
            EventCategory::Execution,
            EventCategory::Rollback,
            EventCategory::Policy,
            EventCategory::Approval,
            EventCategory::Authorization,
            EventCategory::System,
        ]
    }

    async fn handle(&self, event: &EngineEvent) -> EngineResult<()> {
        let entry = match event {
            EngineEvent::ResourceApplied {
                resource_id,
                success,
                error,
                ..
            } => {
                let mut entry = AuditEntry::new(AuditEventType::ResourceChange, "engine", "apply")
                    .with_resource(resource_id.clone());
                entry.success = *success;
                entry.error = error.clone();
                Some(entry)
            }
            EngineEvent::PolicyViolated {
                module,
                policy,
                message,
                resource_id,
            } => {
                let mut entry =
                    AuditEntry::new(AuditEventType::PolicyViolation, "engine", "policy_check")
                        .with_metadata(serde_json::json!({
                            "module": module,
                            "policy": policy,
                            "message": message,
                        }));
                if let Some(resource_id) = resource_id {
                    entry = entry.with_resource(resource_id.clone());
                }
                entry.success = false;
                Some(entry)
            }
            EngineEvent::ApprovalSubmitted {
                request_id,
                module,
                action,
            } => Some(
                AuditEntry::new(AuditEventType::UserAction, "engine", "approval_submitted")
                    .with_metadata(serde_json::json!({
                        "request_id": request_id,
                        "module": module,
                        "action": action,
                    })),
            ),
            EngineEvent::AuthorizationDenied { user, permission } => {
                let mut entry =
                    AuditEntry::new(AuditEventType::Authorization, user.clone(), permission.clone());
                entry.success = false;
                Some(entry)
            }
            EngineEvent::RollbackCompleted {
                module,
                succeeded,
                failed,
            } => Some(
                AuditEntry::new(AuditEventType::SystemEvent, "engine", "rollback")
                    .with_metadata(serde_json::json!({
                        "module": module,
                        "succeeded": succeeded,
                        "failed": failed,
                    })),
            ),
            EngineEvent::EngineStarted => Some(AuditEntry::new(
                AuditEventType::SystemEvent,
                "engine",
                "started",
            )),
            EngineEvent::EngineStopped => Some(AuditEntry::new(
                AuditEventType::SystemEvent,
                "engine",
                "stopped",
            )),
            _ => None,
        };

        if let Some(entry) = entry {
            self.logger.log(entry).await?;
        }
        Ok(())
    }
}
