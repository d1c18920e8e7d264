//! Error classification, retry policy, and recovery strategy dispatch.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::errors::{EngineError, EngineResult};

/// Classified apply-error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    PermissionDenied,
    NetworkTimeout,
    ResourceConflict,
    Unknown,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PermissionDenied => "permission_denied",
            Self::NetworkTimeout => "network_timeout",
            Self::ResourceConflict => "resource_conflict",
            Self::Unknown => "unknown",
        }
    }

    /// Only network timeouts are considered transient enough to retry
    /// during apply.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::NetworkTimeout)
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map error text to a category by substring.
pub fn classify(error: &str) -> ErrorClass {
    let lower = error.to_lowercase();
    if ["permission denied", "access denied", "operation not permitted", "unauthorized"]
        .iter()
        .any(|needle| lower.contains(needle))
    {
        return ErrorClass::PermissionDenied;
    }
    if ["timed out", "timeout", "connection refused", "connection reset", "network is unreachable", "no route to host"]
        .iter()
        .any(|needle| lower.contains(needle))
    {
        return ErrorClass::NetworkTimeout;
    }
    if ["already exists", "in use", "resource busy", "conflict", "locked"]
        .iter()
        .any(|needle| lower.contains(needle))
    {
        return ErrorClass::ResourceConflict;
    }
    ErrorClass::Unknown
}

/// Retry policy with a fixed delay between attempts.
///
/// Cancellation is observed at the sleep boundary: a canceled token aborts
/// the wait and surfaces `EngineError::Canceled`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            max_retries,
            retry_delay,
        }
    }

    /// Run an operation with up to `max_retries` additional attempts.
    pub async fn execute<F, Fut, T>(
        &self,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> EngineResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = EngineResult<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(EngineError::Canceled);
            }
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if attempt >= self.max_retries {
                        return Err(e);
                    }
                    attempt += 1;
                    debug!(
                        attempt,
                        max = self.max_retries,
                        error = %e,
                        "retrying after delay"
                    );
                    tokio::select! {
                        () = cancel.cancelled() => return Err(EngineError::Canceled),
                        () = tokio::time::sleep(self.retry_delay) => {}
                    }
                }
            }
        }
    }
}

/// Extension point: a response to a classified error during apply.
#[async_trait]
pub trait RecoveryStrategy: Send + Sync {
    fn class(&self) -> ErrorClass;

    async fn recover(&self, resource_id: &str, error: &str) -> EngineResult<()>;
}

/// One recorded classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryRecord {
    pub resource_id: String,
    pub class: ErrorClass,
    pub error: String,
    pub recorded_at: DateTime<Utc>,
}

/// Dispatches classified errors to registered strategies. The built-in
/// behavior only records the classification; real recovery actions plug in
/// through [`RecoveryStrategy`].
#[derive(Default)]
pub struct RecoveryDispatcher {
    strategies: RwLock<HashMap<ErrorClass, Arc<dyn RecoveryStrategy>>>,
    records: RwLock<Vec<RecoveryRecord>>,
}

impl RecoveryDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, strategy: Arc<dyn RecoveryStrategy>) {
        let mut strategies = self.strategies.write().await;
        strategies.insert(strategy.class(), strategy);
    }

    /// Classify, record, and hand off to the matching strategy if any.
    pub async fn dispatch(&self, resource_id: &str, error: &str) -> ErrorClass {
        let class = classify(error);
        {
            let mut records = self.records.write().await;
            records.push(RecoveryRecord {
                resource_id: resource_id.to_string(),
                class,
                error: error.to_string(),
                recorded_at: Utc::now(),
            });
        }

        let strategy = {
            let strategies = self.strategies.read().await;
            strategies.get(&class).cloned()
        };
        if let Some(strategy) = strategy {
            if let Err(e) = strategy.recover(resource_id, error).await {
                warn!(resource_id, class = %class, error = %e, "recovery strategy failed");
            }
        }
        class
    }

    pub async fn records(&self) -> Vec<RecoveryRecord> {
        self.records.read().await.clone()
    }
}
