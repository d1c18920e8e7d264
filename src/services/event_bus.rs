//! Engine event bus.
//!
//! Single-process pub/sub: handlers declare the event categories they
//! consume, and publish fans out synchronously to every matching handler.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::warn;

use crate::domain::errors::EngineResult;
use crate::domain::models::{ApprovalStatus, ExecutionSummary, PlanSummary};

/// Event category for subscription filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventCategory {
    Plan,
    Execution,
    Rollback,
    Drift,
    Policy,
    Approval,
    Authorization,
    System,
}

/// Lifecycle events emitted by the engine core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EngineEvent {
    PlanCompleted {
        module: String,
        summary: PlanSummary,
    },
    ExecutionStarted {
        module: String,
        total: usize,
        batches: usize,
    },
    BatchStarted {
        module: String,
        batch: usize,
        size: usize,
    },
    ResourceApplied {
        module: String,
        resource_id: String,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        duration_ms: u64,
    },
    BatchCompleted {
        module: String,
        batch: usize,
        succeeded: usize,
        failed: usize,
    },
    ExecutionCompleted {
        module: String,
        summary: ExecutionSummary,
    },
    RollbackStarted {
        module: String,
        actions: usize,
    },
    RollbackCompleted {
        module: String,
        succeeded: usize,
        failed: usize,
    },
    DriftDetected {
        module: String,
        drifted: usize,
        total: usize,
    },
    DriftCheckFailed {
        module: String,
        error: String,
    },
    PolicyViolated {
        module: String,
        policy: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        resource_id: Option<String>,
    },
    ApprovalSubmitted {
        request_id: String,
        module: String,
        action: String,
    },
    ApprovalResolved {
        request_id: String,
        status: ApprovalStatus,
    },
    AuthorizationDenied {
        user: String,
        permission: String,
    },
    EngineStarted,
    EngineStopped,
}

impl EngineEvent {
    pub fn category(&self) -> EventCategory {
        match self {
            Self::PlanCompleted { .. } => EventCategory::Plan,
            Self::ExecutionStarted { .. }
            | Self::BatchStarted { .. }
            | Self::ResourceApplied { .. }
            | Self::BatchCompleted { .. }
            | Self::ExecutionCompleted { .. } => EventCategory::Execution,
            Self::RollbackStarted { .. } | Self::RollbackCompleted { .. } => {
                EventCategory::Rollback
            }
            Self::DriftDetected { .. } | Self::DriftCheckFailed { .. } => EventCategory::Drift,
            Self::PolicyViolated { .. } => EventCategory::Policy,
            Self::ApprovalSubmitted { .. } | Self::ApprovalResolved { .. } => {
                EventCategory::Approval
            }
            Self::AuthorizationDenied { .. } => EventCategory::Authorization,
            Self::EngineStarted | Self::EngineStopped => EventCategory::System,
        }
    }
}

/// A subscriber on the bus.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handler name, for logging.
    fn name(&self) -> &str;

    /// Event categories this handler consumes.
    fn categories(&self) -> Vec<EventCategory>;

    async fn handle(&self, event: &EngineEvent) -> EngineResult<()>;
}

/// Synchronous fan-out event bus.
#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(&self, handler: Arc<dyn EventHandler>) {
        let mut handlers = self.handlers.write().await;
        handlers.push(handler);
    }

    /// Deliver an event to every handler subscribed to its category, in
    /// subscription order. Handler failures are logged, never propagated.
    pub async fn publish(&self, event: &EngineEvent) {
        let handlers: Vec<Arc<dyn EventHandler>> = {
            let guard = self.handlers.read().await;
            guard.clone()
        };
        let category = event.category();
        for handler in handlers {
            if !handler.categories().contains(&category) {
                continue;
            }
            if let Err(e) = handler.handle(event).await {
                warn!(handler = handler.name(), error = %e, "event handler failed");
            }
        }
    }

    pub async fn handler_count(&self) -> usize {
        self.handlers.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter {
        categories: Vec<EventCategory>,
        seen: AtomicUsize,
    }

    #[async_trait]
    impl EventHandler for Counter {
        fn name(&self) -> &str {
            "counter"
        }

        fn categories(&self) -> Vec<EventCategory> {
            self.categories.clone()
        }

        async fn handle(&self, _event: &EngineEvent) -> EngineResult<()> {
            self.seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_publish_fans_out_by_category() {
        let bus = EventBus::new();
        let drift_handler = Arc::new(Counter {
            categories: vec![EventCategory::Drift],
            seen: AtomicUsize::new(0),
        });
        let exec_handler = Arc::new(Counter {
            categories: vec![EventCategory::Execution],
            seen: AtomicUsize::new(0),
        });
        bus.subscribe(drift_handler.clone()).await;
        bus.subscribe(exec_handler.clone()).await;

        bus.publish(&EngineEvent::DriftDetected {
            module: "m".to_string(),
            drifted: 1,
            total: 2,
        })
        .await;

        assert_eq!(drift_handler.seen.load(Ordering::SeqCst), 1);
        assert_eq!(exec_handler.seen.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_event_serialization_shape() {
        let event = EngineEvent::AuthorizationDenied {
            user: "eve".to_string(),
            permission: "module:write".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "authorization_denied");
        assert_eq!(json["data"]["user"], "eve");
    }
}
