//! Engine services: planning, execution, drift, gates, and observability.

pub mod approval;
pub mod audit_log;
pub mod drift;
pub mod drift_scheduler;
pub mod engine;
pub mod event_bus;
pub mod executor;
pub mod graph;
pub mod notifications;
pub mod planner;
pub mod policy;
pub mod rbac;
pub mod recovery;
pub mod rollback;

pub use approval::ApprovalManager;
pub use audit_log::{AuditEventBridge, AuditFilter, AuditLogConfig, AuditLogger, AuditStats};
pub use drift::{DriftConfig, DriftDetector};
pub use drift_scheduler::{DriftScheduler, ScheduleSpec, ScheduleStatus, SchedulerDefaults};
pub use engine::{ApplyOptions, Engine};
pub use event_bus::{EngineEvent, EventBus, EventCategory, EventHandler};
pub use executor::{BatchExecutor, ExecutionReport, ExecutorConfig};
pub use graph::DependencyGraph;
pub use notifications::{
    ConsoleChannel, DataCondition, EmailChannel, FileChannel, NotificationManager,
    NotificationRule, SlackChannel, TokenBucketRateLimiter, WebhookChannel,
};
pub use planner::Planner;
pub use policy::{PolicyEngine, PolicyEvaluation, PolicyViolation};
pub use rbac::RbacManager;
pub use recovery::{classify, ErrorClass, RecoveryDispatcher, RecoveryStrategy, RetryPolicy};
pub use rollback::RollbackManager;
