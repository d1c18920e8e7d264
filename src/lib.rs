//! anvil - agentless configuration management and orchestration engine.
//!
//! Converges hosts toward declarative modules of resources through a
//! plan/apply workflow with:
//! - A uniform provider contract (validate, read, diff, apply) per resource kind
//! - Dependency-aware parallel batch execution with rollback
//! - Continuous drift detection on a schedule
//! - Policy, RBAC, and approval gates around mutating operations
//! - An append-only audit trail and notification fan-out

pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod providers;
pub mod services;

// Re-export key types for convenience
pub use domain::errors::{EngineError, EngineResult};
pub use domain::models::{Module, Plan, Resource};
