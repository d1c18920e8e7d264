//! Convergence engine facade.
//!
//! Wires the gates around the plan/apply pipeline: policy evaluation, RBAC
//! permission checks, and the approval workflow bracket every mutating
//! operation, with the event bus observing each step.

use std::sync::Arc;

use tracing::{info, instrument};
use uuid::Uuid;

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::{ApprovalStatus, Module, Permission, Plan};
use crate::services::approval::ApprovalManager;
use crate::services::event_bus::{EngineEvent, EventBus};
use crate::services::executor::{BatchExecutor, ExecutionReport};
use crate::services::planner::Planner;
use crate::services::policy::PolicyEngine;
use crate::services::rbac::RbacManager;

/// Options for an apply run.
#[derive(Debug, Clone, Default)]
pub struct ApplyOptions {
    /// Skip the approval-workflow gate entirely.
    pub auto_approve: bool,
    /// An approved request satisfying the gate.
    pub approval_request: Option<Uuid>,
}

pub struct Engine {
    planner: Arc<Planner>,
    executor: Arc<BatchExecutor>,
    policy: Arc<PolicyEngine>,
    rbac: Arc<RbacManager>,
    approvals: Arc<ApprovalManager>,
    event_bus: Arc<EventBus>,
}

impl Engine {
    pub fn new(
        planner: Arc<Planner>,
        executor: Arc<BatchExecutor>,
        policy: Arc<PolicyEngine>,
        rbac: Arc<RbacManager>,
        approvals: Arc<ApprovalManager>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            planner,
            executor,
            policy,
            rbac,
            approvals,
            event_bus,
        }
    }

    /// Plan: policy gate, read permission, then the planner.
    #[instrument(skip(self, module), fields(module = %module.name()))]
    pub async fn plan(&self, module: &Module, actor: &str) -> EngineResult<Plan> {
        self.check_policy(module).await?;
        self.check_permission(actor, Permission::ModuleRead, module.name())
            .await?;

        let plan = self.planner.plan(module).await?;
        self.event_bus
            .publish(&EngineEvent::PlanCompleted {
                module: module.name().to_string(),
                summary: plan.summary(),
            })
            .await;
        Ok(plan)
    }

    /// Apply: policy gate, write permission, approval gate, then plan and
    /// execute.
    #[instrument(skip(self, module, options), fields(module = %module.name()))]
    pub async fn apply(
        &self,
        module: &Module,
        actor: &str,
        options: ApplyOptions,
    ) -> EngineResult<ExecutionReport> {
        self.check_policy(module).await?;
        self.check_permission(actor, Permission::ModuleWrite, module.name())
            .await?;
        self.check_approval(module, &options).await?;

        let plan = self.planner.plan(module).await?;
        self.event_bus
            .publish(&EngineEvent::PlanCompleted {
                module: module.name().to_string(),
                summary: plan.summary(),
            })
            .await;

        info!(module = %module.name(), "starting apply");
        self.executor.execute(module, &plan).await
    }

    async fn check_policy(&self, module: &Module) -> EngineResult<()> {
        let evaluation = self.policy.evaluate_module(module).await;
        if evaluation.allowed {
            return Ok(());
        }
        for violation in &evaluation.violations {
            self.event_bus
                .publish(&EngineEvent::PolicyViolated {
                    module: module.name().to_string(),
                    policy: violation.policy.clone(),
                    message: violation.message.clone(),
                    resource_id: violation.resource_id.clone(),
                })
                .await;
        }
        Err(EngineError::PolicyDenied {
            subject: module.name().to_string(),
            count: evaluation.violations.len(),
        })
    }

    async fn check_permission(
        &self,
        actor: &str,
        permission: Permission,
        resource: &str,
    ) -> EngineResult<()> {
        if self.rbac.check_permission(actor, permission, resource).await {
            return Ok(());
        }
        self.event_bus
            .publish(&EngineEvent::AuthorizationDenied {
                user: actor.to_string(),
                permission: permission.to_string(),
            })
            .await;
        Err(EngineError::AuthorizationDenied {
            user: actor.to_string(),
            permission: permission.to_string(),
        })
    }

    async fn check_approval(&self, module: &Module, options: &ApplyOptions) -> EngineResult<()> {
        if options.auto_approve {
            return Ok(());
        }
        if !self.approvals.requires_approval("apply", module).await {
            return Ok(());
        }

        let Some(request_id) = options.approval_request else {
            return Err(EngineError::ApprovalRequired {
                action: "apply".to_string(),
                module: module.name().to_string(),
            });
        };
        let request = self
            .approvals
            .get(request_id)
            .await
            .ok_or_else(|| EngineError::ApprovalNotFound(request_id.to_string()))?;
        if request.module != module.name() || request.action != "apply" {
            return Err(EngineError::Config(format!(
                "approval request {request_id} covers {} on {}, not apply on {}",
                request.action,
                request.module,
                module.name()
            )));
        }
        match request.status {
            ApprovalStatus::Approved => Ok(()),
            ApprovalStatus::Expired => Err(EngineError::ApprovalExpired(request_id.to_string())),
            _ => Err(EngineError::ApprovalRequired {
                action: "apply".to_string(),
                module: module.name().to_string(),
            }),
        }
    }
}
