//! Approval workflow manager.
//!
//! Matches gated actions against registered workflows and walks approval
//! requests through their stages. State lives behind a reader-writer lock
//! and every accessor returns by-value copies.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::{
    ApprovalDecision, ApprovalRequest, ApprovalStatus, Module, Workflow,
};
use crate::services::event_bus::{EngineEvent, EventBus};

pub struct ApprovalManager {
    workflows: RwLock<Vec<Workflow>>,
    requests: RwLock<HashMap<Uuid, ApprovalRequest>>,
    event_bus: Option<Arc<EventBus>>,
}

impl Default for ApprovalManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ApprovalManager {
    pub fn new() -> Self {
        Self {
            workflows: RwLock::new(Vec::new()),
            requests: RwLock::new(HashMap::new()),
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Register a workflow. Workflows are matched in registration order;
    /// the first match wins.
    pub async fn add_workflow(&self, workflow: Workflow) -> EngineResult<()> {
        if workflow.name.trim().is_empty() {
            return Err(EngineError::Config(
                "workflow name must not be empty".to_string(),
            ));
        }
        if workflow.stages.is_empty() {
            return Err(EngineError::Config(format!(
                "workflow {} has no stages",
                workflow.name
            )));
        }
        for stage in &workflow.stages {
            if stage.required_count == 0 || stage.required_count > stage.approvers.len() {
                return Err(EngineError::Config(format!(
                    "workflow {} stage {}: required_count {} out of range for {} approver(s)",
                    workflow.name,
                    stage.name,
                    stage.required_count,
                    stage.approvers.len()
                )));
            }
        }

        let mut workflows = self.workflows.write().await;
        if workflows.iter().any(|w| w.name == workflow.name) {
            return Err(EngineError::Config(format!(
                "workflow already registered: {}",
                workflow.name
            )));
        }
        workflows.push(workflow);
        Ok(())
    }

    /// Whether any workflow gates this (action, module) pair.
    pub async fn requires_approval(&self, action: &str, module: &Module) -> bool {
        let workflows = self.workflows.read().await;
        workflows.iter().any(|w| w.matches(action, module))
    }

    /// Submit a request for a gated action. Fails when no workflow
    /// matches.
    pub async fn submit(
        &self,
        submitter: &str,
        action: &str,
        module: &Module,
    ) -> EngineResult<ApprovalRequest> {
        let workflow = {
            let workflows = self.workflows.read().await;
            workflows
                .iter()
                .find(|w| w.matches(action, module))
                .cloned()
        }
        .ok_or_else(|| {
            EngineError::Config(format!(
                "no workflow matches action {action} on module {}",
                module.name()
            ))
        })?;

        let request = ApprovalRequest::new(submitter, action, module.name(), &workflow);
        info!(
            request = %request.id,
            workflow = %workflow.name,
            module = %module.name(),
            "approval request submitted"
        );

        {
            let mut requests = self.requests.write().await;
            requests.insert(request.id, request.clone());
        }
        self.publish(EngineEvent::ApprovalSubmitted {
            request_id: request.id.to_string(),
            module: module.name().to_string(),
            action: action.to_string(),
        })
        .await;
        Ok(request)
    }

    /// Record an approve decision; advances stages and resolves the
    /// request once the final stage is satisfied.
    pub async fn approve(
        &self,
        request_id: Uuid,
        approver: &str,
        comment: Option<String>,
    ) -> EngineResult<ApprovalRequest> {
        let resolved = self
            .decide(request_id, approver, true, comment)
            .await?;
        if resolved.status == ApprovalStatus::Approved {
            self.publish(EngineEvent::ApprovalResolved {
                request_id: request_id.to_string(),
                status: ApprovalStatus::Approved,
            })
            .await;
        }
        Ok(resolved)
    }

    /// Record a reject decision; rejection at any stage is terminal.
    pub async fn reject(
        &self,
        request_id: Uuid,
        approver: &str,
        comment: Option<String>,
    ) -> EngineResult<ApprovalRequest> {
        let resolved = self
            .decide(request_id, approver, false, comment)
            .await?;
        self.publish(EngineEvent::ApprovalResolved {
            request_id: request_id.to_string(),
            status: ApprovalStatus::Rejected,
        })
        .await;
        Ok(resolved)
    }

    async fn decide(
        &self,
        request_id: Uuid,
        approver: &str,
        approved: bool,
        comment: Option<String>,
    ) -> EngineResult<ApprovalRequest> {
        let workflow = {
            let requests = self.requests.read().await;
            let request = requests
                .get(&request_id)
                .ok_or_else(|| EngineError::ApprovalNotFound(request_id.to_string()))?;
            self.workflow_of(request).await?
        };

        let mut requests = self.requests.write().await;
        let request = requests
            .get_mut(&request_id)
            .ok_or_else(|| EngineError::ApprovalNotFound(request_id.to_string()))?;

        if request.status != ApprovalStatus::Pending {
            return Err(EngineError::Config(format!(
                "request {request_id} is already {}",
                status_str(request.status)
            )));
        }
        if request.is_expired(Utc::now()) {
            request.status = ApprovalStatus::Expired;
            return Err(EngineError::ApprovalExpired(request_id.to_string()));
        }

        let stage = workflow
            .stages
            .get(request.current_stage)
            .ok_or_else(|| EngineError::Config(format!(
                "request {request_id} references stage {} beyond workflow {}",
                request.current_stage, workflow.name
            )))?;
        if !stage.approvers.iter().any(|a| a == approver) {
            return Err(EngineError::ApprovalUnauthorized {
                request_id: request_id.to_string(),
                approver: approver.to_string(),
            });
        }
        if request
            .approvals
            .iter()
            .any(|d| d.stage == request.current_stage && d.approver == approver)
        {
            return Err(EngineError::Config(format!(
                "{approver} already decided on stage {} of request {request_id}",
                stage.name
            )));
        }

        request.approvals.push(ApprovalDecision {
            approver: approver.to_string(),
            approved,
            comment,
            stage: request.current_stage,
            decided_at: Utc::now(),
        });

        if !approved {
            request.status = ApprovalStatus::Rejected;
            info!(request = %request_id, approver, "request rejected");
            return Ok(request.clone());
        }

        if request.approvals_for_stage(request.current_stage) >= stage.required_count {
            request.current_stage += 1;
            debug!(
                request = %request_id,
                stage = request.current_stage,
                "stage satisfied"
            );
            if request.current_stage >= workflow.stages.len() {
                request.status = ApprovalStatus::Approved;
                info!(request = %request_id, "request approved");
            }
        }

        Ok(request.clone())
    }

    async fn workflow_of(&self, request: &ApprovalRequest) -> EngineResult<Workflow> {
        let workflows = self.workflows.read().await;
        workflows
            .iter()
            .find(|w| w.name == request.workflow_name)
            .cloned()
            .ok_or_else(|| {
                EngineError::Config(format!(
                    "workflow {} no longer registered",
                    request.workflow_name
                ))
            })
    }

    pub async fn get(&self, request_id: Uuid) -> Option<ApprovalRequest> {
        let requests = self.requests.read().await;
        requests.get(&request_id).cloned()
    }

    /// Pending requests, expiring stale ones on the way out.
    pub async fn list_pending(&self) -> Vec<ApprovalRequest> {
        let now = Utc::now();
        let mut requests = self.requests.write().await;
        for request in requests.values_mut() {
            if request.status == ApprovalStatus::Pending && request.is_expired(now) {
                request.status = ApprovalStatus::Expired;
            }
        }
        let mut pending: Vec<ApprovalRequest> = requests
            .values()
            .filter(|r| r.status == ApprovalStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|r| r.created_at);
        pending
    }

    async fn publish(&self, event: EngineEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish(&event).await;
        }
    }
}

fn status_str(status: ApprovalStatus) -> &'static str {
    match status {
        ApprovalStatus::Pending => "pending",
        ApprovalStatus::Approved => "approved",
        ApprovalStatus::Rejected => "rejected",
        ApprovalStatus::Expired => "expired",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{ConditionOperator, WorkflowCondition, WorkflowStage};

    fn two_stage_workflow() -> Workflow {
        Workflow {
            name: "prod-apply".to_string(),
            stages: vec![
                WorkflowStage {
                    name: "security".to_string(),
                    approvers: vec!["security-lead".to_string()],
                    required_count: 1,
                },
                WorkflowStage {
                    name: "ops".to_string(),
                    approvers: vec!["ops-lead".to_string()],
                    required_count: 1,
                },
            ],
            conditions: vec![WorkflowCondition {
                field: "action".to_string(),
                operator: ConditionOperator::Equals,
                value: "apply".to_string(),
            }],
            timeout_secs: 24 * 60 * 60,
        }
    }

    fn prod_module() -> Module {
        Module::new("prod-module", "1.0.0").with_label("environment", "production")
    }

    async fn manager() -> ApprovalManager {
        let manager = ApprovalManager::new();
        manager.add_workflow(two_stage_workflow()).await.unwrap();
        manager
    }

    #[tokio::test]
    async fn test_submit_without_matching_workflow_fails() {
        let manager = manager().await;
        assert!(manager
            .submit("dev", "plan", &prod_module())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_multi_stage_approval_walkthrough() {
        let manager = manager().await;
        let request = manager
            .submit("dev", "apply", &prod_module())
            .await
            .unwrap();
        assert_eq!(request.status, ApprovalStatus::Pending);
        assert_eq!(request.current_stage, 0);

        let after_first = manager
            .approve(request.id, "security-lead", None)
            .await
            .unwrap();
        assert_eq!(after_first.status, ApprovalStatus::Pending);
        assert_eq!(after_first.current_stage, 1);

        let after_second = manager
            .approve(request.id, "ops-lead", None)
            .await
            .unwrap();
        assert_eq!(after_second.status, ApprovalStatus::Approved);
    }

    #[tokio::test]
    async fn test_rejection_is_terminal() {
        let manager = manager().await;
        let request = manager.submit("dev", "apply", &prod_module()).await.unwrap();

        let rejected = manager
            .reject(request.id, "security-lead", Some("nope".to_string()))
            .await
            .unwrap();
        assert_eq!(rejected.status, ApprovalStatus::Rejected);

        // No further decisions are accepted.
        assert!(manager
            .approve(request.id, "security-lead", None)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_unlisted_approver_rejected() {
        let manager = manager().await;
        let request = manager.submit("dev", "apply", &prod_module()).await.unwrap();

        let err = manager
            .approve(request.id, "random-user", None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ApprovalUnauthorized { .. }));

        // ops-lead belongs to stage 1, not the current stage 0.
        assert!(manager.approve(request.id, "ops-lead", None).await.is_err());
    }

    #[tokio::test]
    async fn test_duplicate_decision_rejected() {
        let workflow = Workflow {
            stages: vec![WorkflowStage {
                name: "board".to_string(),
                approvers: vec!["a".to_string(), "b".to_string()],
                required_count: 2,
            }],
            ..two_stage_workflow()
        };
        let manager = ApprovalManager::new();
        manager.add_workflow(workflow).await.unwrap();
        let request = manager.submit("dev", "apply", &prod_module()).await.unwrap();

        manager.approve(request.id, "a", None).await.unwrap();
        assert!(manager.approve(request.id, "a", None).await.is_err());

        let resolved = manager.approve(request.id, "b", None).await.unwrap();
        assert_eq!(resolved.status, ApprovalStatus::Approved);
    }

    #[tokio::test]
    async fn test_expired_request_flips_and_fails() {
        let manager = manager().await;
        let request = manager.submit("dev", "apply", &prod_module()).await.unwrap();

        {
            let mut requests = manager.requests.write().await;
            requests.get_mut(&request.id).unwrap().expires_at =
                Utc::now() - chrono::Duration::seconds(1);
        }

        let err = manager
            .approve(request.id, "security-lead", None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ApprovalExpired(_)));
        assert_eq!(
            manager.get(request.id).await.unwrap().status,
            ApprovalStatus::Expired
        );
    }

    #[tokio::test]
    async fn test_invalid_workflow_rejected() {
        let manager = ApprovalManager::new();
        let mut workflow = two_stage_workflow();
        workflow.stages[0].required_count = 5;
        assert!(manager.add_workflow(workflow).await.is_err());

        let mut empty = two_stage_workflow();
        empty.stages.clear();
        assert!(manager.add_workflow(empty).await.is_err());
    }
}
