//! Gate behavior around plan and apply: policy, RBAC, and approvals.

mod common;

use std::sync::Arc;

use anvil::domain::errors::EngineError;
use anvil::domain::models::{
    ConditionOperator, Module, Permission, Resource, ResourceState, Role, User, Workflow,
    WorkflowCondition, WorkflowStage,
};
use anvil::infrastructure::transport::LocalExecutor;
use anvil::providers::ProviderRegistry;
use anvil::services::{
    ApplyOptions, ApprovalManager, BatchExecutor, Engine, EventBus, ExecutorConfig, Planner,
    PolicyEngine, RbacManager,
};
use common::{empty_world, FakeProvider};

struct Harness {
    engine: Engine,
    policy: Arc<PolicyEngine>,
    rbac: Arc<RbacManager>,
    approvals: Arc<ApprovalManager>,
}

fn harness() -> Harness {
    let world = empty_world();
    let registry = ProviderRegistry::new();
    registry
        .register(Arc::new(FakeProvider::new("pkg", world)))
        .unwrap();
    let registry = Arc::new(registry);

    let event_bus = Arc::new(EventBus::new());
    let policy = Arc::new(PolicyEngine::new());
    let rbac = Arc::new(RbacManager::new());
    let approvals = Arc::new(ApprovalManager::new());

    let planner = Arc::new(Planner::new(registry.clone()));
    let executor = Arc::new(BatchExecutor::new(
        registry,
        Arc::new(LocalExecutor::new()),
        ExecutorConfig {
            max_concurrency: 2,
            resource_timeout: std::time::Duration::from_secs(5),
            transient_retries: 0,
            transient_retry_delay: std::time::Duration::from_millis(1),
        },
    ));

    let engine = Engine::new(
        planner,
        executor,
        policy.clone(),
        rbac.clone(),
        approvals.clone(),
        event_bus,
    );
    Harness {
        engine,
        policy,
        rbac,
        approvals,
    }
}

fn module() -> Module {
    Module::new("gated", "1.0.0")
        .with_label("environment", "production")
        .with_resource(Resource::new("pkg", "git").with_state(ResourceState::Present))
}

async fn operator(rbac: &RbacManager, name: &str, roles: &[&str]) {
    rbac.create_user(User {
        username: name.to_string(),
        email: format!("{name}@example.com"),
        roles: roles.iter().map(|s| (*s).to_string()).collect(),
        active: true,
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn policy_violation_blocks_plan() {
    let h = harness();
    h.rbac.set_enabled(false);
    h.policy.set_policy("ban", "deny type=pkg\n").await.unwrap();

    let err = h.engine.plan(&module(), "anyone").await.unwrap_err();
    assert!(matches!(err, EngineError::PolicyDenied { count: 1, .. }));

    // Disabling the policy engine unblocks planning.
    h.policy.set_enabled(false);
    assert!(h.engine.plan(&module(), "anyone").await.is_ok());
}

#[tokio::test]
async fn rbac_gates_plan_and_apply() {
    let h = harness();
    operator(&h.rbac, "reader", &["readonly"]).await;
    operator(&h.rbac, "op", &["operator"]).await;

    // A reader can plan but not apply.
    assert!(h.engine.plan(&module(), "reader").await.is_ok());
    let err = h
        .engine
        .apply(&module(), "reader", ApplyOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::AuthorizationDenied { .. }));

    // An operator can apply.
    let report = h
        .engine
        .apply(&module(), "op", ApplyOptions::default())
        .await
        .unwrap();
    assert!(report.succeeded());

    // Unknown users are denied outright.
    assert!(h.engine.plan(&module(), "stranger").await.is_err());
}

#[tokio::test]
async fn approval_gate_blocks_until_approved() {
    let h = harness();
    h.rbac.set_enabled(false);
    h.approvals
        .add_workflow(Workflow {
            name: "prod-gate".to_string(),
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
                field: "environment".to_string(),
                operator: ConditionOperator::Equals,
                value: "production".to_string(),
            }],
            timeout_secs: 3600,
        })
        .await
        .unwrap();

    // No approval request: blocked.
    let err = h
        .engine
        .apply(&module(), "dev", ApplyOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ApprovalRequired { .. }));

    // Pending request: still blocked.
    let request = h.approvals.submit("dev", "apply", &module()).await.unwrap();
    let options = ApplyOptions {
        auto_approve: false,
        approval_request: Some(request.id),
    };
    assert!(h
        .engine
        .apply(&module(), "dev", options.clone())
        .await
        .is_err());

    // Walk both stages, then apply passes.
    h.approvals
        .approve(request.id, "security-lead", None)
        .await
        .unwrap();
    h.approvals
        .approve(request.id, "ops-lead", None)
        .await
        .unwrap();
    let report = h.engine.apply(&module(), "dev", options).await.unwrap();
    assert!(report.succeeded());
}

#[tokio::test]
async fn auto_approve_bypasses_gate() {
    let h = harness();
    h.rbac.set_enabled(false);
    h.approvals
        .add_workflow(Workflow {
            name: "gate".to_string(),
            stages: vec![WorkflowStage {
                name: "ops".to_string(),
                approvers: vec!["ops-lead".to_string()],
                required_count: 1,
            }],
            conditions: vec![],
            timeout_secs: 3600,
        })
        .await
        .unwrap();

    let report = h
        .engine
        .apply(
            &module(),
            "dev",
            ApplyOptions {
                auto_approve: true,
                approval_request: None,
            },
        )
        .await
        .unwrap();
    assert!(report.succeeded());
}

#[tokio::test]
async fn non_matching_workflow_requires_no_approval() {
    let h = harness();
    h.rbac.set_enabled(false);
    h.approvals
        .add_workflow(Workflow {
            name: "staging-only".to_string(),
            stages: vec![WorkflowStage {
                name: "ops".to_string(),
                approvers: vec!["ops-lead".to_string()],
                required_count: 1,
            }],
            conditions: vec![WorkflowCondition {
                field: "environment".to_string(),
                operator: ConditionOperator::Equals,
                value: "staging".to_string(),
            }],
            timeout_secs: 3600,
        })
        .await
        .unwrap();

    let report = h
        .engine
        .apply(&module(), "dev", ApplyOptions::default())
        .await
        .unwrap();
    assert!(report.succeeded());
}

#[tokio::test]
async fn rbac_permission_matrix() {
    let h = harness();
    let custom = Role {
        name: "auditor".to_string(),
        description: "Reads audit trails".to_string(),
        permissions: vec![Permission::AuditRead, Permission::ModuleRead],
    };
    h.rbac.create_role(custom).await.unwrap();
    operator(&h.rbac, "aud", &["auditor"]).await;

    assert!(h.rbac.check_permission("aud", Permission::AuditRead, "log").await);
    assert!(!h.rbac.check_permission("aud", Permission::ModuleWrite, "m").await);
}
