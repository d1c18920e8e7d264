//! anvil CLI entry point

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use anvil::cli::{commands, Cli, Commands};
use anvil::infrastructure::config::ConfigLoader;
use anvil::infrastructure::transport::LocalExecutor;
use anvil::providers;
use anvil::services::{
    ApprovalManager, AuditEventBridge, AuditLogConfig, AuditLogger, BatchExecutor, Engine,
    EventBus, ExecutorConfig, Planner, PolicyEngine, RbacManager, RetryPolicy, RollbackManager,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Init runs before any configuration exists.
    if let Commands::Init { name, force } = &cli.command {
        let code = commands::init::handle_init(name.clone(), *force).await?;
        std::process::exit(code);
    }

    let config = ConfigLoader::load().context("Failed to load configuration")?;
    init_tracing(&config.logging.level, &config.logging.format);

    let transport = Arc::new(LocalExecutor::new());
    let registry = Arc::new(
        providers::builtin_registry(transport.clone()).context("Failed to register providers")?,
    );

    let event_bus = Arc::new(EventBus::new());
    let audit = AuditLogger::new(AuditLogConfig::from_config(&config))
        .context("Failed to open audit log")?;
    event_bus
        .subscribe(Arc::new(AuditEventBridge::new(audit.clone())))
        .await;

    let planner = Arc::new(Planner::new(registry.clone()));
    let rollback = Arc::new(RollbackManager::new(
        registry.clone(),
        RetryPolicy::new(
            config.rollback.max_retries,
            config.rollback.retry_delay(),
        ),
    ));
    let mut executor = BatchExecutor::new(
        registry.clone(),
        transport,
        ExecutorConfig::from_config(&config),
    )
    .with_event_bus(event_bus.clone());
    if config.rollback.enabled {
        executor = executor.with_rollback(rollback);
    }

    let policy = Arc::new(PolicyEngine::new());
    // The CLI runs unauthenticated; RBAC activates when a user store is
    // configured by an embedding service.
    let rbac = Arc::new(RbacManager::new());
    rbac.set_enabled(false);
    let approvals = Arc::new(ApprovalManager::new().with_event_bus(event_bus.clone()));

    let engine = Engine::new(
        planner,
        Arc::new(executor),
        policy,
        rbac,
        approvals,
        event_bus,
    );

    let actor = std::env::var("USER").unwrap_or_else(|_| "operator".to_string());

    let code = match cli.command {
        Commands::Init { .. } => unreachable!("handled above"),
        Commands::Plan {
            module,
            inventory,
            output,
        } => {
            commands::plan::handle_plan(
                &engine,
                &actor,
                &module,
                inventory.as_deref(),
                output.as_deref(),
                cli.json,
            )
            .await?
        }
        Commands::Apply {
            module,
            inventory,
            dry_run,
            auto_approve,
        } => {
            commands::apply::handle_apply(
                &engine,
                &actor,
                &module,
                inventory.as_deref(),
                dry_run,
                auto_approve,
                cli.json,
            )
            .await?
        }
    };

    audit.close().await.ok();
    std::process::exit(code);
}

fn init_tracing(level: &str, format: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    if format == "json" {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
