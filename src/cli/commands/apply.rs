//! `anvil apply`: execute the computed change set.

use anyhow::Result;
use tracing::debug;

use crate::cli::render;
use crate::infrastructure::loader;
use crate::services::engine::{ApplyOptions, Engine};

pub async fn handle_apply(
    engine: &Engine,
    actor: &str,
    module_path: &str,
    inventory_path: Option<&str>,
    dry_run: bool,
    auto_approve: bool,
    json: bool,
) -> Result<i32> {
    let module = loader::load_module(module_path).await?;
    if let Some(inventory_path) = inventory_path {
        let inventory = loader::load_inventory(inventory_path).await?;
        let targets = loader::resolve_targets(&inventory, None).await?;
        debug!(groups = targets.len(), "inventory resolved");
    }

    if dry_run {
        let plan = engine.plan(&module, actor).await?;
        println!("{}", render::render_plan(&plan));
        println!("Dry run: nothing applied.");
        return Ok(if plan.has_errors() { 1 } else { 0 });
    }

    let report = engine
        .apply(
            &module,
            actor,
            ApplyOptions {
                auto_approve,
                approval_request: None,
            },
        )
        .await?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "module": report.module,
                "succeeded": report.summary.succeeded,
                "failed": report.summary.failed,
                "skipped": report.summary.skipped,
            }))?
        );
    } else {
        println!("{}", render::render_report(&report));
    }

    Ok(if report.succeeded() { 0 } else { 1 })
}
