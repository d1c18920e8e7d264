//! `anvil plan`: compute and render the change set.

use anyhow::{Context, Result};
use tracing::debug;

use crate::cli::render;
use crate::infrastructure::loader;
use crate::services::engine::Engine;

pub async fn handle_plan(
    engine: &Engine,
    actor: &str,
    module_path: &str,
    inventory_path: Option<&str>,
    output_path: Option<&str>,
    json: bool,
) -> Result<i32> {
    let module = loader::load_module(module_path).await?;
    if let Some(inventory_path) = inventory_path {
        let inventory = loader::load_inventory(inventory_path).await?;
        let targets = loader::resolve_targets(&inventory, None).await?;
        debug!(groups = targets.len(), "inventory resolved");
    }

    let plan = engine.plan(&module, actor).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plan.export())?);
    } else {
        println!("{}", render::render_plan(&plan));
    }

    if let Some(output_path) = output_path {
        let export = serde_json::to_string_pretty(&plan.export())?;
        tokio::fs::write(output_path, export)
            .await
            .with_context(|| format!("failed to write plan export to {output_path}"))?;
    }

    Ok(if plan.has_errors() { 1 } else { 0 })
}
