//! Terminal rendering for plans and execution reports.

use comfy_table::{presets::UTF8_FULL, Cell, Table};
use console::style;

use crate::domain::models::{Action, Plan};
use crate::services::ExecutionReport;

/// Render a plan as a table plus a one-line summary.
pub fn render_plan(plan: &Plan) -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Resource", "Action", "Changes", "Error"]);

    for change in &plan.changes {
        let action = match change.action {
            Action::Create => style("create").green().to_string(),
            Action::Update => style("update").yellow().to_string(),
            Action::Delete => style("delete").red().to_string(),
            Action::Noop => style("noop").dim().to_string(),
        };
        let changes = change
            .diff
            .as_ref()
            .map(|diff| {
                diff.changes
                    .keys()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .unwrap_or_default();
        table.add_row(vec![
            Cell::new(change.resource_id()),
            Cell::new(action),
            Cell::new(changes),
            Cell::new(change.error.clone().unwrap_or_default()),
        ]);
    }

    let summary = plan.summary();
    format!(
        "{table}\nPlan: {} to create, {} to update, {} to delete, {} unchanged, {} error(s)",
        summary.to_create, summary.to_update, summary.to_delete, summary.no_changes, summary.errors
    )
}

/// Render an execution report summary.
pub fn render_report(report: &ExecutionReport) -> String {
    let mut lines = vec![format!(
        "Apply complete for {}: {} succeeded, {} failed, {} skipped in {:.1?}",
        report.module,
        report.summary.succeeded,
        report.summary.failed,
        report.summary.skipped,
        report.summary.duration
    )];
    for result in report.results.iter().filter(|r| !r.success) {
        lines.push(format!(
            "  {} {}: {}",
            style("failed").red(),
            result.resource_id,
            result.error.as_deref().unwrap_or("unknown error")
        ));
    }
    if let Some(rollback) = &report.rollback {
        lines.push(format!(
            "Rollback: {} reverted, {} failed",
            rollback.succeeded, rollback.failed
        ));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{Change, Resource};

    #[test]
    fn test_render_plan_mentions_counts() {
        let mut plan = Plan::new("m", "1.0.0");
        plan.changes.push(Change {
            resource: Resource::new("pkg", "git"),
            action: Action::Create,
            diff: None,
            error: None,
        });
        let rendered = render_plan(&plan);
        assert!(rendered.contains("pkg.git"));
        assert!(rendered.contains("1 to create"));
    }
}
