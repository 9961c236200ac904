use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use orgflow_engine::hooks::TracingHook;
use orgflow_engine::template::parser;
use orgflow_engine::template::validator;
use orgflow_engine::Orchestrator;
use orgflow_state::SqliteStateBackend;
use orgflow_types::result::{RunResult, RunStatus, StepStatus};

use crate::config::ConnectionsConfig;

/// Execute the `run` command: migrate a template end to end.
pub async fn execute(
    template_path: &Path,
    connections_path: &Path,
    select: Vec<String>,
    state_path: &Path,
) -> Result<()> {
    let template = parser::parse_template(template_path)
        .with_context(|| format!("Failed to parse template: {}", template_path.display()))?;
    validator::validate_template(&template)?;

    let connections = ConnectionsConfig::load(connections_path)?;
    let (source, target) = connections.clients()?;

    let state = Arc::new(
        SqliteStateBackend::open(state_path)
            .with_context(|| format!("Failed to open state db: {}", state_path.display()))?,
    );
    let orchestrator = Orchestrator::new(state).with_hook(Arc::new(TracingHook));

    let result = orchestrator
        .run(&source, &target, &template, select)
        .await?;
    print_run(&result);

    match result.status {
        RunStatus::Completed | RunStatus::PartialSuccess => Ok(()),
        _ => anyhow::bail!("Run {} finished with status {}", result.run_id, result.status),
    }
}

fn print_run(result: &RunResult) {
    println!(
        "Run {} [{}]: {} -> {}",
        result.run_id, result.status, result.source_org, result.target_org
    );
    for step in &result.steps {
        let marker = match step.status {
            StepStatus::Completed => "ok",
            StepStatus::Failed => "FAILED",
            StepStatus::Skipped => "skipped",
            _ => step.status.as_str(),
        };
        println!(
            "  {:30} {:8} {:>6} ok / {:>4} failed",
            step.step_name, marker, step.successful_records, step.failed_records
        );
        for error in step.errors.iter().take(5) {
            println!(
                "      {} {}: {}",
                error.record_id.as_deref().unwrap_or("-"),
                error.code,
                error.message
            );
        }
        if step.errors.len() > 5 {
            println!("      ... and {} more (see history)", step.errors.len() - 5);
        }
    }
    println!(
        "Total: {} records, {} succeeded, {} failed",
        result.total_records, result.successful_records, result.failed_records
    );
}
