use std::path::Path;

use anyhow::{Context, Result};
use orgflow_state::{SqliteStateBackend, StateBackend};

/// Execute the `history` command: list runs, or drill into one run.
pub fn execute(state_path: &Path, run: Option<i64>, limit: u32) -> Result<()> {
    let state = SqliteStateBackend::open(state_path)
        .with_context(|| format!("Failed to open state db: {}", state_path.display()))?;

    match run {
        Some(run_id) => print_run_detail(&state, run_id, limit),
        None => print_run_list(&state, limit),
    }
}

fn print_run_list(state: &SqliteStateBackend, limit: u32) -> Result<()> {
    let runs = state.list_runs(limit)?;
    if runs.is_empty() {
        println!("No runs recorded.");
        return Ok(());
    }
    println!(
        "{:>6}  {:24} {:12} {:>8} {:>8} {:>8}  {}",
        "run", "template", "status", "total", "ok", "failed", "started"
    );
    for row in runs {
        println!(
            "{:>6}  {:24} {:12} {:>8} {:>8} {:>8}  {}",
            row.run_id,
            row.template_id.as_str(),
            row.status.as_str(),
            row.total_records,
            row.successful_records,
            row.failed_records,
            row.started_at
        );
    }
    Ok(())
}

fn print_run_detail(state: &SqliteStateBackend, run_id: i64, limit: u32) -> Result<()> {
    let steps = state.step_results(run_id)?;
    if steps.is_empty() {
        println!("No steps recorded for run {run_id}.");
        return Ok(());
    }
    for step in steps {
        println!(
            "{:30} {:10} {:>6} ok / {:>4} failed",
            step.step_name,
            step.status.as_str(),
            step.successful_records,
            step.failed_records
        );
        let errors = state.record_errors(run_id, &step.step_name, limit)?;
        for error in errors {
            println!(
                "    {} {}: {}",
                error.record_id.as_deref().unwrap_or("-"),
                error.code,
                error.message
            );
        }
    }
    Ok(())
}
