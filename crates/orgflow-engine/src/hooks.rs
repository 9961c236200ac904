//! Observation hooks invoked at run and step boundaries.
//!
//! Hooks observe; they cannot alter control flow. A hook that needs to
//! veto a run belongs in validation instead.

use async_trait::async_trait;
use orgflow_types::record::Record;
use orgflow_types::result::{RunResult, StepResult};

use crate::context::ExecutionContext;

/// Callbacks fired by the orchestrator as a run progresses. All
/// methods default to no-ops so implementors override only what they
/// observe.
#[async_trait]
pub trait RunHook: Send + Sync {
    async fn before_run(&self, _ctx: &ExecutionContext) {}

    /// Fired after a step's extract phase with the records pulled from
    /// the source org.
    async fn after_extract(&self, _ctx: &ExecutionContext, _step_name: &str, _records: &[Record]) {
    }

    /// Fired just before a step's load phase with the transformed
    /// records about to be upserted.
    async fn before_load(&self, _ctx: &ExecutionContext, _step_name: &str, _records: &[Record]) {}

    async fn after_step(&self, _ctx: &ExecutionContext, _result: &StepResult) {}

    async fn after_run(&self, _ctx: &ExecutionContext, _result: &RunResult) {}
}

/// Hook that reports progress through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingHook;

#[async_trait]
impl RunHook for TracingHook {
    async fn before_run(&self, ctx: &ExecutionContext) {
        tracing::info!(
            run_id = ctx.run_id,
            template = %ctx.template_id,
            source = %ctx.source_org,
            target = %ctx.target_org,
            "Migration run started"
        );
    }

    async fn after_extract(&self, ctx: &ExecutionContext, step_name: &str, records: &[Record]) {
        tracing::info!(
            run_id = ctx.run_id,
            step = step_name,
            records = records.len(),
            "Extract complete"
        );
    }

    async fn after_step(&self, ctx: &ExecutionContext, result: &StepResult) {
        tracing::info!(
            run_id = ctx.run_id,
            step = %result.step_name,
            status = %result.status.as_str(),
            successful = result.successful_records,
            failed = result.failed_records,
            "Step finished"
        );
    }

    async fn after_run(&self, ctx: &ExecutionContext, result: &RunResult) {
        tracing::info!(
            run_id = ctx.run_id,
            status = %result.status.as_str(),
            successful = result.successful_records,
            failed = result.failed_records,
            "Migration run finished"
        );
    }
}
