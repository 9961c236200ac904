//! Run orchestration: owns the global run slot, walks steps in
//! execution order, persists progress, and derives the final status.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use orgflow_types::error::ApiErrorCategory;
use orgflow_types::result::{RecordError, RunResult, RunStatus, StepResult, StepStatus};
use orgflow_types::template::MigrationTemplate;
use orgflow_state::StateBackend;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::client::OrgClient;
use crate::context::ExecutionContext;
use crate::errors::EngineError;
use crate::executor::StepExecutor;
use crate::hooks::RunHook;
use crate::resolve::{prepare_plan, ResolvedPlan};
use crate::schema::SchemaResolver;
use crate::template::validator::validate_template;

/// Drives migration runs. Holds the single run slot: at most one run
/// is active per orchestrator at any time, and a second `run` call
/// while one is in flight fails immediately with
/// [`EngineError::Concurrency`] rather than queueing.
pub struct Orchestrator {
    state: Arc<dyn StateBackend>,
    hooks: Vec<Arc<dyn RunHook>>,
    run_slot: Mutex<()>,
}

impl Orchestrator {
    #[must_use]
    pub fn new(state: Arc<dyn StateBackend>) -> Self {
        Self {
            state,
            hooks: Vec::new(),
            run_slot: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn with_hook(mut self, hook: Arc<dyn RunHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Execute a template end to end.
    ///
    /// Steps run strictly in `execution_order`. A failed step marks
    /// every transitive dependent as skipped; unrelated steps still
    /// run. Auth failures abort the remainder of the run.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Concurrency`] when a run is already
    /// active, [`EngineError::Configuration`] for invalid templates,
    /// [`EngineError::Schema`]/[`EngineError::Api`] from plan
    /// preparation, and [`EngineError::Infrastructure`] on state
    /// storage failures. Step-level failures do not error; they are
    /// reflected in the returned [`RunResult`].
    pub async fn run(
        &self,
        source: &dyn OrgClient,
        target: &dyn OrgClient,
        template: &MigrationTemplate,
        selected_record_ids: Vec<String>,
    ) -> Result<RunResult, EngineError> {
        validate_template(template)?;

        // Held for the whole run; dropping it on any exit path frees
        // the slot.
        let _slot = self.run_slot.try_lock().map_err(|_| EngineError::Concurrency)?;

        let mut schema = SchemaResolver::new();
        let plan = prepare_plan(target, &mut schema, template, selected_record_ids.clone()).await?;

        let run_id = {
            let state = Arc::clone(&self.state);
            let template_id = template.id.clone();
            let source_org = source.org_id().clone();
            let target_org = target.org_id().clone();
            blocking(move || state.start_run(&template_id, &source_org, &target_org)).await?
        };

        let mut ctx = ExecutionContext::new(
            run_id,
            template.id.clone(),
            source.org_id().clone(),
            target.org_id().clone(),
            selected_record_ids,
        );
        for hook in &self.hooks {
            hook.before_run(&ctx).await;
        }

        let executor = StepExecutor { source, target };
        let mut steps: Vec<StepResult> = Vec::with_capacity(plan.steps.len());
        let driven = self
            .drive_steps(run_id, &plan, &executor, &mut ctx, &mut steps)
            .await;

        // The run row is finalized on every exit path so history never
        // reports a dead run as active.
        let status = match &driven {
            Ok(()) => RunResult::derive_status(&steps),
            Err(_) => RunStatus::Failed,
        };
        let total_records: u64 = steps.iter().map(|s| s.total_records).sum();
        let successful_records: u64 = steps.iter().map(|s| s.successful_records).sum();
        let failed_records: u64 = steps.iter().map(|s| s.failed_records).sum();

        let finalized = {
            let state = Arc::clone(&self.state);
            blocking(move || {
                state.complete_run(run_id, status, total_records, successful_records, failed_records)
            })
            .await
        };
        if let Err(run_error) = driven {
            if let Err(finalize_error) = finalized {
                warn!(run_id, error = %finalize_error, "Failed to finalize aborted run");
            }
            return Err(run_error);
        }
        finalized?;

        let result = RunResult {
            run_id,
            template_id: template.id.clone(),
            source_org: source.org_id().clone(),
            target_org: target.org_id().clone(),
            status,
            steps,
            total_records,
            successful_records,
            failed_records,
            started_at: ctx.started_at,
            finished_at: Utc::now(),
        };
        for hook in &self.hooks {
            hook.after_run(&ctx, &result).await;
        }
        info!(run_id, status = %status.as_str(), "Run complete");
        Ok(result)
    }

    /// Walk the plan's steps, executing or skipping each and persisting
    /// its result. Returns `Err` only for failures that abort the run
    /// wholesale (state storage, configuration); completed and skipped
    /// steps accumulate in `steps` either way.
    async fn drive_steps(
        &self,
        run_id: i64,
        plan: &ResolvedPlan,
        executor: &StepExecutor<'_>,
        ctx: &mut ExecutionContext,
        steps: &mut Vec<StepResult>,
    ) -> Result<(), EngineError> {
        let mut unrunnable: HashSet<String> = HashSet::new();
        let mut abort_remaining = false;

        for resolved in &plan.steps {
            let step = &resolved.step;
            let blocked = step.depends_on.iter().any(|dep| unrunnable.contains(dep));
            if abort_remaining || blocked {
                warn!(step = %step.name, "Skipping step");
                unrunnable.insert(step.name.clone());
                let result = StepResult::skipped(&step.name);
                self.persist_step(run_id, &result).await?;
                for hook in &self.hooks {
                    hook.after_step(ctx, &result).await;
                }
                steps.push(result);
                continue;
            }

            let result = match executor.execute(resolved, ctx, &self.hooks).await {
                Ok(result) => result,
                Err(EngineError::Api(api_error)) => {
                    error!(step = %step.name, error = %api_error, "Step aborted");
                    if api_error.category == ApiErrorCategory::Auth {
                        abort_remaining = true;
                    }
                    step_aborted(&step.name, &api_error)
                }
                Err(other) => return Err(other),
            };

            if result.status == StepStatus::Failed {
                unrunnable.insert(step.name.clone());
            }
            self.persist_step(run_id, &result).await?;
            for hook in &self.hooks {
                hook.after_step(ctx, &result).await;
            }
            steps.push(result);
        }
        Ok(())
    }

    async fn persist_step(&self, run_id: i64, result: &StepResult) -> Result<(), EngineError> {
        let state = Arc::clone(&self.state);
        let result = result.clone();
        blocking(move || {
            state.insert_step_result(run_id, &result)?;
            state.insert_record_errors(run_id, &result.step_name, &result.errors)?;
            Ok(())
        })
        .await
    }
}

/// A step that could not complete any record work because the API
/// call itself failed.
fn step_aborted(step_name: &str, api_error: &orgflow_types::error::ApiError) -> StepResult {
    let now = Utc::now();
    StepResult {
        step_name: step_name.to_string(),
        status: StepStatus::Failed,
        total_records: 0,
        successful_records: 0,
        failed_records: 0,
        errors: vec![RecordError {
            record_id: None,
            external_id: None,
            code: api_error.code.clone(),
            message: api_error.message.clone(),
        }],
        started_at: now,
        finished_at: now,
    }
}

/// Run a synchronous state operation off the async runtime.
async fn blocking<T, F>(f: F) -> Result<T, EngineError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, orgflow_state::StateError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|join| EngineError::Infrastructure(anyhow::anyhow!(join)))?
        .map_err(|state| EngineError::Infrastructure(anyhow::Error::new(state)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{FieldDescribe, ObjectDescribe};
    use crate::mock::MockOrgClient;
    use crate::template::parser::parse_template_str;
    use orgflow_state::SqliteStateBackend;
    use orgflow_types::record::Record;
    use orgflow_types::result::RunStatus;
    use serde_json::json;

    const TEMPLATE: &str = r#"
id: pricing-rules
name: Pricing rules
steps:
  - name: load_products
    extract:
      object: Product__c
      query: "SELECT Id, Name, Migration_Id__c FROM Product__c"
    transform: {}
    load:
      target_object: Product__c
      external_id_field: "{externalIdField}"
      retry:
        retry_wait_secs: 0
  - name: load_rules
    depends_on: [load_products]
    extract:
      object: Pricing_Rule__c
      query: "SELECT Id, Product_Ref__c, Migration_Id__c FROM Pricing_Rule__c"
    transform:
      lookup_mappings:
        - source_field: Product_Ref__c
          target_field: Product__c
          target_object: Product__c
          key_field: Migration_Id__c
    load:
      target_object: Pricing_Rule__c
      external_id_field: "{externalIdField}"
      retry:
        retry_wait_secs: 0
execution_order: [load_products, load_rules]
"#;

    fn record(pairs: serde_json::Value) -> Record {
        Record {
            fields: serde_json::from_value(pairs).expect("object"),
        }
    }

    fn describing(object: &str) -> ObjectDescribe {
        let _ = object;
        ObjectDescribe {
            fields: vec![FieldDescribe {
                name: "Migration_Id__c".to_string(),
                picklist_values: vec![],
            }],
            record_types: vec![],
        }
    }

    fn orgs() -> (MockOrgClient, MockOrgClient) {
        let source = MockOrgClient::new("source");
        let target = MockOrgClient::new("target");
        target.add_describe("Product__c", describing("Product__c"));
        target.add_describe("Pricing_Rule__c", describing("Pricing_Rule__c"));
        source.add_query_result(
            "FROM Product__c",
            vec![record(json!({ "Id": "p1", "Name": "Widget", "Migration_Id__c": "P-1" }))],
        );
        source.add_query_result(
            "FROM Pricing_Rule__c",
            vec![record(
                json!({ "Id": "r1", "Product_Ref__c": "P-1", "Migration_Id__c": "R-1" }),
            )],
        );
        (source, target)
    }

    fn orchestrator() -> Orchestrator {
        Orchestrator::new(Arc::new(
            SqliteStateBackend::in_memory().expect("in-memory state"),
        ))
    }

    #[tokio::test]
    async fn two_step_run_completes_and_propagates_cache() {
        let (source, target) = orgs();
        let orchestrator = orchestrator();
        let template = parse_template_str(TEMPLATE).unwrap();

        let result = orchestrator
            .run(&source, &target, &template, Vec::new())
            .await
            .unwrap();
        assert_eq!(result.status, RunStatus::Completed);
        assert_eq!(result.total_records, 2);
        assert_eq!(result.successful_records, 2);

        // The rule's product lookup resolved from the cache fed by the
        // first step's load results, so the target saw no queries.
        assert_eq!(target.query_count(), 0);
        let rule = target.stored("Pricing_Rule__c", "R-1").expect("loaded");
        assert!(rule.get_str("Product__c").is_some());
    }

    #[tokio::test]
    async fn failed_step_skips_dependents_and_fails_run() {
        let (source, target) = orgs();
        // Every product upsert fails permanently.
        target.fail_upsert("P-1", "FIELD_CUSTOM_VALIDATION_EXCEPTION", usize::MAX);
        let orchestrator = orchestrator();
        let template = parse_template_str(TEMPLATE).unwrap();

        let result = orchestrator
            .run(&source, &target, &template, Vec::new())
            .await
            .unwrap();
        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(result.steps[0].status, StepStatus::Failed);
        assert_eq!(result.steps[1].status, StepStatus::Skipped);
        assert_eq!(target.stored_count("Pricing_Rule__c"), 0);
    }

    #[tokio::test]
    async fn record_failures_under_partial_success_yield_partial_run() {
        let (source, target) = orgs();
        target.fail_upsert("R-1", "FIELD_CUSTOM_VALIDATION_EXCEPTION", usize::MAX);

        let mut template = parse_template_str(TEMPLATE).unwrap();
        for step in &mut template.steps {
            step.load.allow_partial_success = true;
        }
        let orchestrator = orchestrator();
        let result = orchestrator
            .run(&source, &target, &template, Vec::new())
            .await
            .unwrap();
        assert_eq!(result.status, RunStatus::PartialSuccess);
        assert_eq!(result.failed_records, 1);
    }

    #[tokio::test]
    async fn second_concurrent_run_is_rejected() {
        let (source, target) = orgs();
        let orchestrator = Arc::new(orchestrator());
        let template = parse_template_str(TEMPLATE).unwrap();

        let slot = orchestrator.run_slot.try_lock().expect("slot free");
        let err = orchestrator
            .run(&source, &target, &template, Vec::new())
            .await
            .expect_err("slot is held");
        assert!(matches!(err, EngineError::Concurrency));
        drop(slot);

        // Released slot admits the next run.
        let result = orchestrator
            .run(&source, &target, &template, Vec::new())
            .await
            .unwrap();
        assert_eq!(result.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn aborted_run_is_finalized_as_failed() {
        use orgflow_state::{RunRow, StateError};
        use orgflow_types::result::RecordError;
        use orgflow_types::state::TemplateId;

        /// Delegates to SQLite but refuses every step write, forcing
        /// the run to abort mid-flight with an infrastructure error.
        struct StepWriteFailure {
            inner: SqliteStateBackend,
        }

        impl StateBackend for StepWriteFailure {
            fn start_run(
                &self,
                template: &TemplateId,
                source_org: &orgflow_types::state::OrgId,
                target_org: &orgflow_types::state::OrgId,
            ) -> Result<i64, StateError> {
                self.inner.start_run(template, source_org, target_org)
            }
            fn complete_run(
                &self,
                run_id: i64,
                status: RunStatus,
                total: u64,
                successful: u64,
                failed: u64,
            ) -> Result<(), StateError> {
                self.inner.complete_run(run_id, status, total, successful, failed)
            }
            fn insert_step_result(&self, _run_id: i64, _result: &StepResult) -> Result<(), StateError> {
                Err(StateError::Io(std::io::Error::other("disk full")))
            }
            fn insert_record_errors(
                &self,
                run_id: i64,
                step_name: &str,
                errors: &[RecordError],
            ) -> Result<u64, StateError> {
                self.inner.insert_record_errors(run_id, step_name, errors)
            }
            fn list_runs(&self, limit: u32) -> Result<Vec<RunRow>, StateError> {
                self.inner.list_runs(limit)
            }
            fn step_results(&self, run_id: i64) -> Result<Vec<StepResult>, StateError> {
                self.inner.step_results(run_id)
            }
            fn record_errors(
                &self,
                run_id: i64,
                step_name: &str,
                limit: u32,
            ) -> Result<Vec<RecordError>, StateError> {
                self.inner.record_errors(run_id, step_name, limit)
            }
        }

        let (source, target) = orgs();
        let state = Arc::new(StepWriteFailure {
            inner: SqliteStateBackend::in_memory().expect("in-memory state"),
        });
        let orchestrator = Orchestrator::new(state.clone());
        let template = parse_template_str(TEMPLATE).unwrap();

        let err = orchestrator
            .run(&source, &target, &template, Vec::new())
            .await
            .expect_err("step persistence fails");
        assert!(matches!(err, EngineError::Infrastructure(_)));

        // The run row must not be left in a running state.
        let runs = state.list_runs(10).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Failed);
        assert!(runs[0].finished_at.is_some());
    }

    #[tokio::test]
    async fn run_history_is_persisted() {
        let (source, target) = orgs();
        let state = Arc::new(SqliteStateBackend::in_memory().expect("in-memory state"));
        let orchestrator = Orchestrator::new(state.clone());
        let template = parse_template_str(TEMPLATE).unwrap();

        let result = orchestrator
            .run(&source, &target, &template, Vec::new())
            .await
            .unwrap();

        let runs = state.list_runs(10).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].run_id, result.run_id);
        assert_eq!(runs[0].status, RunStatus::Completed);
        let steps = state.step_results(result.run_id).unwrap();
        assert_eq!(steps.len(), 2);
    }
}
