//! State backend trait definition.
//!
//! [`StateBackend`] defines the storage contract for run tracking,
//! step results, and the per-record error log. The engine writes at
//! phase boundaries; the CLI reads history. Model types live in
//! `orgflow_types`.

use orgflow_types::result::{RecordError, RunStatus, StepResult};
use orgflow_types::state::{OrgId, TemplateId};

use crate::error;

/// One stored run, as read back for history listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRow {
    pub run_id: i64,
    pub template_id: TemplateId,
    pub source_org: OrgId,
    pub target_org: OrgId,
    pub status: RunStatus,
    pub total_records: u64,
    pub successful_records: u64,
    pub failed_records: u64,
    pub started_at: String,
    pub finished_at: Option<String>,
}

/// Storage contract for migration run history.
///
/// Implementations must be `Send + Sync` for use behind
/// `Arc<dyn StateBackend>`.
pub trait StateBackend: Send + Sync {
    /// Begin a new run, returning its unique ID.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::StateError) on storage failure.
    fn start_run(
        &self,
        template: &TemplateId,
        source_org: &OrgId,
        target_org: &OrgId,
    ) -> error::Result<i64>;

    /// Finalize a run with its terminal status and aggregate counts.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::StateError) on storage failure.
    fn complete_run(
        &self,
        run_id: i64,
        status: RunStatus,
        total: u64,
        successful: u64,
        failed: u64,
    ) -> error::Result<()>;

    /// Persist one step's result as it completes.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::StateError) on storage failure.
    fn insert_step_result(&self, run_id: i64, result: &StepResult) -> error::Result<()>;

    /// Persist the full per-record error log for a step. Returns the
    /// count inserted.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::StateError) on storage failure.
    fn insert_record_errors(
        &self,
        run_id: i64,
        step_name: &str,
        errors: &[RecordError],
    ) -> error::Result<u64>;

    /// List stored runs, most recent first.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::StateError) on storage failure.
    fn list_runs(&self, limit: u32) -> error::Result<Vec<RunRow>>;

    /// Read back the stored step results for one run, in insert order.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::StateError) on storage failure.
    fn step_results(&self, run_id: i64) -> error::Result<Vec<StepResult>>;

    /// Read back stored record errors for one step of a run, oldest
    /// first, bounded by `limit`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::StateError) on storage failure.
    fn record_errors(
        &self,
        run_id: i64,
        step_name: &str,
        limit: u32,
    ) -> error::Result<Vec<RecordError>>;
}
