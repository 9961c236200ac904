//! Run and step result types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::{OrgId, TemplateId};

/// Terminal status of a migration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Draft,
    Ready,
    Running,
    Completed,
    PartialSuccess,
    Failed,
}

impl RunStatus {
    /// Wire-format string for storage.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::PartialSuccess => "partial_success",
            Self::Failed => "failed",
        }
    }

    /// Parse a stored status string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "ready" => Some(Self::Ready),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "partial_success" => Some(Self::PartialSuccess),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of one step within a running migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    /// Wire-format string for storage.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    /// Parse a stored status string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One record that failed during a step, with a human-readable reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordError {
    /// Source record id, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    /// External-id value the record carried, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    /// Remote or engine error code (e.g. `UNABLE_TO_LOCK_ROW`,
    /// `LOOKUP_NOT_FOUND`).
    pub code: String,
    pub message: String,
}

/// Per-step outcome: counts, status, and a bounded error sample.
/// The full error log is persisted by the state backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_name: String,
    pub status: StepStatus,
    pub total_records: u64,
    pub successful_records: u64,
    pub failed_records: u64,
    pub errors: Vec<RecordError>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl StepResult {
    /// A step that never ran because an upstream dependency failed.
    #[must_use]
    pub fn skipped(step_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            step_name: step_name.into(),
            status: StepStatus::Skipped,
            total_records: 0,
            successful_records: 0,
            failed_records: 0,
            errors: Vec::new(),
            started_at: now,
            finished_at: now,
        }
    }
}

/// Aggregate outcome of one migration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: i64,
    pub template_id: TemplateId,
    pub source_org: OrgId,
    pub target_org: OrgId,
    pub status: RunStatus,
    pub steps: Vec<StepResult>,
    pub total_records: u64,
    pub successful_records: u64,
    pub failed_records: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunResult {
    /// Derive the overall run status from step outcomes: any failed
    /// step fails the run; completed steps with failed records under
    /// partial success yield `PartialSuccess`; otherwise `Completed`.
    #[must_use]
    pub fn derive_status(steps: &[StepResult]) -> RunStatus {
        if steps
            .iter()
            .any(|s| matches!(s.status, StepStatus::Failed | StepStatus::Skipped))
        {
            return RunStatus::Failed;
        }
        if steps.iter().any(|s| s.failed_records > 0) {
            RunStatus::PartialSuccess
        } else {
            RunStatus::Completed
        }
    }
}
