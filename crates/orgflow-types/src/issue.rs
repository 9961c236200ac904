//! Validation issue model surfaced to callers before execution.

use serde::{Deserialize, Serialize};

/// Issue severity. `Error`-severity issues make a validation report
/// invalid; warnings and info never block anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Info => "info",
        };
        f.write_str(s)
    }
}

/// One validation finding, carrying enough context for UI surfacing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub title: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    /// Parent record id for hierarchical grouping in the UI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_record_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<String>,
    /// Deep link into the source org, when the issue points at a record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_url: Option<String>,
}

impl ValidationIssue {
    /// Create an issue with just severity, title, and message.
    #[must_use]
    pub fn new(severity: Severity, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity,
            title: title.into(),
            message: message.into(),
            record_id: None,
            parent_record_id: None,
            suggested_action: None,
            record_url: None,
        }
    }

    /// Attach the offending record id.
    #[must_use]
    pub fn with_record(mut self, record_id: impl Into<String>) -> Self {
        self.record_id = Some(record_id.into());
        self
    }

    /// Attach a deep link into the source org.
    #[must_use]
    pub fn with_record_url(mut self, url: impl Into<String>) -> Self {
        self.record_url = Some(url.into());
        self
    }

    /// Attach a suggested remediation.
    #[must_use]
    pub fn with_suggested_action(mut self, action: impl Into<String>) -> Self {
        self.suggested_action = Some(action.into());
        self
    }
}

/// Issue counts by severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub errors: usize,
    pub warnings: usize,
    pub info: usize,
}

/// The result of a validation pass: every issue found, summarized.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
    pub summary: ValidationSummary,
}

impl ValidationReport {
    /// Build a report from a list of issues, computing the summary.
    #[must_use]
    pub fn from_issues(issues: Vec<ValidationIssue>) -> Self {
        let mut summary = ValidationSummary::default();
        for issue in &issues {
            match issue.severity {
                Severity::Error => summary.errors += 1,
                Severity::Warning => summary.warnings += 1,
                Severity::Info => summary.info += 1,
            }
        }
        Self { issues, summary }
    }

    /// A report is valid when it contains zero error-severity issues.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.summary.errors == 0
    }

    /// Issues at a given severity, in discovery order.
    pub fn at_severity(&self, severity: Severity) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(move |i| i.severity == severity)
    }
}
