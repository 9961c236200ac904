//! Migration template data model.
//!
//! A template is a declarative, ordered set of ETL steps describing how
//! one logical object (and its dependents) migrates from a source org
//! to a target org. Templates are configuration data: all behavior
//! lives in the engine, which interprets these structures.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::issue::Severity;
use crate::state::TemplateId;

/// A complete migration template. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationTemplate {
    pub id: TemplateId,
    pub name: String,
    pub steps: Vec<EtlStep>,
    /// Step names in the order they execute. Must be a valid
    /// topological order of the steps' `depends_on` sets.
    pub execution_order: Vec<String>,
}

/// One extract/transform/load step within a template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EtlStep {
    pub name: String,
    pub extract: ExtractConfig,
    pub transform: TransformConfig,
    pub load: LoadConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    /// Names of steps whose load phase must complete before this step
    /// runs (their upserted ids feed this step's lookups).
    #[serde(default)]
    pub depends_on: BTreeSet<String>,
}

/// Source-side query configuration for a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractConfig {
    /// Source object API name.
    pub object: String,
    /// Query text; may contain `{externalIdField}` and
    /// `{selectedRecordIds}` placeholders and may project one level of
    /// parent-relationship fields.
    pub query: String,
    #[serde(default = "default_extract_batch_size")]
    pub batch_size: u32,
}

fn default_extract_batch_size() -> u32 {
    2000
}

/// Field and lookup mappings applied to each extracted record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransformConfig {
    #[serde(default)]
    pub field_mappings: Vec<FieldMapping>,
    #[serde(default)]
    pub lookup_mappings: Vec<LookupMapping>,
    /// Source record-type developer name -> target record-type
    /// developer name. Resolved to a concrete target id during plan
    /// preparation.
    #[serde(default)]
    pub record_type_mapping: BTreeMap<String, String>,
}

/// How a single field value is carried to the target payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformKind {
    /// Copy the value unchanged.
    #[default]
    Direct,
    /// Coerce to boolean (`"true"`/`"false"`/`1`/`0` accepted).
    Boolean,
    /// Coerce to number (numeric strings accepted).
    Number,
}

/// Direct source-to-target field mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub source_field: String,
    /// May contain `{externalIdField}` before plan resolution.
    pub target_field: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub kind: TransformKind,
}

/// Foreign-key mapping resolved by external-id value through the
/// run-scoped lookup cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupMapping {
    /// Source field holding the external-id value; may traverse a
    /// parent relationship (`Parent__r.External_Id__c`).
    pub source_field: String,
    /// Target lookup field receiving the resolved id.
    pub target_field: String,
    /// Object the referenced record lives on in the target org.
    pub target_object: String,
    /// Field used to resolve identity in both orgs.
    pub key_field: String,
    #[serde(default = "default_true")]
    pub cacheable: bool,
}

/// Bulk concurrency mode for the load phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrencyMode {
    #[default]
    Parallel,
    Serial,
}

/// Target-side bulk upsert configuration for a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadConfig {
    /// Target object API name.
    pub target_object: String,
    /// The external-id field upserts key on; `{externalIdField}`
    /// before plan resolution.
    pub external_id_field: String,
    #[serde(default = "default_load_batch_size")]
    pub batch_size: u32,
    #[serde(default)]
    pub concurrency: ConcurrencyMode,
    #[serde(default)]
    pub retry: RetryConfig,
    /// When true, record-level failures leave the step `COMPLETED`
    /// with a non-zero failed count and downstream steps still run.
    #[serde(default)]
    pub allow_partial_success: bool,
}

fn default_load_batch_size() -> u32 {
    200
}

fn default_true() -> bool {
    true
}

/// Retry policy for the load phase of a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_wait_secs")]
    pub retry_wait_secs: u64,
    /// Remote error codes eligible for retry; anything else is a
    /// permanent per-record failure.
    #[serde(default = "default_retryable_errors")]
    pub retryable_errors: Vec<String>,
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_wait_secs() -> u64 {
    5
}

fn default_retryable_errors() -> Vec<String> {
    vec![
        "UNABLE_TO_LOCK_ROW".to_string(),
        "REQUEST_LIMIT_EXCEEDED".to_string(),
        "TIMED_OUT".to_string(),
    ]
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_wait_secs: default_retry_wait_secs(),
            retryable_errors: default_retryable_errors(),
        }
    }
}

/// Pre-flight validation configuration for a step. All checks are
/// data; the validation engine owns the behavior.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationConfig {
    #[serde(default)]
    pub pre_validation_queries: Vec<PreValidationQuery>,
    #[serde(default)]
    pub dependency_checks: Vec<DependencyCheck>,
    #[serde(default)]
    pub data_integrity_checks: Vec<DataIntegrityCheck>,
    #[serde(default)]
    pub picklist_checks: Vec<PicklistCheck>,
}

/// Query run against the target org whose results seed the lookup
/// cache before validation and execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreValidationQuery {
    /// Target object the results belong to (the cache namespace).
    pub object: String,
    /// Query text; may contain `{externalIdField}`.
    pub query: String,
    /// Field in each result row holding the external-id value.
    pub key_field: String,
}

/// Check that a referenced external-id value exists in the target org.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyCheck {
    /// Source field holding the referenced external-id value; may
    /// traverse a parent relationship.
    pub source_field: String,
    /// Target object the reference must resolve against.
    pub target_object: String,
    /// When true a missing reference is an error; otherwise a warning.
    #[serde(default)]
    pub is_required: bool,
    pub title: String,
}

/// Expected outcome of a data-integrity aggregate query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpectedResult {
    /// The query must return no rows.
    #[default]
    Empty,
}

/// Aggregate query run against the source org to detect inconsistent
/// data before any write happens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataIntegrityCheck {
    pub query: String,
    #[serde(default)]
    pub expected: ExpectedResult,
    #[serde(default = "default_integrity_severity")]
    pub severity: Severity,
    pub title: String,
    pub message: String,
}

fn default_integrity_severity() -> Severity {
    Severity::Error
}

/// Check that every picklist value observed on the source field is
/// present in the target org's picklist metadata for the mapped field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PicklistCheck {
    pub source_field: String,
    pub target_object: String,
    pub target_field: String,
    pub title: String,
}

impl MigrationTemplate {
    /// Look up a step by name.
    #[must_use]
    pub fn step(&self, name: &str) -> Option<&EtlStep> {
        self.steps.iter().find(|s| s.name == name)
    }
}
