//! Pre-flight validation: runs a template's declared checks against
//! live org data and reports issues without writing anything.
//!
//! Checks are data on the template; each kind funnels through one
//! [`ValidationCheck::evaluate`] dispatch so adding a check kind means
//! one new variant, not a new engine phase.

use orgflow_types::issue::{Severity, ValidationIssue, ValidationReport};
use orgflow_types::record::Record;
use orgflow_types::template::{
    DataIntegrityCheck, DependencyCheck, EtlStep, ExpectedResult, PicklistCheck,
};
use tracing::debug;

use crate::cache::LookupCache;
use crate::client::{query_all, OrgClient};
use crate::errors::EngineError;
use crate::resolve::ResolvedPlan;
use crate::schema::SchemaResolver;

/// Maximum records per load batch imposed by the platform API.
pub const MAX_LOAD_BATCH: usize = 200;

/// Everything a check needs to evaluate itself.
pub struct CheckContext<'a> {
    pub source: &'a dyn OrgClient,
    pub target: &'a dyn OrgClient,
    pub schema: &'a mut SchemaResolver,
    pub cache: &'a LookupCache,
}

/// One declared check, dispatched uniformly.
#[derive(Debug, Clone)]
pub enum ValidationCheck {
    Dependency(DependencyCheck),
    DataIntegrity(DataIntegrityCheck),
    Picklist(PicklistCheck),
}

impl ValidationCheck {
    /// Gather every check declared on a step, in declaration order.
    #[must_use]
    pub fn for_step(step: &EtlStep) -> Vec<Self> {
        let v = &step.validation;
        let mut checks = Vec::new();
        checks.extend(v.dependency_checks.iter().cloned().map(Self::Dependency));
        checks.extend(
            v.data_integrity_checks
                .iter()
                .cloned()
                .map(Self::DataIntegrity),
        );
        checks.extend(v.picklist_checks.iter().cloned().map(Self::Picklist));
        checks
    }

    /// Evaluate this check against the step's extracted records.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Api`] when a backing query or describe
    /// call fails.
    pub async fn evaluate(
        &self,
        cx: &mut CheckContext<'_>,
        records: &[Record],
    ) -> Result<Vec<ValidationIssue>, EngineError> {
        match self {
            Self::Dependency(check) => Ok(evaluate_dependency(cx, check, records)),
            Self::DataIntegrity(check) => evaluate_data_integrity(cx, check).await,
            Self::Picklist(check) => evaluate_picklist(cx, check, records).await,
        }
    }
}

/// A dependency check verifies that every referenced parent already
/// exists in the target org, i.e. its external-id value is present in
/// the lookup cache seeded from the pre-validation queries.
fn evaluate_dependency(
    cx: &CheckContext<'_>,
    check: &DependencyCheck,
    records: &[Record],
) -> Vec<ValidationIssue> {
    let severity = if check.is_required {
        Severity::Error
    } else {
        Severity::Warning
    };

    let mut issues = Vec::new();
    for record in records {
        let Some(key) = record.get_str(&check.source_field) else {
            continue;
        };
        if cx.cache.contains(&check.target_object, key) {
            continue;
        }
        let mut issue = ValidationIssue::new(
            severity,
            check.title.clone(),
            format!(
                "Record '{}' references {} '{}' which does not exist in the target org",
                record.display_name(),
                check.target_object,
                key
            ),
        )
        .with_suggested_action(format!(
            "Migrate the missing {} first or clear the reference",
            check.target_object
        ));
        if let Some(id) = record.id() {
            issue = issue
                .with_record(id)
                .with_record_url(record_url(cx.source.instance_url(), id));
        }
        issues.push(issue);
    }
    issues
}

/// Runs the check's aggregate query against the source org and
/// compares the result with the declared expectation.
async fn evaluate_data_integrity(
    cx: &CheckContext<'_>,
    check: &DataIntegrityCheck,
) -> Result<Vec<ValidationIssue>, EngineError> {
    let rows = query_all(cx.source, &check.query, 2000).await?;
    match check.expected {
        ExpectedResult::Empty if rows.is_empty() => Ok(Vec::new()),
        ExpectedResult::Empty => {
            let mut issue = ValidationIssue::new(
                check.severity,
                check.title.clone(),
                format!("{} ({} offending records)", check.message, rows.len()),
            );
            if let Some(id) = rows.first().and_then(Record::id) {
                issue = issue
                    .with_record(id)
                    .with_record_url(record_url(cx.source.instance_url(), id));
            }
            Ok(vec![issue])
        }
    }
}

/// Flags source picklist values with no counterpart on the target
/// field. Loads would not fail on these but would silently store
/// unexpected values, so they surface as warnings.
async fn evaluate_picklist(
    cx: &mut CheckContext<'_>,
    check: &PicklistCheck,
    records: &[Record],
) -> Result<Vec<ValidationIssue>, EngineError> {
    let allowed = cx
        .schema
        .picklist_values(cx.target, &check.target_object, &check.target_field)
        .await?;

    let mut seen = std::collections::BTreeSet::new();
    let mut issues = Vec::new();
    for record in records {
        let Some(value) = record.get_str(&check.source_field) else {
            continue;
        };
        if allowed.iter().any(|v| v == value) || !seen.insert(value.to_string()) {
            continue;
        }
        issues.push(
            ValidationIssue::new(
                Severity::Warning,
                check.title.clone(),
                format!(
                    "Value '{}' of {} is not an active picklist value on {}.{}",
                    value, check.source_field, check.target_object, check.target_field
                ),
            )
            .with_suggested_action(format!(
                "Add '{}' to the target picklist or map it to an existing value",
                value
            )),
        );
    }
    Ok(issues)
}

/// Seed the lookup cache from a step's pre-validation queries. Each
/// query runs against the target org and every row contributes a
/// (object, key value) -> Id mapping.
///
/// # Errors
///
/// Returns [`EngineError::Api`] on query failure. A key collision
/// mapping to a different id is reported as a configuration error.
pub async fn seed_cache(
    target: &dyn OrgClient,
    step: &EtlStep,
    cache: &mut LookupCache,
) -> Result<(), EngineError> {
    for pre in &step.validation.pre_validation_queries {
        let rows = query_all(target, &pre.query, 2000).await?;
        let mut inserted = 0usize;
        for row in &rows {
            let (Some(key), Some(id)) = (row.get_str(&pre.key_field), row.id()) else {
                continue;
            };
            cache
                .insert(&pre.object, key, id)
                .map_err(|conflict| EngineError::config(conflict.to_string()))?;
            inserted += 1;
        }
        debug!(
            object = %pre.object,
            rows = rows.len(),
            inserted,
            "Seeded lookup cache from pre-validation query"
        );
    }
    Ok(())
}

/// Warn when a record selection will be split across load batches.
/// Exactly one warning regardless of how many batches result; a
/// selection of exactly [`MAX_LOAD_BATCH`] records fits one batch and
/// produces none.
#[must_use]
pub fn selection_issues(selected_record_ids: &[String]) -> Vec<ValidationIssue> {
    if selected_record_ids.len() <= MAX_LOAD_BATCH {
        return Vec::new();
    }
    let batches = selected_record_ids.len().div_ceil(MAX_LOAD_BATCH);
    vec![ValidationIssue::new(
        Severity::Warning,
        "Selection exceeds one load batch",
        format!(
            "{} selected records will be loaded in {} batches of up to {}",
            selected_record_ids.len(),
            batches,
            MAX_LOAD_BATCH
        ),
    )]
}

/// Dry-run validation of a whole template: for each step in execution
/// order, seed the cache, extract the step's records from the source
/// org, and evaluate every declared check. Nothing is written.
///
/// # Errors
///
/// Returns [`EngineError::Api`] when extraction or a check's backing
/// call fails.
pub async fn validate(
    source: &dyn OrgClient,
    target: &dyn OrgClient,
    schema: &mut SchemaResolver,
    plan: &ResolvedPlan,
    selected_record_ids: &[String],
) -> Result<ValidationReport, EngineError> {
    let mut cache = LookupCache::new();
    let mut issues = selection_issues(selected_record_ids);

    for resolved in &plan.steps {
        let step = &resolved.step;
        seed_cache(target, step, &mut cache).await?;
        let records = query_all(source, &step.extract.query, step.extract.batch_size).await?;
        debug!(step = %step.name, records = records.len(), "Validating step");

        let mut cx = CheckContext {
            source,
            target,
            schema,
            cache: &cache,
        };
        for check in ValidationCheck::for_step(step) {
            issues.extend(check.evaluate(&mut cx, &records).await?);
        }
    }

    Ok(ValidationReport::from_issues(issues))
}

fn record_url(instance_url: &str, record_id: &str) -> String {
    format!("{instance_url}/{record_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{FieldDescribe, ObjectDescribe};
    use crate::mock::MockOrgClient;
    use serde_json::json;

    fn record(pairs: serde_json::Value) -> Record {
        Record {
            fields: serde_json::from_value(pairs).expect("object"),
        }
    }

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("a{i:03}")).collect()
    }

    #[test]
    fn selection_within_one_batch_is_silent() {
        assert!(selection_issues(&ids(200)).is_empty());
    }

    #[test]
    fn selection_over_one_batch_warns_once() {
        let issues = selection_issues(&ids(201));
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, Severity::Warning);
        assert!(issues[0].message.contains("2 batches"));

        assert_eq!(selection_issues(&ids(1000)).len(), 1);
    }

    #[tokio::test]
    async fn required_dependency_miss_is_error_with_record_url() {
        let source = MockOrgClient::new("source");
        let target = MockOrgClient::new("target");
        let mut schema = SchemaResolver::new();
        let mut cache = LookupCache::new();
        cache.insert("Product__c", "P-1", "0x1").unwrap();

        let check = DependencyCheck {
            source_field: "Product_Ref__c".to_string(),
            target_object: "Product__c".to_string(),
            is_required: true,
            title: "Missing product".to_string(),
        };

        let records = vec![
            record(json!({ "Id": "r1", "Name": "Rule one", "Product_Ref__c": "P-1" })),
            record(json!({ "Id": "r2", "Name": "Rule two", "Product_Ref__c": "P-9" })),
        ];
        let mut cx = CheckContext {
            source: &source,
            target: &target,
            schema: &mut schema,
            cache: &cache,
        };
        let issues = ValidationCheck::Dependency(check)
            .evaluate(&mut cx, &records)
            .await
            .unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, Severity::Error);
        assert_eq!(issues[0].record_id.as_deref(), Some("r2"));
        assert_eq!(
            issues[0].record_url.as_deref(),
            Some("https://source.example.test/r2")
        );
    }

    #[tokio::test]
    async fn optional_dependency_miss_is_warning() {
        let source = MockOrgClient::new("source");
        let target = MockOrgClient::new("target");
        let mut schema = SchemaResolver::new();
        let cache = LookupCache::new();

        let check = DependencyCheck {
            source_field: "Parent__c".to_string(),
            target_object: "Category__c".to_string(),
            is_required: false,
            title: "Missing category".to_string(),
        };
        let records = vec![record(json!({ "Id": "r1", "Parent__c": "C-1" }))];
        let mut cx = CheckContext {
            source: &source,
            target: &target,
            schema: &mut schema,
            cache: &cache,
        };
        let issues = ValidationCheck::Dependency(check)
            .evaluate(&mut cx, &records)
            .await
            .unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, Severity::Warning);
    }

    #[tokio::test]
    async fn data_integrity_queries_the_source_org() {
        let source = MockOrgClient::new("source");
        let target = MockOrgClient::new("target");
        source.add_query_result(
            "FROM Pricing_Rule__c WHERE Product_Ref__c = null",
            vec![record(json!({ "Id": "bad1" }))],
        );
        let mut schema = SchemaResolver::new();
        let cache = LookupCache::new();

        let check = DataIntegrityCheck {
            query: "SELECT Id FROM Pricing_Rule__c WHERE Product_Ref__c = null".to_string(),
            expected: ExpectedResult::Empty,
            severity: Severity::Error,
            title: "Orphaned pricing rules".to_string(),
            message: "Pricing rules without a product".to_string(),
        };
        let mut cx = CheckContext {
            source: &source,
            target: &target,
            schema: &mut schema,
            cache: &cache,
        };
        let issues = ValidationCheck::DataIntegrity(check.clone())
            .evaluate(&mut cx, &[])
            .await
            .unwrap();
        assert_eq!(issues.len(), 1);
        assert!(issues[0].message.contains("1 offending"));
        assert_eq!(
            issues[0].record_url.as_deref(),
            Some("https://source.example.test/bad1")
        );
        assert_eq!(source.query_count(), 1);
        assert_eq!(target.query_count(), 0);

        // A clean source produces no issues.
        let clean = MockOrgClient::new("source2");
        let mut cx = CheckContext {
            source: &clean,
            target: &target,
            schema: &mut schema,
            cache: &cache,
        };
        let issues = ValidationCheck::DataIntegrity(check)
            .evaluate(&mut cx, &[])
            .await
            .unwrap();
        assert!(issues.is_empty());
    }

    #[tokio::test]
    async fn picklist_check_deduplicates_values() {
        let source = MockOrgClient::new("source");
        let target = MockOrgClient::new("target");
        target.add_describe(
            "Pricing_Rule__c",
            ObjectDescribe {
                fields: vec![FieldDescribe {
                    name: "Status__c".to_string(),
                    picklist_values: vec!["Active".to_string(), "Draft".to_string()],
                }],
                record_types: vec![],
            },
        );
        let mut schema = SchemaResolver::new();
        let cache = LookupCache::new();

        let check = PicklistCheck {
            source_field: "Status__c".to_string(),
            target_object: "Pricing_Rule__c".to_string(),
            target_field: "Status__c".to_string(),
            title: "Unknown status".to_string(),
        };
        let records = vec![
            record(json!({ "Id": "1", "Status__c": "Active" })),
            record(json!({ "Id": "2", "Status__c": "Legacy" })),
            record(json!({ "Id": "3", "Status__c": "Legacy" })),
        ];
        let mut cx = CheckContext {
            source: &source,
            target: &target,
            schema: &mut schema,
            cache: &cache,
        };
        let issues = ValidationCheck::Picklist(check)
            .evaluate(&mut cx, &records)
            .await
            .unwrap();
        assert_eq!(issues.len(), 1);
        assert!(issues[0].message.contains("'Legacy'"));
    }

    #[tokio::test]
    async fn seed_cache_maps_key_field_to_id() {
        use orgflow_types::template::{PreValidationQuery, ValidationConfig};

        let target = MockOrgClient::new("target");
        target.add_query_result(
            "FROM Product__c",
            vec![
                record(json!({ "Id": "0x1", "Migration_Id__c": "P-1" })),
                record(json!({ "Id": "0x2", "Migration_Id__c": "P-2" })),
                record(json!({ "Id": "0x3" })),
            ],
        );

        let mut step = minimal_step();
        step.validation = ValidationConfig {
            pre_validation_queries: vec![PreValidationQuery {
                object: "Product__c".to_string(),
                query: "SELECT Id, Migration_Id__c FROM Product__c".to_string(),
                key_field: "Migration_Id__c".to_string(),
            }],
            ..ValidationConfig::default()
        };

        let mut cache = LookupCache::new();
        seed_cache(&target, &step, &mut cache).await.unwrap();
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("Product__c", "P-1"), Some("0x1"));
        assert!(!cache.contains("Product__c", "P-3"));
    }

    fn minimal_step() -> EtlStep {
        use orgflow_types::template::{ExtractConfig, LoadConfig, TransformConfig};
        EtlStep {
            name: "step".to_string(),
            extract: ExtractConfig {
                object: "X__c".to_string(),
                query: "SELECT Id FROM X__c".to_string(),
                batch_size: 2000,
            },
            transform: TransformConfig::default(),
            load: LoadConfig {
                target_object: "X__c".to_string(),
                external_id_field: "Migration_Id__c".to_string(),
                batch_size: 200,
                concurrency: orgflow_types::template::ConcurrencyMode::Parallel,
                retry: orgflow_types::template::RetryConfig::default(),
                allow_partial_success: false,
            },
            validation: orgflow_types::template::ValidationConfig::default(),
            depends_on: std::collections::BTreeSet::new(),
        }
    }
}
