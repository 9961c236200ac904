//! Placeholder resolution, turning a template into an executable plan.
//!
//! Templates carry `{externalIdField}`, `{targetRecordTypeId}` and
//! `{selectedRecordIds}` placeholders in queries, mappings and
//! validation configs. Resolution is total: after substitution, any
//! remaining `{...}` token is a configuration error rather than a
//! string that leaks into a query.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use orgflow_types::state::TemplateId;
use orgflow_types::template::{EtlStep, MigrationTemplate};
use regex::Regex;

use crate::client::OrgClient;
use crate::errors::EngineError;
use crate::schema::SchemaResolver;

pub const EXTERNAL_ID_PLACEHOLDER: &str = "{externalIdField}";
pub const RECORD_TYPE_PLACEHOLDER: &str = "{targetRecordTypeId}";
pub const SELECTED_IDS_PLACEHOLDER: &str = "{selectedRecordIds}";

static UNRESOLVED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid placeholder regex")
});

/// Concrete values substituted into a template's placeholders.
#[derive(Debug, Clone, Default)]
pub struct ResolvedValues {
    /// External-id field name as installed on the target org.
    pub external_id_field: String,
    /// Target record-type ids keyed by target object.
    pub record_type_ids: BTreeMap<String, String>,
    /// Source record ids the run is scoped to, empty for a full run.
    pub selected_record_ids: Vec<String>,
}

/// One step with every placeholder-bearing string substituted: the
/// extract query, field/lookup mappings, load key, and validation
/// queries are all concrete.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedStep {
    pub step: EtlStep,
    /// Target record-type id, present only when the step rewrites
    /// record types.
    pub record_type_id: Option<String>,
}

impl ResolvedStep {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.step.name
    }
}

/// A template with all placeholders resolved, steps in execution order.
#[derive(Debug, Clone)]
pub struct ResolvedPlan {
    pub template_id: TemplateId,
    pub steps: Vec<ResolvedStep>,
}

impl ResolvedPlan {
    #[must_use]
    pub fn step(&self, name: &str) -> Option<&ResolvedStep> {
        self.steps.iter().find(|s| s.step.name == name)
    }
}

/// Resolve every placeholder in `template` against `values`. Pure: no
/// org access, deterministic for a given input.
///
/// # Errors
///
/// Returns [`EngineError::Configuration`] when a placeholder has no
/// value to substitute or an unknown `{...}` token survives
/// substitution.
pub fn resolve_plan(
    template: &MigrationTemplate,
    values: &ResolvedValues,
) -> Result<ResolvedPlan, EngineError> {
    let mut steps = Vec::with_capacity(template.execution_order.len());
    for name in &template.execution_order {
        let step = template.step(name).ok_or_else(|| {
            EngineError::config(format!("execution_order names unknown step '{name}'"))
        })?;
        steps.push(resolve_step(step, values)?);
    }
    Ok(ResolvedPlan {
        template_id: template.id.clone(),
        steps,
    })
}

fn resolve_step(step: &EtlStep, values: &ResolvedValues) -> Result<ResolvedStep, EngineError> {
    let record_type_id = if step.transform.record_type_mapping.is_empty() {
        None
    } else {
        values.record_type_ids.get(&step.load.target_object).cloned()
    };

    let mut resolved = step.clone();
    let cx = SubstCx {
        step_name: &step.name,
        values,
        record_type_id: record_type_id.as_deref(),
    };

    resolved.extract.query = cx.resolve(&step.extract.query)?;
    resolved.load.external_id_field = cx.resolve(&step.load.external_id_field)?;
    for mapping in &mut resolved.transform.field_mappings {
        mapping.source_field = cx.resolve(&mapping.source_field)?;
        mapping.target_field = cx.resolve(&mapping.target_field)?;
    }
    for lookup in &mut resolved.transform.lookup_mappings {
        lookup.source_field = cx.resolve(&lookup.source_field)?;
        lookup.target_field = cx.resolve(&lookup.target_field)?;
        lookup.key_field = cx.resolve(&lookup.key_field)?;
    }
    for pre in &mut resolved.validation.pre_validation_queries {
        pre.query = cx.resolve(&pre.query)?;
        pre.key_field = cx.resolve(&pre.key_field)?;
    }
    for check in &mut resolved.validation.dependency_checks {
        check.source_field = cx.resolve(&check.source_field)?;
    }
    for check in &mut resolved.validation.data_integrity_checks {
        check.query = cx.resolve(&check.query)?;
    }

    Ok(ResolvedStep {
        step: resolved,
        record_type_id,
    })
}

struct SubstCx<'a> {
    step_name: &'a str,
    values: &'a ResolvedValues,
    record_type_id: Option<&'a str>,
}

impl SubstCx<'_> {
    fn resolve(&self, text: &str) -> Result<String, EngineError> {
        let mut out = text.to_string();

        if out.contains(EXTERNAL_ID_PLACEHOLDER) {
            if self.values.external_id_field.is_empty() {
                return Err(EngineError::config(format!(
                    "Step '{}' uses {EXTERNAL_ID_PLACEHOLDER} but no external id field was resolved",
                    self.step_name
                )));
            }
            out = out.replace(EXTERNAL_ID_PLACEHOLDER, &self.values.external_id_field);
        }

        if out.contains(RECORD_TYPE_PLACEHOLDER) {
            let Some(id) = self.record_type_id else {
                return Err(EngineError::config(format!(
                    "Step '{}' uses {RECORD_TYPE_PLACEHOLDER} but no record type id was resolved for its target object",
                    self.step_name
                )));
            };
            out = out.replace(RECORD_TYPE_PLACEHOLDER, id);
        }

        if out.contains(SELECTED_IDS_PLACEHOLDER) {
            if self.values.selected_record_ids.is_empty() {
                return Err(EngineError::config(format!(
                    "Step '{}' uses {SELECTED_IDS_PLACEHOLDER} but no records were selected",
                    self.step_name
                )));
            }
            out = out.replace(
                SELECTED_IDS_PLACEHOLDER,
                &quote_id_list(&self.values.selected_record_ids),
            );
        }

        if let Some(m) = UNRESOLVED_RE.find(&out) {
            return Err(EngineError::config(format!(
                "Step '{}' contains unknown placeholder '{}'",
                self.step_name,
                m.as_str()
            )));
        }

        Ok(out)
    }
}

/// Format ids for a SOQL `IN (...)` clause.
#[must_use]
pub fn quote_id_list(ids: &[String]) -> String {
    let quoted: Vec<String> = ids.iter().map(|id| format!("'{id}'")).collect();
    quoted.join(",")
}

/// Resolve a template against the target org: probes the external-id
/// field variant, looks up record-type ids for every step that maps
/// record types, then delegates to [`resolve_plan`].
///
/// # Errors
///
/// Returns [`EngineError::Schema`] when required metadata is missing
/// on the target org, [`EngineError::Api`] on describe failures, and
/// [`EngineError::Configuration`] from substitution.
pub async fn prepare_plan(
    target: &dyn OrgClient,
    schema: &mut SchemaResolver,
    template: &MigrationTemplate,
    selected_record_ids: Vec<String>,
) -> Result<ResolvedPlan, EngineError> {
    let first_object = template
        .steps
        .first()
        .map(|s| s.load.target_object.clone())
        .ok_or_else(|| EngineError::config("Template has no steps"))?;
    let external_id_field = schema
        .resolve_external_id_field(target, &first_object)
        .await?;

    let mut record_type_ids = BTreeMap::new();
    for step in &template.steps {
        for target_developer_name in step.transform.record_type_mapping.values() {
            let id = schema
                .resolve_record_type_id(target, &step.load.target_object, target_developer_name)
                .await?;
            record_type_ids.insert(step.load.target_object.clone(), id);
        }
    }

    let values = ResolvedValues {
        external_id_field,
        record_type_ids,
        selected_record_ids,
    };
    resolve_plan(template, &values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::parser::parse_template_str;

    const TEMPLATE: &str = r#"
id: pricing-rules
name: Pricing rules
steps:
  - name: load_products
    extract:
      object: Product__c
      query: "SELECT Id, Name, {externalIdField} FROM Product__c WHERE Id IN ({selectedRecordIds})"
    transform:
      record_type_mapping:
        Standard: Standard_Target
      lookup_mappings:
        - source_field: Category_Ref__c
          target_field: Category__c
          target_object: Category__c
          key_field: "{externalIdField}"
    load:
      target_object: Product__c
      external_id_field: "{externalIdField}"
    validation:
      pre_validation_queries:
        - object: Category__c
          query: "SELECT Id, {externalIdField} FROM Category__c"
          key_field: "{externalIdField}"
execution_order: [load_products]
"#;

    fn values() -> ResolvedValues {
        ResolvedValues {
            external_id_field: "Migration_Id__c".into(),
            record_type_ids: BTreeMap::from([(
                "Product__c".to_string(),
                "012000000000001AAA".to_string(),
            )]),
            selected_record_ids: vec!["a01".into(), "a02".into()],
        }
    }

    #[test]
    fn substitutes_placeholders_everywhere() {
        let template = parse_template_str(TEMPLATE).unwrap();
        let plan = resolve_plan(&template, &values()).unwrap();
        let resolved = plan.step("load_products").unwrap();
        assert_eq!(
            resolved.step.extract.query,
            "SELECT Id, Name, Migration_Id__c FROM Product__c WHERE Id IN ('a01','a02')"
        );
        assert_eq!(resolved.step.load.external_id_field, "Migration_Id__c");
        assert_eq!(
            resolved.step.transform.lookup_mappings[0].key_field,
            "Migration_Id__c"
        );
        let pre = &resolved.step.validation.pre_validation_queries[0];
        assert_eq!(pre.query, "SELECT Id, Migration_Id__c FROM Category__c");
        assert_eq!(pre.key_field, "Migration_Id__c");
        assert_eq!(
            resolved.record_type_id.as_deref(),
            Some("012000000000001AAA")
        );
    }

    #[test]
    fn resolution_is_deterministic() {
        let template = parse_template_str(TEMPLATE).unwrap();
        let a = resolve_plan(&template, &values()).unwrap();
        let b = resolve_plan(&template, &values()).unwrap();
        assert_eq!(a.steps, b.steps);
    }

    #[test]
    fn selected_ids_required_when_referenced() {
        let template = parse_template_str(TEMPLATE).unwrap();
        let mut v = values();
        v.selected_record_ids.clear();
        let err = resolve_plan(&template, &v).unwrap_err().to_string();
        assert!(err.contains("no records were selected"));
    }

    #[test]
    fn unknown_placeholder_rejected() {
        let yaml = r#"
id: t
name: T
steps:
  - name: a
    extract:
      object: X__c
      query: "SELECT Id FROM X__c WHERE K = {mysteryToken}"
    transform: {}
    load:
      target_object: X__c
      external_id_field: "{externalIdField}"
execution_order: [a]
"#;
        let template = parse_template_str(yaml).unwrap();
        let err = resolve_plan(&template, &values()).unwrap_err().to_string();
        assert!(err.contains("unknown placeholder '{mysteryToken}'"));
    }

    #[test]
    fn record_type_placeholder_without_mapping_rejected() {
        let yaml = r#"
id: t
name: T
steps:
  - name: a
    extract:
      object: X__c
      query: "SELECT Id FROM X__c WHERE RecordTypeId = '{targetRecordTypeId}'"
    transform: {}
    load:
      target_object: X__c
      external_id_field: "Migration_Id__c"
execution_order: [a]
"#;
        let template = parse_template_str(yaml).unwrap();
        let err = resolve_plan(&template, &values()).unwrap_err().to_string();
        assert!(err.contains("no record type id was resolved"));
    }

    #[test]
    fn quote_id_list_formats_in_clause() {
        assert_eq!(
            quote_id_list(&["a".to_string(), "b".to_string()]),
            "'a','b'"
        );
        assert_eq!(quote_id_list(&[]), "");
    }
}
