//! Structural validation for parsed migration templates.
//!
//! Checks everything that can be decided without touching an org:
//! step-name uniqueness, dependency references, and that
//! `execution_order` is a valid topological order of `depends_on`.

use std::collections::HashSet;

use orgflow_types::template::MigrationTemplate;

use crate::errors::EngineError;

/// Validate a parsed template. Collects all problems before failing so
/// the caller sees the full list at once.
///
/// # Errors
///
/// Returns [`EngineError::Configuration`] listing every validation
/// failure found.
pub fn validate_template(template: &MigrationTemplate) -> Result<(), EngineError> {
    let mut errors = Vec::new();

    if template.name.trim().is_empty() {
        errors.push("Template name must not be empty".to_string());
    }
    if template.steps.is_empty() {
        errors.push("Template must define at least one step".to_string());
    }

    let mut step_names = HashSet::new();
    for step in &template.steps {
        if step.name.trim().is_empty() {
            errors.push("Step with an empty name".to_string());
            continue;
        }
        if !step_names.insert(step.name.as_str()) {
            errors.push(format!("Duplicate step name '{}'", step.name));
        }
        if step.extract.query.trim().is_empty() {
            errors.push(format!("Step '{}' has an empty extract query", step.name));
        }
        if step.extract.batch_size == 0 {
            errors.push(format!("Step '{}': extract batch_size must be > 0", step.name));
        }
        if step.load.batch_size == 0 {
            errors.push(format!("Step '{}': load batch_size must be > 0", step.name));
        }
        for dep in &step.depends_on {
            if dep == &step.name {
                errors.push(format!("Step '{}' depends on itself", step.name));
            }
        }
    }

    for step in &template.steps {
        for dep in &step.depends_on {
            if dep != &step.name && !step_names.contains(dep.as_str()) {
                errors.push(format!(
                    "Step '{}' depends on unknown step '{}'",
                    step.name, dep
                ));
            }
        }
    }

    validate_execution_order(template, &step_names, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(EngineError::config(format!(
            "Template validation failed:\n  - {}",
            errors.join("\n  - ")
        )))
    }
}

/// Check that `execution_order` names each step exactly once and that
/// every dependency of a step appears earlier in the order. An order
/// satisfying both cannot contain a dependency cycle.
fn validate_execution_order(
    template: &MigrationTemplate,
    step_names: &HashSet<&str>,
    errors: &mut Vec<String>,
) {
    let mut seen: HashSet<&str> = HashSet::new();
    for name in &template.execution_order {
        if !step_names.contains(name.as_str()) {
            errors.push(format!("execution_order names unknown step '{name}'"));
            continue;
        }
        if !seen.insert(name.as_str()) {
            errors.push(format!("execution_order lists step '{name}' twice"));
            continue;
        }
        if let Some(step) = template.step(name) {
            for dep in &step.depends_on {
                if !seen.contains(dep.as_str()) && step_names.contains(dep.as_str()) {
                    errors.push(format!(
                        "Step '{name}' executes before its dependency '{dep}'"
                    ));
                }
            }
        }
    }

    for step in &template.steps {
        if !seen.contains(step.name.as_str()) {
            errors.push(format!(
                "Step '{}' is missing from execution_order",
                step.name
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::parser::parse_template_str;

    fn two_step_yaml(order: &str) -> String {
        format!(
            r#"
id: pricing-rules
name: Pricing rules
steps:
  - name: load_products
    extract:
      object: Product__c
      query: "SELECT Id, Name, {{externalIdField}} FROM Product__c"
    transform: {{}}
    load:
      target_object: Product__c
      external_id_field: "{{externalIdField}}"
  - name: load_rules
    depends_on: [load_products]
    extract:
      object: Pricing_Rule__c
      query: "SELECT Id, Name FROM Pricing_Rule__c"
    transform: {{}}
    load:
      target_object: Pricing_Rule__c
      external_id_field: "{{externalIdField}}"
execution_order: {order}
"#
        )
    }

    #[test]
    fn valid_order_passes() {
        let template = parse_template_str(&two_step_yaml("[load_products, load_rules]")).unwrap();
        assert!(validate_template(&template).is_ok());
    }

    #[test]
    fn dependency_after_dependent_fails() {
        let template = parse_template_str(&two_step_yaml("[load_rules, load_products]")).unwrap();
        let err = validate_template(&template).unwrap_err().to_string();
        assert!(err.contains("executes before its dependency"));
    }

    #[test]
    fn missing_step_in_order_fails() {
        let template = parse_template_str(&two_step_yaml("[load_products]")).unwrap();
        let err = validate_template(&template).unwrap_err().to_string();
        assert!(err.contains("missing from execution_order"));
    }

    #[test]
    fn unknown_step_in_order_fails() {
        let template =
            parse_template_str(&two_step_yaml("[load_products, load_rules, bogus]")).unwrap();
        let err = validate_template(&template).unwrap_err().to_string();
        assert!(err.contains("unknown step 'bogus'"));
    }

    #[test]
    fn duplicate_in_order_fails() {
        let template =
            parse_template_str(&two_step_yaml("[load_products, load_products, load_rules]"))
                .unwrap();
        let err = validate_template(&template).unwrap_err().to_string();
        assert!(err.contains("twice"));
    }

    #[test]
    fn unknown_dependency_fails() {
        let yaml = r#"
id: t
name: T
steps:
  - name: a
    depends_on: [ghost]
    extract:
      object: X__c
      query: "SELECT Id FROM X__c"
    transform: {}
    load:
      target_object: X__c
      external_id_field: "{externalIdField}"
execution_order: [a]
"#;
        let template = parse_template_str(yaml).unwrap();
        let err = validate_template(&template).unwrap_err().to_string();
        assert!(err.contains("unknown step 'ghost'"));
    }

    #[test]
    fn self_dependency_fails() {
        let yaml = r#"
id: t
name: T
steps:
  - name: a
    depends_on: [a]
    extract:
      object: X__c
      query: "SELECT Id FROM X__c"
    transform: {}
    load:
      target_object: X__c
      external_id_field: "{externalIdField}"
execution_order: [a]
"#;
        let template = parse_template_str(yaml).unwrap();
        let err = validate_template(&template).unwrap_err().to_string();
        assert!(err.contains("depends on itself"));
    }

    #[test]
    fn empty_template_fails() {
        let yaml = r#"
id: t
name: ""
steps: []
execution_order: []
"#;
        let template = parse_template_str(yaml).unwrap();
        let err = validate_template(&template).unwrap_err().to_string();
        assert!(err.contains("at least one step"));
        assert!(err.contains("name must not be empty"));
    }
}
