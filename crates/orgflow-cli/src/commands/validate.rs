use std::path::Path;

use anyhow::{Context, Result};
use orgflow_engine::schema::SchemaResolver;
use orgflow_engine::template::parser;
use orgflow_engine::template::validator;
use orgflow_engine::{prepare_plan, validate};
use orgflow_types::issue::Severity;

use crate::config::ConnectionsConfig;

/// Execute the `validate` command: run every declared check against
/// live org data without writing anything.
pub async fn execute(
    template_path: &Path,
    connections_path: &Path,
    select: Vec<String>,
) -> Result<()> {
    let template = parser::parse_template(template_path)
        .with_context(|| format!("Failed to parse template: {}", template_path.display()))?;
    validator::validate_template(&template)?;
    println!("Template structure: OK");

    let connections = ConnectionsConfig::load(connections_path)?;
    let (source, target) = connections.clients()?;

    let mut schema = SchemaResolver::new();
    let plan = prepare_plan(&target, &mut schema, &template, select.clone()).await?;
    println!("Placeholder resolution: OK");

    let report = validate(&source, &target, &mut schema, &plan, &select).await?;

    if report.issues.is_empty() {
        println!("\nAll checks passed.");
        return Ok(());
    }

    for issue in &report.issues {
        let tag = match issue.severity {
            Severity::Error => "ERROR",
            Severity::Warning => "WARN ",
            Severity::Info => "INFO ",
        };
        println!("[{tag}] {}: {}", issue.title, issue.message);
        if let Some(url) = &issue.record_url {
            println!("        {url}");
        }
        if let Some(action) = &issue.suggested_action {
            println!("        -> {action}");
        }
    }
    println!(
        "\n{} errors, {} warnings, {} info",
        report.summary.errors, report.summary.warnings, report.summary.info
    );

    if report.is_valid() {
        Ok(())
    } else {
        anyhow::bail!("Validation found blocking errors")
    }
}
