//! Template YAML parsing with environment variable substitution.

use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use orgflow_types::template::MigrationTemplate;
use regex::Regex;

static ENV_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid env var regex"));

/// Expand `${VAR_NAME}` references from the process environment.
///
/// # Errors
///
/// Returns an error naming every referenced variable that is unset, so
/// a template with several secrets fails once with the full list.
pub fn substitute_env_vars(input: &str) -> Result<String> {
    let mut missing: Vec<String> = Vec::new();
    let substituted = ENV_VAR_RE.replace_all(input, |cap: &regex::Captures<'_>| {
        std::env::var(&cap[1]).unwrap_or_else(|_| {
            let name = cap[1].to_string();
            if !missing.contains(&name) {
                missing.push(name);
            }
            String::new()
        })
    });

    if missing.is_empty() {
        Ok(substituted.into_owned())
    } else {
        anyhow::bail!(
            "Template references unset environment variable(s): {}",
            missing.join(", ")
        )
    }
}

/// Parse a template YAML string (after env var substitution).
///
/// # Errors
///
/// Returns an error if env var substitution fails or the YAML is invalid.
pub fn parse_template_str(yaml_str: &str) -> Result<MigrationTemplate> {
    let substituted = substitute_env_vars(yaml_str)?;
    let template: MigrationTemplate =
        serde_yaml::from_str(&substituted).context("Failed to parse template YAML")?;
    Ok(template)
}

/// Parse a template YAML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the YAML is invalid.
pub fn parse_template(path: &Path) -> Result<MigrationTemplate> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read template file: {}", path.display()))?;
    parse_template_str(&content)
}
