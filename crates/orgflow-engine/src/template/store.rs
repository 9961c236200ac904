//! In-memory registry of migration templates.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use orgflow_types::state::TemplateId;
use orgflow_types::template::MigrationTemplate;
use tracing::debug;

use crate::errors::EngineError;
use crate::template::parser::parse_template;
use crate::template::validator::validate_template;

/// Holds every known template keyed by id. Ids are unique; registering
/// a second template with an existing id is rejected rather than
/// silently replacing the first.
#[derive(Debug, Default)]
pub struct TemplateStore {
    templates: BTreeMap<TemplateId, MigrationTemplate>,
}

impl TemplateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and register a template.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Configuration`] if the template fails
    /// structural validation or its id is already registered.
    pub fn register(&mut self, template: MigrationTemplate) -> Result<(), EngineError> {
        validate_template(&template)?;
        if self.templates.contains_key(&template.id) {
            return Err(EngineError::config(format!(
                "Duplicate template id '{}'",
                template.id
            )));
        }
        debug!(template_id = %template.id, steps = template.steps.len(), "registered template");
        self.templates.insert(template.id.clone(), template);
        Ok(())
    }

    /// Load every `.yaml`/`.yml` file in a directory as a template.
    ///
    /// # Errors
    ///
    /// Fails if the directory cannot be read, any file fails to parse,
    /// or any template fails validation or duplicates an id.
    pub fn load_dir(&mut self, dir: &Path) -> Result<usize, EngineError> {
        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("reading template directory {}", dir.display()))
            .map_err(EngineError::Infrastructure)?;

        let mut paths: Vec<_> = entries
            .filter_map(std::result::Result::ok)
            .map(|e| e.path())
            .filter(|p| {
                matches!(
                    p.extension().and_then(|e| e.to_str()),
                    Some("yaml" | "yml")
                )
            })
            .collect();
        paths.sort();

        let mut loaded = 0;
        for path in paths {
            let template = parse_template(&path)?;
            self.register(template)?;
            loaded += 1;
        }
        Ok(loaded)
    }

    /// # Errors
    ///
    /// Returns [`EngineError::Configuration`] if no template has the id.
    pub fn get(&self, id: &TemplateId) -> Result<&MigrationTemplate, EngineError> {
        self.templates
            .get(id)
            .ok_or_else(|| EngineError::config(format!("Unknown template id '{id}'")))
    }

    #[must_use]
    pub fn ids(&self) -> Vec<&TemplateId> {
        self.templates.keys().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MigrationTemplate> {
        self.templates.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}
