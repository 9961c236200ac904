//! Connections file: source and target org credentials.

use std::path::Path;

use anyhow::{Context, Result};
use orgflow_engine::rest::{OrgConnectionConfig, RestOrgClient};
use orgflow_engine::template::parser::substitute_env_vars;
use serde::Deserialize;

/// The connections YAML names the two orgs a migration moves between.
/// Tokens are usually supplied as `${ENV_VAR}` references.
#[derive(Debug, Deserialize)]
pub struct ConnectionsConfig {
    pub source: OrgConnectionConfig,
    pub target: OrgConnectionConfig,
}

impl ConnectionsConfig {
    /// Load and env-substitute a connections file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read connections file: {}", path.display()))?;
        let substituted = substitute_env_vars(&raw)?;
        serde_yaml::from_str(&substituted).context("Failed to parse connections YAML")
    }

    /// Build REST clients for both orgs.
    pub fn clients(&self) -> Result<(RestOrgClient, RestOrgClient)> {
        let source = RestOrgClient::new(&self.source)?;
        let target = RestOrgClient::new(&self.target)?;
        Ok((source, target))
    }
}
