//! Per-run execution state shared across steps.

use chrono::{DateTime, Utc};
use orgflow_types::state::{OrgId, TemplateId};

use crate::cache::LookupCache;

/// Mutable state threaded through every step of one migration run.
/// Owns the lookup cache so mappings written by one step are visible
/// to every later step without re-querying the target org.
#[derive(Debug)]
pub struct ExecutionContext {
    pub run_id: i64,
    pub template_id: TemplateId,
    pub source_org: OrgId,
    pub target_org: OrgId,
    /// Source record ids this run is scoped to, empty for a full run.
    pub selected_record_ids: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub cache: LookupCache,
}

impl ExecutionContext {
    #[must_use]
    pub fn new(
        run_id: i64,
        template_id: TemplateId,
        source_org: OrgId,
        target_org: OrgId,
        selected_record_ids: Vec<String>,
    ) -> Self {
        Self {
            run_id,
            template_id,
            source_org,
            target_org,
            selected_record_ids,
            started_at: Utc::now(),
            cache: LookupCache::new(),
        }
    }
}
