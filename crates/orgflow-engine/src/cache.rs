//! Run-scoped lookup cache: (object, external-id value) -> target id.
//!
//! Owned exclusively by one execution context. Keys are write-once: a
//! second write with a different value indicates non-idempotent step
//! ordering and is rejected rather than silently overwritten.

use std::collections::HashMap;

/// Conflicting second write for a cache key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error(
    "lookup cache conflict for {object}/{key}: existing id {existing}, attempted {attempted}"
)]
pub struct CacheConflict {
    pub object: String,
    pub key: String,
    pub existing: String,
    pub attempted: String,
}

/// Mapping from (target object, external-id value) to the record's
/// target-side identifier. Seeded by validation pre-queries, extended
/// as each load phase completes.
#[derive(Debug, Default)]
pub struct LookupCache {
    entries: HashMap<(String, String), String>,
}

impl LookupCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve an external-id value against an object's namespace.
    #[must_use]
    pub fn get(&self, object: &str, key: &str) -> Option<&str> {
        self.entries
            .get(&(object.to_string(), key.to_string()))
            .map(String::as_str)
    }

    /// Whether a key is present.
    #[must_use]
    pub fn contains(&self, object: &str, key: &str) -> bool {
        self.get(object, key).is_some()
    }

    /// Insert a mapping. Re-inserting the identical value is a no-op;
    /// a different value is a [`CacheConflict`].
    ///
    /// # Errors
    ///
    /// Returns [`CacheConflict`] when the key already maps to a
    /// different target id.
    pub fn insert(
        &mut self,
        object: impl Into<String>,
        key: impl Into<String>,
        target_id: impl Into<String>,
    ) -> Result<(), CacheConflict> {
        let object = object.into();
        let key = key.into();
        let target_id = target_id.into();
        match self.entries.get(&(object.clone(), key.clone())) {
            Some(existing) if *existing == target_id => Ok(()),
            Some(existing) => Err(CacheConflict {
                existing: existing.clone(),
                attempted: target_id,
                object,
                key,
            }),
            None => {
                self.entries.insert((object, key), target_id);
                Ok(())
            }
        }
    }

    /// Number of cached mappings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no mappings.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
