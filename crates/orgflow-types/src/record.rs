//! JSON record wrapper used for extracted and transformed payloads.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single record flowing through the engine: a flat-ish JSON object
/// keyed by field API name, with one level of parent-relationship
/// nesting allowed (e.g. `Parent__r.External_Id__c`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    pub fields: Map<String, Value>,
}

impl Record {
    /// Create an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self { fields: Map::new() }
    }

    /// The record's `Id` field, if present.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.fields.get("Id").and_then(Value::as_str)
    }

    /// Human-readable label for error messages: `Name` if present,
    /// otherwise the id, otherwise `"<unknown>"`.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.fields
            .get("Name")
            .and_then(Value::as_str)
            .or_else(|| self.id())
            .unwrap_or("<unknown>")
    }

    /// Fetch a value by dot path, traversing at most one parent
    /// relationship (`Parent__r.Field__c`). Returns `None` for missing
    /// segments and JSON nulls.
    #[must_use]
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        match path.split_once('.') {
            Some((head, rest)) => walk(self.fields.get(head)?, rest),
            None => {
                let value = self.fields.get(path)?;
                if value.is_null() {
                    None
                } else {
                    Some(value)
                }
            }
        }
    }

    /// Fetch a string value by dot path.
    #[must_use]
    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get_path(path).and_then(Value::as_str)
    }

    /// Set a field value.
    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        self.fields.insert(field.into(), value);
    }
}

fn walk<'a>(value: &'a Value, rest: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in rest.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    if current.is_null() {
        None
    } else {
        Some(current)
    }
}

impl From<Map<String, Value>> for Record {
    fn from(fields: Map<String, Value>) -> Self {
        Self { fields }
    }
}
