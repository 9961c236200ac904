//! Schema resolver: discovers org-specific identifiers on demand.
//!
//! The external-id field exists in a package-qualified or unqualified
//! variant depending on how the package was installed in the target
//! org; record-type ids differ per org. Describe results are memoized
//! for the duration of a run.

use std::collections::HashMap;

use crate::client::{ObjectDescribe, OrgClient};
use crate::errors::EngineError;

/// Package-qualified external-id field name, probed first.
pub const QUALIFIED_EXTERNAL_ID_FIELD: &str = "orgflow__Migration_Id__c";
/// Unqualified fallback variant.
pub const UNQUALIFIED_EXTERNAL_ID_FIELD: &str = "Migration_Id__c";

/// Resolves org-specific schema identifiers, memoizing describe calls
/// per object for the run.
#[derive(Default)]
pub struct SchemaResolver {
    describes: HashMap<String, ObjectDescribe>,
}

impl SchemaResolver {
    /// Create an empty resolver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn describe<'a>(
        &'a mut self,
        client: &dyn OrgClient,
        object: &str,
    ) -> Result<&'a ObjectDescribe, EngineError> {
        if !self.describes.contains_key(object) {
            let describe = client.describe(object).await?;
            self.describes.insert(object.to_string(), describe);
        }
        Ok(&self.describes[object])
    }

    /// Determine which external-id field variant is installed on
    /// `object` in the target org.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Schema`] if neither variant exists, or
    /// [`EngineError::Api`] if the describe call fails.
    pub async fn resolve_external_id_field(
        &mut self,
        client: &dyn OrgClient,
        object: &str,
    ) -> Result<String, EngineError> {
        let describe = self.describe(client, object).await?;
        for candidate in [QUALIFIED_EXTERNAL_ID_FIELD, UNQUALIFIED_EXTERNAL_ID_FIELD] {
            if describe.has_field(candidate) {
                tracing::debug!(object, field = candidate, "Resolved external id field");
                return Ok(candidate.to_string());
            }
        }
        Err(EngineError::Schema {
            object: object.to_string(),
            detail: format!(
                "neither '{QUALIFIED_EXTERNAL_ID_FIELD}' nor '{UNQUALIFIED_EXTERNAL_ID_FIELD}' exists"
            ),
        })
    }

    /// Resolve a record-type developer name to its target-org id.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Schema`] if the developer name has no
    /// matching record type, or [`EngineError::Api`] if the describe
    /// call fails.
    pub async fn resolve_record_type_id(
        &mut self,
        client: &dyn OrgClient,
        object: &str,
        developer_name: &str,
    ) -> Result<String, EngineError> {
        let describe = self.describe(client, object).await?;
        describe
            .record_types
            .iter()
            .find(|rt| rt.developer_name == developer_name)
            .map(|rt| rt.id.clone())
            .ok_or_else(|| EngineError::Schema {
                object: object.to_string(),
                detail: format!("no record type with developer name '{developer_name}'"),
            })
    }

    /// Picklist values for a field in the memoized describe, fetching
    /// it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Api`] if the describe call fails.
    pub async fn picklist_values(
        &mut self,
        client: &dyn OrgClient,
        object: &str,
        field: &str,
    ) -> Result<Vec<String>, EngineError> {
        let describe = self.describe(client, object).await?;
        Ok(describe.picklist_values(field).to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockOrgClient;
    use crate::client::{FieldDescribe, RecordTypeDescribe};

    fn client_with_field(field: &str) -> MockOrgClient {
        let client = MockOrgClient::new("target");
        client.add_describe(
            "Pricing_Rule__c",
            ObjectDescribe {
                fields: vec![FieldDescribe {
                    name: field.into(),
                    picklist_values: vec![],
                }],
                record_types: vec![RecordTypeDescribe {
                    developer_name: "Standard".into(),
                    id: "012xx01".into(),
                }],
            },
        );
        client
    }

    #[tokio::test]
    async fn prefers_qualified_variant() {
        let client = client_with_field(QUALIFIED_EXTERNAL_ID_FIELD);
        let mut resolver = SchemaResolver::new();
        let field = resolver
            .resolve_external_id_field(&client, "Pricing_Rule__c")
            .await
            .unwrap();
        assert_eq!(field, QUALIFIED_EXTERNAL_ID_FIELD);
    }

    #[tokio::test]
    async fn falls_back_to_unqualified_variant() {
        let client = client_with_field(UNQUALIFIED_EXTERNAL_ID_FIELD);
        let mut resolver = SchemaResolver::new();
        let field = resolver
            .resolve_external_id_field(&client, "Pricing_Rule__c")
            .await
            .unwrap();
        assert_eq!(field, UNQUALIFIED_EXTERNAL_ID_FIELD);
    }

    #[tokio::test]
    async fn missing_both_variants_is_schema_error() {
        let client = client_with_field("Unrelated__c");
        let mut resolver = SchemaResolver::new();
        let err = resolver
            .resolve_external_id_field(&client, "Pricing_Rule__c")
            .await
            .expect_err("must fail");
        assert!(matches!(err, EngineError::Schema { .. }));
    }

    #[tokio::test]
    async fn record_type_resolution() {
        let client = client_with_field(UNQUALIFIED_EXTERNAL_ID_FIELD);
        let mut resolver = SchemaResolver::new();
        let id = resolver
            .resolve_record_type_id(&client, "Pricing_Rule__c", "Standard")
            .await
            .unwrap();
        assert_eq!(id, "012xx01");

        let err = resolver
            .resolve_record_type_id(&client, "Pricing_Rule__c", "Missing")
            .await
            .expect_err("unknown developer name must fail");
        assert!(matches!(err, EngineError::Schema { .. }));
    }

    #[tokio::test]
    async fn describe_is_memoized_per_object() {
        let client = client_with_field(UNQUALIFIED_EXTERNAL_ID_FIELD);
        let mut resolver = SchemaResolver::new();
        resolver
            .resolve_external_id_field(&client, "Pricing_Rule__c")
            .await
            .unwrap();
        resolver
            .resolve_record_type_id(&client, "Pricing_Rule__c", "Standard")
            .await
            .unwrap();
        assert_eq!(client.describe_count(), 1);
    }
}
