//! Org client trait: the seam between the engine and the remote
//! platform APIs (query, describe, bulk upsert).

use async_trait::async_trait;
use orgflow_types::error::ApiError;
use orgflow_types::record::Record;
use orgflow_types::state::OrgId;
use orgflow_types::template::ConcurrencyMode;
use serde::{Deserialize, Serialize};

/// One page of query results.
#[derive(Debug, Clone, Default)]
pub struct QueryPage {
    pub records: Vec<Record>,
    /// Opaque locator for the next page; `None` on the last page.
    pub next_locator: Option<String>,
}

/// Describe metadata for one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDescribe {
    pub name: String,
    /// Active picklist values; empty for non-picklist fields.
    #[serde(default)]
    pub picklist_values: Vec<String>,
}

/// Describe metadata for one record type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordTypeDescribe {
    pub developer_name: String,
    pub id: String,
}

/// Describe metadata for one object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectDescribe {
    #[serde(default)]
    pub fields: Vec<FieldDescribe>,
    #[serde(default)]
    pub record_types: Vec<RecordTypeDescribe>,
}

impl ObjectDescribe {
    /// Whether a field with this API name exists on the object.
    #[must_use]
    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }

    /// Picklist values for a field, empty when unknown.
    #[must_use]
    pub fn picklist_values(&self, field: &str) -> &[String] {
        self.fields
            .iter()
            .find(|f| f.name == field)
            .map_or(&[], |f| f.picklist_values.as_slice())
    }
}

/// Per-record outcome of a bulk upsert batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpsertRecordResult {
    /// External-id value the record was keyed on.
    pub external_id: String,
    /// Assigned target-side identifier, present on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub success: bool,
    /// Whether the upsert created a new record (vs updating).
    #[serde(default)]
    pub created: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Asynchronous client for one org connection.
///
/// Every method is a remote call; implementations map transport and
/// platform failures to [`ApiError`] with the right category.
#[async_trait]
pub trait OrgClient: Send + Sync {
    /// The org this client is connected to.
    fn org_id(&self) -> &OrgId;

    /// Base instance URL, used to build record deep links.
    fn instance_url(&self) -> &str;

    /// Execute a query, returning the first page of up to `page_size`
    /// records.
    async fn query(&self, query: &str, page_size: u32) -> Result<QueryPage, ApiError>;

    /// Fetch the next page for a locator returned by [`Self::query`].
    async fn query_next(&self, locator: &str) -> Result<QueryPage, ApiError>;

    /// Fetch describe metadata for an object.
    async fn describe(&self, object: &str) -> Result<ObjectDescribe, ApiError>;

    /// Bulk upsert records into `object` keyed by `external_id_field`,
    /// returning one result per submitted record, in order.
    async fn bulk_upsert(
        &self,
        object: &str,
        external_id_field: &str,
        records: &[Record],
        concurrency: ConcurrencyMode,
    ) -> Result<Vec<UpsertRecordResult>, ApiError>;
}

/// Drain every page of a query into one vector.
///
/// # Errors
///
/// Returns the first [`ApiError`] encountered while paging.
pub async fn query_all(
    client: &dyn OrgClient,
    query: &str,
    page_size: u32,
) -> Result<Vec<Record>, ApiError> {
    let mut page = client.query(query, page_size).await?;
    let mut records = std::mem::take(&mut page.records);
    while let Some(locator) = page.next_locator.take() {
        page = client.query_next(&locator).await?;
        records.append(&mut page.records);
    }
    Ok(records)
}
