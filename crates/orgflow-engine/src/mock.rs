//! Programmable in-memory [`OrgClient`] used across unit tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use orgflow_types::error::ApiError;
use orgflow_types::record::Record;
use orgflow_types::state::OrgId;
use orgflow_types::template::ConcurrencyMode;

use crate::client::{ObjectDescribe, OrgClient, QueryPage, UpsertRecordResult};

/// How many consecutive upsert attempts for one external id should
/// fail with a given error code before succeeding. `usize::MAX` never
/// succeeds.
struct FailurePlan {
    code: String,
    message: String,
    remaining: usize,
}

#[derive(Default)]
struct Inner {
    describes: HashMap<String, ObjectDescribe>,
    describe_calls: usize,
    // Matched by substring so tests can key on a fragment of the query.
    query_results: Vec<(String, Vec<Record>)>,
    query_calls: usize,
    pending_pages: HashMap<String, Vec<Record>>,
    next_locator: usize,
    upsert_failures: HashMap<String, FailurePlan>,
    // Errors returned for whole bulk_upsert calls, consumed in order.
    upsert_call_errors: Vec<ApiError>,
    // (object, external id value) -> stored record and assigned id.
    store: HashMap<(String, String), (String, Record)>,
    upsert_batch_sizes: Vec<usize>,
    next_id: usize,
}

pub(crate) struct MockOrgClient {
    org_id: OrgId,
    instance_url: String,
    inner: Mutex<Inner>,
}

impl MockOrgClient {
    pub fn new(org: &str) -> Self {
        Self {
            org_id: OrgId::new(org),
            instance_url: format!("https://{org}.example.test"),
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn add_describe(&self, object: &str, describe: ObjectDescribe) {
        self.lock().describes.insert(object.to_string(), describe);
    }

    pub fn describe_count(&self) -> usize {
        self.lock().describe_calls
    }

    /// Register records returned for any query containing `needle`.
    pub fn add_query_result(&self, needle: &str, records: Vec<Record>) {
        self.lock()
            .query_results
            .push((needle.to_string(), records));
    }

    pub fn query_count(&self) -> usize {
        self.lock().query_calls
    }

    /// Make the next `times` upsert attempts for `external_id` fail
    /// with `code`.
    pub fn fail_upsert(&self, external_id: &str, code: &str, times: usize) {
        self.lock().upsert_failures.insert(
            external_id.to_string(),
            FailurePlan {
                code: code.to_string(),
                message: format!("injected {code}"),
                remaining: times,
            },
        );
    }

    /// Make the next `times` `bulk_upsert` calls fail outright with
    /// `error` before any record is examined.
    pub fn fail_upsert_call(&self, error: ApiError, times: usize) {
        let mut inner = self.lock();
        for _ in 0..times {
            inner.upsert_call_errors.push(error.clone());
        }
    }

    /// Sizes of each `bulk_upsert` batch received, in call order.
    pub fn upsert_batch_sizes(&self) -> Vec<usize> {
        self.lock().upsert_batch_sizes.clone()
    }

    pub fn stored(&self, object: &str, external_id: &str) -> Option<Record> {
        self.lock()
            .store
            .get(&(object.to_string(), external_id.to_string()))
            .map(|(_, record)| record.clone())
    }

    pub fn stored_count(&self, object: &str) -> usize {
        self.lock()
            .store
            .keys()
            .filter(|(obj, _)| obj == object)
            .count()
    }
}

#[async_trait]
impl OrgClient for MockOrgClient {
    fn org_id(&self) -> &OrgId {
        &self.org_id
    }

    fn instance_url(&self) -> &str {
        &self.instance_url
    }

    async fn query(&self, query: &str, page_size: u32) -> Result<QueryPage, ApiError> {
        let mut inner = self.lock();
        inner.query_calls += 1;
        let records = inner
            .query_results
            .iter()
            .find(|(needle, _)| query.contains(needle.as_str()))
            .map(|(_, records)| records.clone())
            .unwrap_or_default();

        let page_size = page_size as usize;
        if records.len() <= page_size {
            return Ok(QueryPage {
                records,
                next_locator: None,
            });
        }
        let mut records = records;
        let rest = records.split_off(page_size);
        let locator = format!("loc-{}", inner.next_locator);
        inner.next_locator += 1;
        inner.pending_pages.insert(locator.clone(), rest);
        Ok(QueryPage {
            records,
            next_locator: Some(locator),
        })
    }

    async fn query_next(&self, locator: &str) -> Result<QueryPage, ApiError> {
        let mut inner = self.lock();
        inner.query_calls += 1;
        let records = inner
            .pending_pages
            .remove(locator)
            .ok_or_else(|| ApiError::internal("INVALID_LOCATOR", "unknown query locator"))?;
        Ok(QueryPage {
            records,
            next_locator: None,
        })
    }

    async fn describe(&self, object: &str) -> Result<ObjectDescribe, ApiError> {
        let mut inner = self.lock();
        inner.describe_calls += 1;
        inner
            .describes
            .get(object)
            .cloned()
            .ok_or_else(|| ApiError::schema("INVALID_TYPE", format!("no such object '{object}'")))
    }

    async fn bulk_upsert(
        &self,
        object: &str,
        external_id_field: &str,
        records: &[Record],
        _concurrency: ConcurrencyMode,
    ) -> Result<Vec<UpsertRecordResult>, ApiError> {
        let mut inner = self.lock();
        inner.upsert_batch_sizes.push(records.len());
        if !inner.upsert_call_errors.is_empty() {
            return Err(inner.upsert_call_errors.remove(0));
        }

        let mut results = Vec::with_capacity(records.len());
        for record in records {
            let Some(external_id) = record.get_str(external_id_field).map(str::to_string) else {
                results.push(UpsertRecordResult {
                    external_id: String::new(),
                    id: None,
                    success: false,
                    created: false,
                    error_code: Some("REQUIRED_FIELD_MISSING".to_string()),
                    error_message: Some(format!("missing value for {external_id_field}")),
                });
                continue;
            };

            if let Some(plan) = inner.upsert_failures.get_mut(&external_id) {
                if plan.remaining > 0 {
                    if plan.remaining != usize::MAX {
                        plan.remaining -= 1;
                    }
                    results.push(UpsertRecordResult {
                        external_id,
                        id: None,
                        success: false,
                        created: false,
                        error_code: Some(plan.code.clone()),
                        error_message: Some(plan.message.clone()),
                    });
                    continue;
                }
            }

            let key = (object.to_string(), external_id.clone());
            let (id, created) = match inner.store.get(&key) {
                Some((id, _)) => (id.clone(), false),
                None => {
                    inner.next_id += 1;
                    (format!("{object}-{:04}", inner.next_id), true)
                }
            };
            inner.store.insert(key, (id.clone(), record.clone()));
            results.push(UpsertRecordResult {
                external_id,
                id: Some(id),
                success: true,
                created,
                error_code: None,
                error_message: None,
            });
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(id: &str) -> Record {
        Record {
            fields: serde_json::from_value(json!({ "Id": id, "Migration_Id__c": id }))
                .expect("object"),
        }
    }

    #[tokio::test]
    async fn query_pages_are_drained_in_order() {
        let client = MockOrgClient::new("source");
        client.add_query_result(
            "FROM Product__c",
            vec![record("a"), record("b"), record("c")],
        );
        let page = client.query("SELECT Id FROM Product__c", 2).await.unwrap();
        assert_eq!(page.records.len(), 2);
        let locator = page.next_locator.expect("second page");
        let rest = client.query_next(&locator).await.unwrap();
        assert_eq!(rest.records.len(), 1);
        assert!(rest.next_locator.is_none());
    }

    #[tokio::test]
    async fn upsert_is_keyed_by_external_id() {
        let client = MockOrgClient::new("target");
        let first = client
            .bulk_upsert(
                "Product__c",
                "Migration_Id__c",
                &[record("x")],
                ConcurrencyMode::Serial,
            )
            .await
            .unwrap();
        assert!(first[0].created);

        let second = client
            .bulk_upsert(
                "Product__c",
                "Migration_Id__c",
                &[record("x")],
                ConcurrencyMode::Serial,
            )
            .await
            .unwrap();
        assert!(second[0].success);
        assert!(!second[0].created);
        assert_eq!(first[0].id, second[0].id);
        assert_eq!(client.stored_count("Product__c"), 1);
    }

    #[tokio::test]
    async fn injected_failures_expire() {
        let client = MockOrgClient::new("target");
        client.fail_upsert("x", "UNABLE_TO_LOCK_ROW", 1);
        let attempt1 = client
            .bulk_upsert(
                "Product__c",
                "Migration_Id__c",
                &[record("x")],
                ConcurrencyMode::Serial,
            )
            .await
            .unwrap();
        assert_eq!(attempt1[0].error_code.as_deref(), Some("UNABLE_TO_LOCK_ROW"));

        let attempt2 = client
            .bulk_upsert(
                "Product__c",
                "Migration_Id__c",
                &[record("x")],
                ConcurrencyMode::Serial,
            )
            .await
            .unwrap();
        assert!(attempt2[0].success);
    }
}
