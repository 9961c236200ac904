//! REST implementation of [`OrgClient`].
//!
//! Speaks the platform's JSON API: `query` with locator-based paging,
//! object describes, and collection upserts keyed by external id.

use std::time::Duration;

use async_trait::async_trait;
use orgflow_types::error::ApiError;
use orgflow_types::record::Record;
use orgflow_types::state::OrgId;
use orgflow_types::template::ConcurrencyMode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, trace};

use crate::client::{
    FieldDescribe, ObjectDescribe, OrgClient, QueryPage, RecordTypeDescribe, UpsertRecordResult,
};
use crate::errors::EngineError;

const DEFAULT_API_VERSION: &str = "v60.0";
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Connection settings for one org, loaded from the connections file.
#[derive(Debug, Clone, Deserialize)]
pub struct OrgConnectionConfig {
    pub org_id: String,
    pub instance_url: String,
    pub access_token: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_api_version() -> String {
    DEFAULT_API_VERSION.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

/// HTTP-backed org client.
pub struct RestOrgClient {
    org_id: OrgId,
    instance_url: String,
    api_version: String,
    access_token: String,
    http: reqwest::Client,
}

impl RestOrgClient {
    /// Build a client from connection settings.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Configuration`] when the HTTP client
    /// cannot be constructed.
    pub fn new(config: &OrgConnectionConfig) -> Result<Self, EngineError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EngineError::config(format!("building HTTP client: {e}")))?;
        Ok(Self {
            org_id: OrgId::new(&config.org_id),
            instance_url: config.instance_url.trim_end_matches('/').to_string(),
            api_version: config.api_version.clone(),
            access_token: config.access_token.clone(),
            http,
        })
    }

    fn data_url(&self, rest: &str) -> String {
        format!(
            "{}/services/data/{}/{rest}",
            self.instance_url, self.api_version
        )
    }

    async fn get_json(&self, url: &str, batch_size: Option<u32>) -> Result<Value, ApiError> {
        trace!(url, "GET");
        let mut request = self.http.get(url).bearer_auth(&self.access_token);
        if let Some(n) = batch_size {
            request = request.header("Sforce-Query-Options", format!("batchSize={n}"));
        }
        let response = request.send().await.map_err(map_transport_error)?;
        decode_response(response).await
    }
}

#[async_trait]
impl OrgClient for RestOrgClient {
    fn org_id(&self) -> &OrgId {
        &self.org_id
    }

    fn instance_url(&self) -> &str {
        &self.instance_url
    }

    async fn query(&self, query: &str, page_size: u32) -> Result<QueryPage, ApiError> {
        let url = format!(
            "{}?q={}",
            self.data_url("query"),
            urlencode(query)
        );
        let body = self.get_json(&url, Some(page_size)).await?;
        Ok(parse_query_page(&body))
    }

    async fn query_next(&self, locator: &str) -> Result<QueryPage, ApiError> {
        // Locators come back as absolute paths under /services/data.
        let url = format!("{}{locator}", self.instance_url);
        let body = self.get_json(&url, None).await?;
        Ok(parse_query_page(&body))
    }

    async fn describe(&self, object: &str) -> Result<ObjectDescribe, ApiError> {
        let url = self.data_url(&format!("sobjects/{object}/describe"));
        let body = self.get_json(&url, None).await?;
        Ok(parse_describe(&body))
    }

    async fn bulk_upsert(
        &self,
        object: &str,
        external_id_field: &str,
        records: &[Record],
        _concurrency: ConcurrencyMode,
    ) -> Result<Vec<UpsertRecordResult>, ApiError> {
        let url = self.data_url(&format!("composite/sobjects/{object}/{external_id_field}"));
        let payload = UpsertPayload {
            all_or_none: false,
            records: records
                .iter()
                .map(|r| attributed(object, r))
                .collect(),
        };
        debug!(object, count = records.len(), "Upserting batch");
        let response = self
            .http
            .patch(&url)
            .bearer_auth(&self.access_token)
            .json(&payload)
            .send()
            .await
            .map_err(map_transport_error)?;
        let body = decode_response(response).await?;

        let rows = body.as_array().cloned().unwrap_or_default();
        let results = rows
            .iter()
            .zip(records)
            .map(|(row, record)| parse_upsert_row(row, record, external_id_field))
            .collect();
        Ok(results)
    }
}

#[derive(Serialize)]
struct UpsertPayload {
    #[serde(rename = "allOrNone")]
    all_or_none: bool,
    records: Vec<Value>,
}

/// The collections API requires an `attributes.type` entry per record.
fn attributed(object: &str, record: &Record) -> Value {
    let mut fields = record.fields.clone();
    fields.insert(
        "attributes".to_string(),
        serde_json::json!({ "type": object }),
    );
    Value::Object(fields)
}

fn parse_query_page(body: &Value) -> QueryPage {
    let records = body
        .get("records")
        .and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .filter_map(Value::as_object)
                .map(|obj| {
                    let mut fields: Map<String, Value> = obj.clone();
                    fields.remove("attributes");
                    Record { fields }
                })
                .collect()
        })
        .unwrap_or_default();
    let next_locator = if body.get("done").and_then(Value::as_bool) == Some(false) {
        body.get("nextRecordsUrl")
            .and_then(Value::as_str)
            .map(str::to_string)
    } else {
        None
    };
    QueryPage {
        records,
        next_locator,
    }
}

fn parse_describe(body: &Value) -> ObjectDescribe {
    let fields = body
        .get("fields")
        .and_then(Value::as_array)
        .map(|fields| {
            fields
                .iter()
                .filter_map(|f| {
                    let name = f.get("name")?.as_str()?.to_string();
                    let picklist_values = f
                        .get("picklistValues")
                        .and_then(Value::as_array)
                        .map(|values| {
                            values
                                .iter()
                                .filter(|v| {
                                    v.get("active").and_then(Value::as_bool).unwrap_or(true)
                                })
                                .filter_map(|v| v.get("value")?.as_str().map(str::to_string))
                                .collect()
                        })
                        .unwrap_or_default();
                    Some(FieldDescribe {
                        name,
                        picklist_values,
                    })
                })
                .collect()
        })
        .unwrap_or_default();
    let record_types = body
        .get("recordTypeInfos")
        .and_then(Value::as_array)
        .map(|infos| {
            infos
                .iter()
                .filter(|rt| rt.get("available").and_then(Value::as_bool).unwrap_or(true))
                .filter_map(|rt| {
                    Some(RecordTypeDescribe {
                        developer_name: rt.get("developerName")?.as_str()?.to_string(),
                        id: rt.get("recordTypeId")?.as_str()?.to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();
    ObjectDescribe {
        fields,
        record_types,
    }
}

fn parse_upsert_row(row: &Value, record: &Record, external_id_field: &str) -> UpsertRecordResult {
    let external_id = record
        .get_str(external_id_field)
        .unwrap_or_default()
        .to_string();
    let success = row.get("success").and_then(Value::as_bool).unwrap_or(false);
    let first_error = row
        .get("errors")
        .and_then(Value::as_array)
        .and_then(|errs| errs.first());
    UpsertRecordResult {
        external_id,
        id: row.get("id").and_then(Value::as_str).map(str::to_string),
        success,
        created: row.get("created").and_then(Value::as_bool).unwrap_or(false),
        error_code: first_error
            .and_then(|e| e.get("statusCode"))
            .and_then(Value::as_str)
            .map(str::to_string),
        error_message: first_error
            .and_then(|e| e.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string),
    }
}

/// Map reqwest transport failures onto the error taxonomy.
fn map_transport_error(err: reqwest::Error) -> ApiError {
    if err.is_timeout() {
        ApiError::timeout("REQUEST_TIMEOUT", err.to_string())
    } else if err.is_connect() {
        ApiError::transient_network("CONNECTION_FAILED", err.to_string())
    } else {
        ApiError::internal("TRANSPORT_ERROR", err.to_string())
    }
}

/// Turn an HTTP response into JSON, classifying non-success statuses.
async fn decode_response(response: reqwest::Response) -> Result<Value, ApiError> {
    let status = response.status();
    let retry_after_ms = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .map(|secs| secs * 1000);
    let body: Value = match response.json().await {
        Ok(value) => value,
        Err(err) => {
            if status.is_success() {
                return Err(ApiError::internal("MALFORMED_RESPONSE", err.to_string()));
            }
            Value::Null
        }
    };
    if status.is_success() {
        return Ok(body);
    }

    let (code, message) = first_api_error(&body)
        .unwrap_or_else(|| ("HTTP_ERROR".to_string(), format!("HTTP {status}")));
    Err(match status.as_u16() {
        401 => ApiError::auth(code, message),
        403 => ApiError::permission(code, message),
        429 => ApiError::rate_limit(code, message, retry_after_ms),
        500..=599 => ApiError::transient_network(code, message),
        _ => ApiError::classify(code, message),
    })
}

/// Error bodies are arrays of `{errorCode, message}` objects.
fn first_api_error(body: &Value) -> Option<(String, String)> {
    let first = body.as_array()?.first()?;
    let code = first.get("errorCode")?.as_str()?.to_string();
    let message = first
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Some((code, message))
}

/// Percent-encode a query string for the `q` parameter.
fn urlencode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char);
            }
            b' ' => out.push('+'),
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}
