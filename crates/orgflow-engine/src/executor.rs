//! Step execution: extract from the source org, transform in memory,
//! load into the target org with batching and retry.
//!
//! Failures are per record wherever the platform reports them per
//! record. A step only aborts wholesale on unrecoverable API errors
//! (auth, schema) or when partial success is disabled and records
//! failed.

use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use orgflow_types::record::Record;
use orgflow_types::result::{RecordError, StepResult, StepStatus};
use orgflow_types::template::{ConcurrencyMode, FieldMapping, RetryConfig, TransformKind};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::client::{query_all, OrgClient, UpsertRecordResult};
use crate::context::ExecutionContext;
use crate::errors::{is_code_retryable, EngineError};
use crate::hooks::RunHook;
use crate::resolve::ResolvedStep;

/// Concurrent in-flight batches when a step loads in parallel mode.
const PARALLEL_BATCHES: usize = 4;

const CODE_REQUIRED_FIELD_MISSING: &str = "REQUIRED_FIELD_MISSING";
const CODE_LOOKUP_NOT_FOUND: &str = "LOOKUP_NOT_FOUND";
const CODE_INVALID_TYPE: &str = "INVALID_TYPE";
const CODE_MISSING_EXTERNAL_ID: &str = "MISSING_EXTERNAL_ID";

/// A transformed record paired with its source id for error reporting.
#[derive(Debug, Clone)]
struct LoadRecord {
    source_id: Option<String>,
    record: Record,
}

/// Executes one resolved step against a source and a target org.
pub struct StepExecutor<'a> {
    pub source: &'a dyn OrgClient,
    pub target: &'a dyn OrgClient,
}

impl StepExecutor<'_> {
    /// Run extract, transform and load for one step.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Api`] when extraction or a whole load
    /// call fails unrecoverably. Per-record failures never error; they
    /// land in the returned [`StepResult`].
    pub async fn execute(
        &self,
        resolved: &ResolvedStep,
        ctx: &mut ExecutionContext,
        hooks: &[Arc<dyn RunHook>],
    ) -> Result<StepResult, EngineError> {
        let step = &resolved.step;
        let started_at = Utc::now();
        info!(step = %step.name, object = %step.extract.object, "Executing step");

        let extracted =
            query_all(self.source, &step.extract.query, step.extract.batch_size).await?;
        for hook in hooks {
            hook.after_extract(ctx, &step.name, &extracted).await;
        }

        let total_records = extracted.len() as u64;
        let (load_records, mut errors) = self.transform(resolved, ctx, extracted).await?;

        let transformed: Vec<Record> =
            load_records.iter().map(|lr| lr.record.clone()).collect();
        for hook in hooks {
            hook.before_load(ctx, &step.name, &transformed).await;
        }
        drop(transformed);

        let outcomes = self.load(resolved, load_records).await?;

        let mut successful_records = 0u64;
        for (load_record, result) in outcomes {
            if result.success {
                successful_records += 1;
                if let Some(id) = result.id {
                    // Feed the cache so later steps resolve lookups to
                    // this record without querying the target org.
                    ctx.cache
                        .insert(&step.load.target_object, &result.external_id, &id)
                        .map_err(|conflict| EngineError::config(conflict.to_string()))?;
                }
            } else {
                errors.push(RecordError {
                    record_id: load_record.source_id,
                    external_id: Some(result.external_id).filter(|s| !s.is_empty()),
                    code: result
                        .error_code
                        .unwrap_or_else(|| "UNKNOWN_ERROR".to_string()),
                    message: result.error_message.unwrap_or_default(),
                });
            }
        }

        let failed_records = errors.len() as u64;
        let status = if failed_records > 0 && !step.load.allow_partial_success {
            StepStatus::Failed
        } else {
            StepStatus::Completed
        };
        if failed_records > 0 {
            warn!(
                step = %step.name,
                failed = failed_records,
                partial_success = step.load.allow_partial_success,
                "Step finished with record failures"
            );
        }

        Ok(StepResult {
            step_name: step.name.clone(),
            status,
            total_records,
            successful_records,
            failed_records,
            errors,
            started_at,
            finished_at: Utc::now(),
        })
    }

    /// Apply field mappings, lookups and record-type rewriting to each
    /// extracted record. Records that cannot be transformed are
    /// dropped with a per-record error; the rest proceed to load.
    async fn transform(
        &self,
        resolved: &ResolvedStep,
        ctx: &mut ExecutionContext,
        extracted: Vec<Record>,
    ) -> Result<(Vec<LoadRecord>, Vec<RecordError>), EngineError> {
        let step = &resolved.step;
        let mut out = Vec::with_capacity(extracted.len());
        let mut errors = Vec::new();

        'records: for source in extracted {
            let source_id = source.id().map(str::to_string);
            let mut target = Record::new();

            for mapping in &step.transform.field_mappings {
                match apply_field_mapping(&source, mapping) {
                    Ok(Some(value)) => target.set(&mapping.target_field, value),
                    Ok(None) => {
                        if mapping.required {
                            errors.push(record_error(
                                &source,
                                CODE_REQUIRED_FIELD_MISSING,
                                format!("required field '{}' is empty", mapping.source_field),
                            ));
                            continue 'records;
                        }
                    }
                    Err(message) => {
                        errors.push(record_error(&source, CODE_INVALID_TYPE, message));
                        continue 'records;
                    }
                }
            }

            for lookup in &step.transform.lookup_mappings {
                let Some(key) = source.get_str(&lookup.source_field) else {
                    continue;
                };
                let target_id = match ctx.cache.get(&lookup.target_object, key) {
                    Some(id) => id.to_string(),
                    None => {
                        match self.resolve_lookup(lookup, key).await? {
                            Some(id) => {
                                if lookup.cacheable {
                                    ctx.cache
                                        .insert(&lookup.target_object, key, &id)
                                        .map_err(|c| EngineError::config(c.to_string()))?;
                                }
                                id
                            }
                            None => {
                                errors.push(record_error(
                                    &source,
                                    CODE_LOOKUP_NOT_FOUND,
                                    format!(
                                        "no {} with {} = '{}' in the target org",
                                        lookup.target_object, lookup.key_field, key
                                    ),
                                ));
                                continue 'records;
                            }
                        }
                    }
                };
                target.set(&lookup.target_field, Value::String(target_id));
            }

            if let Some(record_type_id) = &resolved.record_type_id {
                target.set("RecordTypeId", Value::String(record_type_id.clone()));
            }

            match external_id_value(&source, &step.load.external_id_field) {
                Some(external_id) => {
                    target.set(&step.load.external_id_field, Value::String(external_id));
                }
                None => {
                    errors.push(record_error(
                        &source,
                        CODE_MISSING_EXTERNAL_ID,
                        format!(
                            "record has neither '{}' nor an Id to key the upsert on",
                            step.load.external_id_field
                        ),
                    ));
                    continue 'records;
                }
            }

            out.push(LoadRecord {
                source_id,
                record: target,
            });
        }

        debug!(
            step = %step.name,
            transformed = out.len(),
            rejected = errors.len(),
            "Transform complete"
        );
        Ok((out, errors))
    }

    /// Resolve a lookup key directly against the target org. Used only
    /// on cache misses.
    async fn resolve_lookup(
        &self,
        lookup: &orgflow_types::template::LookupMapping,
        key: &str,
    ) -> Result<Option<String>, EngineError> {
        let query = format!(
            "SELECT Id FROM {} WHERE {} = '{}' LIMIT 1",
            lookup.target_object, lookup.key_field, key
        );
        let rows = query_all(self.target, &query, 1).await?;
        Ok(rows.first().and_then(Record::id).map(str::to_string))
    }

    /// Upsert transformed records in batches, serially or with bounded
    /// parallelism per the step's load config.
    async fn load(
        &self,
        resolved: &ResolvedStep,
        records: Vec<LoadRecord>,
    ) -> Result<Vec<(LoadRecord, UpsertRecordResult)>, EngineError> {
        if records.is_empty() {
            return Ok(Vec::new());
        }
        let step = &resolved.step;
        let total = records.len();
        let batch_size = step.load.batch_size.max(1) as usize;
        let mut batches: Vec<Vec<LoadRecord>> = Vec::with_capacity(total.div_ceil(batch_size));
        let mut rest = records;
        while rest.len() > batch_size {
            let tail = rest.split_off(batch_size);
            batches.push(rest);
            rest = tail;
        }
        batches.push(rest);
        debug!(
            step = %step.name,
            batches = batches.len(),
            batch_size,
            "Loading records"
        );

        match step.load.concurrency {
            ConcurrencyMode::Serial => {
                let mut outcomes = Vec::with_capacity(total);
                for batch in batches {
                    outcomes.extend(self.upsert_with_retry(resolved, batch).await?);
                }
                Ok(outcomes)
            }
            ConcurrencyMode::Parallel => {
                let results: Vec<Result<Vec<(LoadRecord, UpsertRecordResult)>, EngineError>> =
                    stream::iter(batches)
                        .map(|batch| self.upsert_with_retry(resolved, batch))
                        .buffered(PARALLEL_BATCHES)
                        .collect()
                        .await;
                let mut outcomes = Vec::new();
                for result in results {
                    outcomes.extend(result?);
                }
                Ok(outcomes)
            }
        }
    }

    /// Upsert one batch, re-submitting records that failed with a
    /// retryable error code. A policy of `max_retries` allows that
    /// many re-submissions after the initial attempt.
    async fn upsert_with_retry(
        &self,
        resolved: &ResolvedStep,
        batch: Vec<LoadRecord>,
    ) -> Result<Vec<(LoadRecord, UpsertRecordResult)>, EngineError> {
        let step = &resolved.step;
        let retry = &step.load.retry;
        let mut pending = batch;
        let mut finished = Vec::new();

        for attempt in 0..=retry.max_retries {
            let payload: Vec<Record> = pending.iter().map(|lr| lr.record.clone()).collect();
            let results = match self
                .target
                .bulk_upsert(
                    &step.load.target_object,
                    &step.load.external_id_field,
                    &payload,
                    step.load.concurrency,
                )
                .await
            {
                Ok(results) => results,
                Err(api_error) => {
                    // A call that failed in transit (timeout, dropped
                    // connection, rate limit) is retryable by category
                    // even when its code is not in the step's list.
                    if attempt < retry.max_retries
                        && (api_error.retryable
                            || is_code_retryable(&api_error, &retry.retryable_errors))
                    {
                        warn!(
                            step = %step.name,
                            attempt = attempt + 1,
                            code = %api_error.code,
                            "Batch upsert failed, retrying"
                        );
                        wait_before_retry(retry).await;
                        continue;
                    }
                    if api_error.category == orgflow_types::error::ApiErrorCategory::Auth {
                        return Err(EngineError::Api(api_error));
                    }
                    // Terminal batch failure: every pending record
                    // fails with the call's error code.
                    for load_record in pending {
                        let external_id = load_record
                            .record
                            .get_str(&step.load.external_id_field)
                            .unwrap_or_default()
                            .to_string();
                        finished.push((
                            load_record,
                            UpsertRecordResult {
                                external_id,
                                id: None,
                                success: false,
                                created: false,
                                error_code: Some(api_error.code.clone()),
                                error_message: Some(api_error.message.clone()),
                            },
                        ));
                    }
                    return Ok(finished);
                }
            };

            let mut retryable = Vec::new();
            for (load_record, result) in pending.into_iter().zip(results) {
                let code_is_retryable = result
                    .error_code
                    .as_deref()
                    .is_some_and(|code| retry.retryable_errors.iter().any(|c| c == code));
                if !result.success && code_is_retryable && attempt < retry.max_retries {
                    retryable.push(load_record);
                } else {
                    finished.push((load_record, result));
                }
            }
            if retryable.is_empty() {
                return Ok(finished);
            }
            warn!(
                step = %step.name,
                attempt = attempt + 1,
                retrying = retryable.len(),
                "Re-submitting records after retryable failures"
            );
            pending = retryable;
            wait_before_retry(retry).await;
        }

        // Unreachable: the loop always returns once no record is
        // eligible for another attempt.
        Ok(finished)
    }
}

async fn wait_before_retry(retry: &RetryConfig) {
    if retry.retry_wait_secs > 0 {
        tokio::time::sleep(std::time::Duration::from_secs(retry.retry_wait_secs)).await;
    }
}

/// The upsert key for a source record: its migration id if it carries
/// one, otherwise its source org id.
fn external_id_value(source: &Record, external_id_field: &str) -> Option<String> {
    source
        .get_str(external_id_field)
        .or_else(|| source.id())
        .map(str::to_string)
}

fn record_error(source: &Record, code: &str, message: String) -> RecordError {
    RecordError {
        record_id: source.id().map(str::to_string),
        external_id: None,
        code: code.to_string(),
        message,
    }
}

/// Apply one field mapping. `Ok(None)` means the source value is
/// absent; `Err` carries a coercion failure message.
fn apply_field_mapping(source: &Record, mapping: &FieldMapping) -> Result<Option<Value>, String> {
    let Some(value) = source.get_path(&mapping.source_field) else {
        return Ok(None);
    };
    match mapping.kind {
        TransformKind::Direct => Ok(Some(value.clone())),
        TransformKind::Boolean => coerce_boolean(value)
            .map(|b| Some(Value::Bool(b)))
            .ok_or_else(|| {
                format!(
                    "field '{}' value {value} is not a boolean",
                    mapping.source_field
                )
            }),
        TransformKind::Number => coerce_number(value).map(Some).ok_or_else(|| {
            format!(
                "field '{}' value {value} is not a number",
                mapping.source_field
            )
        }),
    }
}

fn coerce_boolean(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        },
        Value::Number(n) => match n.as_i64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        _ => None,
    }
}

fn coerce_number(value: &Value) -> Option<Value> {
    match value {
        Value::Number(_) => Some(value.clone()),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number),
        _ => None,
    }
}
