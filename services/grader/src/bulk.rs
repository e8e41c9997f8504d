//! Batch grading.
//!
//! Phases run strictly in order: validate every essay, resolve each distinct
//! rubric once, grade on a bounded pool, aggregate, then optionally persist.
//! A failure in one essay never stops its siblings.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use grading::{student_id_hint, validate_essay, Aggregator, EssayInput};
use rubric::{NormalizedRubric, RubricKey};

use crate::persist::store_batch;
use crate::pipeline::{ErrorKind, ItemError};
use crate::state::AppState;
use crate::types::{
    BatchErrors, BatchResponse, BatchSummary, EssayError, ProcessingStatus, RubricLoadError, StorageOutcome,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BulkOptions {
    /// Total time one invocation may take.
    pub invocation_budget: Duration,
    pub max_concurrency: usize,
    /// How long a batch waits for one essay.
    pub item_timeout: Duration,
    /// Below this much remaining budget, essays are graded one at a time.
    pub low_time_threshold: Duration,
}

impl Default for BulkOptions {
    fn default() -> Self {
        Self {
            invocation_budget: Duration::from_secs(300),
            max_concurrency: 5,
            item_timeout: Duration::from_secs(120),
            low_time_threshold: Duration::from_secs(30),
        }
    }
}

/// Invocation deadline, polled once before grading starts.
#[derive(Clone, Copy, Debug)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    pub fn new(started: Instant, budget: Duration) -> Self {
        Self { at: started + budget }
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }
}

fn default_store() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct BulkRequest {
    pub essays: Vec<Value>,
    #[serde(default, alias = "batchId")]
    pub batch_id: Option<String>,
    #[serde(default, alias = "s3OutputPrefix")]
    pub s3_output_prefix: Option<String>,
    #[serde(default = "default_store", alias = "storeInS3")]
    pub store_in_s3: bool,
}

pub fn default_batch_id(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("batch_{}_{}", now.format("%Y%m%d_%H%M%S"), &suffix[..8])
}

pub fn default_output_prefix(now: DateTime<Utc>) -> String {
    format!("grading_results/{}/", now.format("%Y/%m/%d"))
}

/// Pool size for a batch: `min(max, items)`, serial when time is short.
pub fn pool_size(opts: &BulkOptions, items: usize, remaining: Duration) -> usize {
    if remaining < opts.low_time_threshold {
        warn!(
            remaining_ms = remaining.as_millis() as u64,
            "limited execution time remaining, grading sequentially"
        );
        return 1;
    }
    opts.max_concurrency.min(items).max(1)
}

pub async fn run_bulk(state: &AppState, req: BulkRequest, deadline: Deadline) -> Result<BatchResponse> {
    let now = Utc::now();
    let batch_id = req.batch_id.clone().unwrap_or_else(|| default_batch_id(now));
    let prefix = req.s3_output_prefix.clone().unwrap_or_else(|| default_output_prefix(now));
    let submitted = req.essays.len();

    info!(batch_id = %batch_id, essays = submitted, "processing bulk batch");
    if req.essays.is_empty() {
        bail!("No essays provided in bulk request");
    }

    // 1) validate all
    let mut validated: Vec<(usize, EssayInput)> = Vec::new();
    let mut errors = BatchErrors::default();
    for (index, payload) in req.essays.iter().enumerate() {
        match validate_essay(payload, state.cfg.id_field) {
            Ok(input) => validated.push((index, input)),
            Err(e) => {
                warn!(batch_id = %batch_id, essay_index = index, error = %e, "essay failed validation");
                errors.validation_errors.push(EssayError {
                    essay_index: index,
                    student_id: student_id_hint(payload),
                    kind: ErrorKind::Validation,
                    error: e.to_string(),
                });
            }
        }
    }
    info!(
        batch_id = %batch_id,
        validated = validated.len(),
        validation_errors = errors.validation_errors.len(),
        "validation done"
    );

    // 2) one lookup per distinct rubric key
    let mut by_key: BTreeMap<RubricKey, Vec<usize>> = BTreeMap::new();
    for (index, input) in &validated {
        by_key.entry(input.rubric_key()).or_default().push(*index);
    }
    info!(batch_id = %batch_id, keys = ?by_key.keys().map(|k| k.to_string()).collect::<Vec<_>>(), "distinct rubrics in batch");

    let mut rubrics: HashMap<RubricKey, Arc<NormalizedRubric>> = HashMap::new();
    for (key, indices) in by_key {
        match state.rubric_cache.resolve(state.rubrics.as_ref(), &key).await {
            Ok(rubric) => {
                info!(cache_key = %key, "rubric ready");
                rubrics.insert(key, rubric);
            }
            Err(e) => {
                error!(cache_key = %key, error = %e, "failed to load rubric, its essays are skipped");
                errors.rubric_load_errors.push(RubricLoadError {
                    essay_type: key.essay_type,
                    content_id: key.content_id,
                    essay_indices: indices,
                    error: e.to_string(),
                });
            }
        }
    }

    let unique_essay_types = unique_types(&validated);
    let validated_count = validated.len();

    // 3) grade on a bounded pool, collected as they finish
    let jobs: Vec<(usize, EssayInput, Arc<NormalizedRubric>)> = validated
        .into_iter()
        .filter_map(|(index, input)| {
            let rubric = rubrics.get(&input.rubric_key())?.clone();
            Some((index, input, rubric))
        })
        .collect();

    let concurrency = pool_size(&state.cfg.bulk, validated_count, deadline.remaining());
    info!(batch_id = %batch_id, essays = jobs.len(), concurrency, "grading essays");

    let grader = state.grader();
    let item_timeout = state.cfg.bulk.item_timeout;
    let mut finished = stream::iter(jobs.into_iter().map(|(index, input, rubric)| {
        let grader = grader.clone();
        async move {
            let student_id = input.student_id.clone();
            let task = tokio::spawn(async move { grader.grade(&input, &rubric, Some(index)).await });
            // dropping the handle on timeout detaches the task, it is not aborted
            let outcome = match tokio::time::timeout(item_timeout, task).await {
                Ok(Ok(graded)) => graded,
                Ok(Err(join)) => Err(ItemError::new(ErrorKind::Internal, format!("grading task failed: {join}"))),
                Err(_) => Err(ItemError::new(
                    ErrorKind::Timeout,
                    format!("Processing timeout after {}s", item_timeout.as_secs_f64()),
                )),
            };
            (index, student_id, outcome)
        }
    }))
    .buffer_unordered(concurrency);

    let mut results = Vec::new();
    let mut aggregator = Aggregator::new();
    while let Some((index, student_id, outcome)) = finished.next().await {
        match outcome {
            Ok(result) => {
                info!(batch_id = %batch_id, essay_index = index, student_id = %student_id, "essay graded");
                // 4) aggregate in completion order
                aggregator.add(&result);
                results.push(result);
            }
            Err(e) => {
                error!(
                    batch_id = %batch_id,
                    essay_index = index,
                    kind = ?e.kind,
                    stage = ?e.kind.failed_stage(),
                    error = %e,
                    "essay failed to grade"
                );
                errors.grading_errors.push(EssayError {
                    essay_index: index,
                    student_id,
                    kind: e.kind,
                    error: e.message,
                });
            }
        }
    }

    let mut response = BatchResponse {
        processing_mode: "bulk",
        batch_id: batch_id.clone(),
        processing_status: ProcessingStatus::Completed,
        summary: BatchSummary {
            total_essays_submitted: submitted,
            total_essays_validated: validated_count,
            total_essays_graded: results.len(),
            total_validation_errors: errors.validation_errors.len(),
            total_rubric_load_errors: errors.rubric_load_errors.len(),
            total_grading_errors: errors.grading_errors.len(),
        },
        unique_essay_types,
        results,
        errors,
        aggregates_by_essay_type: aggregator.finish(),
        s3_storage: None,
    };

    // 5) persist, failures are reported not raised
    if req.store_in_s3 {
        let outcome = if response.results.is_empty() {
            StorageOutcome::nothing_to_store()
        } else {
            match store_batch(state.objects.as_ref(), &state.cfg.output_bucket, &prefix, &response, Utc::now()).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(batch_id = %batch_id, error = %format!("{e:#}"), "failed to store batch results");
                    StorageOutcome::failed(format!("{e:#}"))
                }
            }
        };
        response.s3_storage = Some(outcome);
    }

    info!(batch_id = %batch_id, graded = response.summary.total_essays_graded, "bulk processing completed");
    Ok(response)
}

/// Essay types of validated essays, first seen first.
fn unique_types(validated: &[(usize, EssayInput)]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for (_, input) in validated {
        if !out.contains(&input.essay_type) {
            out.push(input.essay_type.clone());
        }
    }
    out
}
