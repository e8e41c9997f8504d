use std::collections::BTreeMap;

use serde::Serialize;

use grading::{AggregateStats, GradingResult};

use crate::pipeline::ErrorKind;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Completed,
    Failed,
}

#[derive(Clone, Debug, Serialize)]
pub struct SingleResponse {
    pub processing_mode: &'static str,
    pub processing_status: ProcessingStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub student_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub essay_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_id_requested: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<GradingResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total_essays_submitted: usize,
    pub total_essays_validated: usize,
    pub total_essays_graded: usize,
    pub total_validation_errors: usize,
    pub total_rubric_load_errors: usize,
    pub total_grading_errors: usize,
}

/// A failure attributed to one essay of the batch.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EssayError {
    pub essay_index: usize,
    pub student_id: String,
    pub kind: ErrorKind,
    pub error: String,
}

/// A rubric that could not be loaded; reported once per key.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RubricLoadError {
    pub essay_type: String,
    pub content_id: Option<String>,
    /// Essays excluded from grading because of this failure.
    pub essay_indices: Vec<usize>,
    pub error: String,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct BatchErrors {
    pub validation_errors: Vec<EssayError>,
    pub rubric_load_errors: Vec<RubricLoadError>,
    pub grading_errors: Vec<EssayError>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StorageLocations {
    pub complete_batch: String,
    pub results_only: String,
    pub aggregated_results: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StorageOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_results_stored: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s3_locations: Option<StorageLocations>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StorageOutcome {
    pub fn stored(count: usize, locations: StorageLocations) -> Self {
        Self {
            success: true,
            total_results_stored: Some(count),
            s3_locations: Some(locations),
            error: None,
            message: None,
        }
    }

    pub fn failed(error: String) -> Self {
        Self {
            success: false,
            total_results_stored: None,
            s3_locations: None,
            error: Some(error),
            message: None,
        }
    }

    pub fn nothing_to_store() -> Self {
        Self {
            success: false,
            total_results_stored: None,
            s3_locations: None,
            error: None,
            message: Some("No results to store".to_string()),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct BatchResponse {
    pub processing_mode: &'static str,
    pub batch_id: String,
    pub processing_status: ProcessingStatus,
    pub summary: BatchSummary,
    pub unique_essay_types: Vec<String>,
    /// Completion order.
    pub results: Vec<GradingResult>,
    pub errors: BatchErrors,
    pub aggregates_by_essay_type: BTreeMap<String, AggregateStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s3_storage: Option<StorageOutcome>,
}

#[derive(Clone, Debug, Serialize)]
pub struct RubricCreatedResponse {
    pub processing_status: ProcessingStatus,
    pub essay_type: String,
    pub essay_id: String,
    pub rubric_version: String,
    pub score_range: String,
    pub bands: usize,
    pub metric_names: Vec<String>,
    pub sample_essays_used: usize,
}
