//! One essay: validate, resolve rubric, call the model, prepare the result.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{error, info};

use grading::{
    build_grading_prompt, prepare_result, prompt_fingerprint, validate_essay, EssayInput, GradingResult, ModelReply,
    ResultContext, ValidationError,
};
use rubric::{NormalizedRubric, RubricError};

use crate::provider::{GenerationConfig, LLMProvider};
use crate::state::AppState;
use crate::types::{ProcessingStatus, SingleResponse};

/// Progress of an essay through the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Validated,
    RubricResolved,
    Graded,
    ResponsePrepared,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    RubricResolution,
    RemoteModel,
    InvalidReply,
    Timeout,
    Internal,
}

impl ErrorKind {
    /// The stage the essay failed to reach.
    pub fn failed_stage(self) -> Stage {
        match self {
            Self::Validation => Stage::Validated,
            Self::RubricResolution => Stage::RubricResolved,
            Self::RemoteModel | Self::Timeout | Self::Internal => Stage::Graded,
            Self::InvalidReply => Stage::ResponsePrepared,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Error)]
#[error("{message}")]
pub struct ItemError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ItemError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<ValidationError> for ItemError {
    fn from(e: ValidationError) -> Self {
        Self::new(ErrorKind::Validation, e.to_string())
    }
}

impl From<RubricError> for ItemError {
    fn from(e: RubricError) -> Self {
        Self::new(ErrorKind::RubricResolution, e.to_string())
    }
}

/// Grades validated essays against resolved rubrics. Cheap to clone.
#[derive(Clone)]
pub struct Grader {
    provider: Arc<dyn LLMProvider>,
    generation: GenerationConfig,
    model: String,
}

impl Grader {
    pub fn new(provider: Arc<dyn LLMProvider>, generation: GenerationConfig) -> Self {
        let model = provider.info().model;
        Self {
            provider,
            generation,
            model,
        }
    }

    pub async fn grade(
        &self,
        input: &EssayInput,
        rubric: &NormalizedRubric,
        essay_index: Option<usize>,
    ) -> Result<GradingResult, ItemError> {
        // 1) prompt
        let prompt = build_grading_prompt(input, rubric);
        let fingerprint = prompt_fingerprint(&prompt);
        info!(
            student_id = %input.student_id,
            essay_index = ?essay_index,
            prompt_chars = prompt.len(),
            "calling model to grade essay"
        );

        // 2) model, no retry
        let text = self
            .provider
            .generate(&prompt, &self.generation)
            .await
            .map_err(|e| ItemError::new(ErrorKind::RemoteModel, format!("{e:#}")))?;

        // 3) reply
        let reply = ModelReply::parse(&text).map_err(|e| ItemError::new(ErrorKind::InvalidReply, e.to_string()))?;

        Ok(prepare_result(
            input,
            rubric,
            &reply,
            ResultContext {
                grader_model: &self.model,
                graded_at: Utc::now(),
                prompt_fingerprint: fingerprint,
                essay_index,
            },
        ))
    }
}

pub async fn grade_single(state: &AppState, payload: &Value) -> SingleResponse {
    info!("processing single essay");

    let outcome = async {
        let input = validate_essay(payload, state.cfg.id_field)?;
        let rubric = state
            .rubric_cache
            .resolve(state.rubrics.as_ref(), &input.rubric_key())
            .await?;
        let result = state.grader().grade(&input, &rubric, None).await?;
        Ok::<_, ItemError>((input, result))
    }
    .await;

    match outcome {
        Ok((input, result)) => SingleResponse {
            processing_mode: "single",
            processing_status: ProcessingStatus::Completed,
            student_id: Some(input.student_id),
            essay_type: Some(input.essay_type),
            content_id_requested: input.content_id,
            result: Some(result),
            error: None,
            error_kind: None,
        },
        Err(e) => {
            error!(kind = ?e.kind, stage = ?e.kind.failed_stage(), error = %e, "single essay failed");
            SingleResponse {
                processing_mode: "single",
                processing_status: ProcessingStatus::Failed,
                student_id: None,
                essay_type: None,
                content_id_requested: None,
                result: None,
                error: Some(e.message),
                error_kind: Some(e.kind),
            }
        }
    }
}
