//! Model reply → graded result.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::{info, warn};

use rubric::{NormalizedRubric, ScoreRange};

use crate::prompt::expected_overall_score;
use crate::request::EssayInput;
use crate::result::{json_number, FlagReason, GradingResult, MetricScore, MetricSlots, ScoreValidation, METRIC_SLOTS};
use crate::{GradingError, Result};

/// Separator models use when they put several flagged sentences in one string.
pub const FLAG_SEPARATOR: &str = " | ";

/// The model's JSON answer. Fields are read leniently: numbers may come back
/// as strings and absent fields take their defaults.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelReply {
    fields: Map<String, Value>,
}

impl ModelReply {
    /// Malformed JSON is an error for the essay; it is not re-requested.
    pub fn parse(text: &str) -> Result<Self> {
        match serde_json::from_str::<Value>(text.trim()) {
            Ok(Value::Object(fields)) => Ok(Self { fields }),
            Ok(_) => Err(GradingError::NotAnObject),
            Err(e) => {
                let head: String = text.chars().take(500).collect();
                warn!(error = %e, reply = %head, "model reply is not valid JSON");
                Err(GradingError::InvalidJson(e.to_string()))
            }
        }
    }

    pub fn overall_score(&self) -> Option<f64> {
        self.fields.get("overall_essay_score").and_then(number_of)
    }

    pub fn metric_score(&self, metric: &str) -> f64 {
        self.fields
            .get("rubric_metric_scores")
            .and_then(|m| m.get(metric))
            .and_then(number_of)
            .unwrap_or(0.0)
    }

    pub fn confidence(&self) -> f64 {
        self.fields.get("ai_confidence").and_then(number_of).unwrap_or(0.0)
    }

    pub fn flagged(&self) -> bool {
        match self.fields.get("essay_flagged") {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => matches!(s.trim().to_ascii_lowercase().as_str(), "yes" | "true"),
            _ => false,
        }
    }

    pub fn flag_reason_text(&self) -> String {
        self.text("flag_reason")
    }

    pub fn flagged_content(&self) -> Vec<String> {
        self.fields
            .get("flagged_content")
            .map(normalize_flagged_content)
            .unwrap_or_default()
    }

    pub fn metric_justifications(&self) -> Map<String, Value> {
        match self.fields.get("metric_justifications") {
            Some(Value::Object(m)) => m.clone(),
            _ => Map::new(),
        }
    }

    pub fn text(&self, key: &str) -> String {
        match self.fields.get(key) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }
    }
}

fn number_of(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse().ok(),
        _ => None,
    }
}

/// Flagged sentences as a list, whatever shape the model used.
pub fn normalize_flagged_content(raw: &Value) -> Vec<String> {
    match raw {
        Value::Array(items) => items
            .iter()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
        Value::String(s) if s.trim().is_empty() => Vec::new(),
        Value::String(s) if s.contains(FLAG_SEPARATOR) => s
            .split(FLAG_SEPARATOR)
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect(),
        Value::String(s) => vec![s.trim().to_string()],
        _ => Vec::new(),
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClampedScore {
    pub score: i64,
    pub original: f64,
    pub was_clamped: bool,
    pub is_within_range: bool,
}

/// Clamps a reported score into the range and rounds it to a whole score.
/// A missing score counts as the range minimum.
pub fn clamp_score(raw: Option<f64>, range: ScoreRange) -> ClampedScore {
    let original = raw.unwrap_or(range.min as f64);
    let is_within_range = range.contains(original);
    let clamped = range.clamp(original);
    ClampedScore {
        score: clamped.round_ties_even() as i64,
        original,
        was_clamped: !is_within_range,
        is_within_range,
    }
}

/// Values that come from outside the essay and the model reply.
#[derive(Clone, Debug)]
pub struct ResultContext<'a> {
    pub grader_model: &'a str,
    pub graded_at: DateTime<Utc>,
    pub prompt_fingerprint: String,
    pub essay_index: Option<usize>,
}

pub fn essay_id(input: &EssayInput, at: DateTime<Utc>) -> String {
    format!(
        "{}_{}_{}",
        input.essay_type.replace(' ', "_"),
        input.student_id,
        at.format("%Y%m%d_%H%M%S")
    )
}

pub fn prepare_result(
    input: &EssayInput,
    rubric: &NormalizedRubric,
    reply: &ModelReply,
    ctx: ResultContext<'_>,
) -> GradingResult {
    let range = rubric.score_range;
    let student = input.student_id.as_str();

    // 1) flags
    let flagged_content = reply.flagged_content();
    let reason_text = reply.flag_reason_text();
    let flag_reason = FlagReason::parse(&reason_text).unwrap_or_else(|| {
        warn!(student_id = %student, flag_reason = %reason_text, "unknown flag reason ignored");
        FlagReason::None
    });

    match flag_reason {
        FlagReason::SelfHarm => {
            warn!(
                student_id = %student,
                flagged_sentences = flagged_content.len(),
                "SELF-HARM CONTENT DETECTED"
            );
            for (i, sentence) in flagged_content.iter().enumerate() {
                warn!(student_id = %student, n = i + 1, sentence = %sentence, "flagged sentence");
            }
        }
        FlagReason::None => {}
        other => info!(student_id = %student, flag_reason = ?other, "essay flagged"),
    }

    // 2) overall score
    let clamped = clamp_score(reply.overall_score(), range);
    if clamped.was_clamped {
        warn!(
            student_id = %student,
            score = clamped.original,
            min = range.min,
            max = range.max,
            clamped_to = clamped.score,
            "essay score outside valid range, clamped"
        );
    }

    // 3) metric slots
    if rubric.metric_names.len() > METRIC_SLOTS {
        warn!(
            metrics = rubric.metric_names.len(),
            "rubric has more metrics than output slots, extra metrics dropped"
        );
    }
    let metrics: Vec<MetricScore> = rubric
        .metric_names
        .iter()
        .take(METRIC_SLOTS)
        .map(|name| MetricScore {
            name: name.clone(),
            score: reply.metric_score(name),
        })
        .collect();
    let all_scores: Vec<f64> = rubric.metric_names.iter().map(|m| reply.metric_score(m)).collect();

    // 4) self-harm overrides everything else
    let self_harm = flag_reason.is_self_harm();

    let result = GradingResult {
        student_id: input.student_id.clone(),
        content_id: input.content_id.clone(),
        item_id: input.item_id.clone(),
        essay_id: essay_id(input, ctx.graded_at),
        essay_type: input.essay_type.clone(),
        essay_question: rubric.essay_question.clone().unwrap_or_default(),
        essay_score: clamped.score,
        min_score: range.min,
        max_score: range.max,
        score_description: reply.text("score_justification"),
        ai_confidence: reply.confidence().clamp(0.0, 100.0).round() as i64,
        confidence_explanation: reply.text("confidence_explanation"),
        manual_override: "No".to_string(),
        manual_essay_score: None,
        essay_flagged: reply.flagged() || self_harm,
        flagged_content: flagged_content.clone(),
        flag_reason,
        strengths: reply.text("strengths"),
        areas_for_improvement: reply.text("areas_for_improvement"),
        metric_justifications: reply.metric_justifications(),
        metrics: MetricSlots(metrics),
        grading_timestamp: ctx.graded_at.to_rfc3339_opts(chrono::SecondsFormat::Micros, true),
        rubric_used: rubric.rubric_id.clone().unwrap_or_default(),
        rubric_version: rubric.rubric_version.clone().unwrap_or_default(),
        grader_model: ctx.grader_model.to_string(),
        prompt_fingerprint: ctx.prompt_fingerprint,
        requires_immediate_attention: self_harm,
        escalation_needed: self_harm,
        flagged_sentences_count: if self_harm { flagged_content.len() } else { 0 },
        score_validation: ScoreValidation {
            original_score: json_number(clamped.original),
            was_clamped: clamped.was_clamped,
            is_within_range: clamped.is_within_range,
            range,
            score_range_string: rubric.score_range_raw.clone(),
            recomputed_score: expected_overall_score(&all_scores, range),
        },
        essay_index: ctx.essay_index,
    };

    info!(
        student_id = %student,
        score = result.essay_score,
        min = range.min,
        max = range.max,
        "grading result prepared"
    );
    if self_harm {
        warn!(student_id = %student, "self-harm content flagged, escalation required");
    }

    result
}
