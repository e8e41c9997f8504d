//! Rubric generation: source documents + model → stored rubric record.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{info, warn};

use blobstore::ObjectLocation;
use rubric::{normalize, parse_score_range_str, RubricError, RubricRecord, ScoreRange};

use crate::extract::{document_text, sample_essays, SampleEssay};
use crate::state::AppState;
use crate::types::{ProcessingStatus, RubricCreatedResponse};

pub const RUBRIC_VERSION: &str = "1.0";
pub const MAX_SAMPLE_ESSAYS: usize = 10;
/// Most score levels a generated rubric may have, e.g. `0-10`.
pub const MAX_RUBRIC_LEVELS: i64 = 11;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("invalid rubric request: {0}")]
    InvalidRequest(String),
    #[error("could not read source document: {0}")]
    Source(String),
    #[error("model call failed: {0}")]
    Model(String),
    #[error("model did not return a usable rubric: {0}")]
    InvalidRubric(String),
    #[error("failed to store rubric: {0}")]
    Store(#[from] RubricError),
}

impl GenerationError {
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidRequest(_) => 400,
            Self::Source(_) => 422,
            Self::Model(_) | Self::InvalidRubric(_) => 502,
            Self::Store(_) => 500,
        }
    }
}

fn text_or_number<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    match Value::deserialize(d)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("expected text or number, got {other}"))),
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RubricRequest {
    #[serde(alias = "essayType")]
    pub essay_type: String,
    #[serde(alias = "gradeLevel", deserialize_with = "text_or_number")]
    pub grade_level: String,
    #[serde(alias = "sourceTextTitle")]
    pub source_text_title: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(alias = "essayPrompt")]
    pub essay_prompt: String,
    #[serde(default, alias = "scoreRange")]
    pub score_range: Option<String>,
    #[serde(default, alias = "sourceTextContent")]
    pub source_text_content: Option<String>,
    #[serde(default, alias = "originalRubricGuidelinesUrl")]
    pub original_rubric_guidelines_url: Option<String>,
    #[serde(default, alias = "sampleEssaysCsvUrl")]
    pub sample_essays_csv_url: Option<String>,
}

impl RubricRequest {
    fn check(&self) -> Result<(), GenerationError> {
        for (name, value) in [
            ("essay_type", &self.essay_type),
            ("grade_level", &self.grade_level),
            ("source_text_title", &self.source_text_title),
            ("essay_prompt", &self.essay_prompt),
        ] {
            if value.trim().is_empty() {
                return Err(GenerationError::InvalidRequest(format!("{name} cannot be empty")));
            }
        }
        Ok(())
    }
}

/// `<title>_<grade>_<UTC timestamp>`, e.g. `Winter_Hibiscus_Grade10_20250812_180450`.
pub fn rubric_content_id(title: &str, grade_level: &str, at: DateTime<Utc>) -> String {
    let title: String = title
        .split_whitespace()
        .map(|w| w.chars().filter(|c| c.is_alphanumeric()).collect::<String>())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join("_");
    let grade = grade_level.trim();
    let grade = if grade.to_ascii_lowercase().starts_with("grade") {
        grade.split_whitespace().collect::<String>()
    } else {
        format!("Grade{}", grade.split_whitespace().collect::<String>())
    };
    format!("{title}_{grade}_{}", at.format("%Y%m%d_%H%M%S"))
}

pub fn build_rubric_prompt(
    req: &RubricRequest,
    range: ScoreRange,
    guidelines: Option<&str>,
    samples: &[SampleEssay],
) -> String {
    let levels: Vec<i64> = (range.min..=range.max).rev().collect();
    let band_keys: Vec<String> = levels.iter().map(|n| format!("score_{n}")).collect();

    let mut p = String::new();
    let _ = writeln!(
        p,
        "You design scoring rubrics for essays written by students in grade {}. \
Write a rubric for the assignment below and answer with a single JSON object only.",
        req.grade_level.trim()
    );
    p.push_str("\n## Assignment\n");
    let _ = writeln!(p, "**Essay Type:** {}", req.essay_type);
    let _ = writeln!(p, "**Source Text:** {}", req.source_text_title);
    if let Some(author) = req.author.as_deref().filter(|a| !a.trim().is_empty()) {
        let _ = writeln!(p, "**Author:** {author}");
    }
    let _ = writeln!(p, "**Essay Prompt:** {}", req.essay_prompt);
    let _ = writeln!(p, "**Score Range:** {}-{}", range.min, range.max);

    if let Some(source) = req.source_text_content.as_deref().filter(|s| !s.trim().is_empty()) {
        p.push_str("\n## Source Text\n");
        p.push_str(source.trim());
        p.push('\n');
    }
    if let Some(g) = guidelines.filter(|g| !g.is_empty()) {
        p.push_str("\n## Existing Scoring Guidelines\nKeep the rubric consistent with these:\n");
        p.push_str(g);
        p.push('\n');
    }
    if !samples.is_empty() {
        p.push_str("\n## Sample Student Essays\n");
        for (i, s) in samples.iter().enumerate() {
            match &s.score {
                Some(score) => {
                    let _ = writeln!(p, "### Sample {} (scored {score})", i + 1);
                }
                None => {
                    let _ = writeln!(p, "### Sample {}", i + 1);
                }
            }
            p.push_str(&s.text);
            p.push_str("\n\n");
        }
    }

    let _ = write!(
        p,
        "
## Instructions
1. Pick 3 to 6 metrics that matter for this prompt, named in snake_case (for example content_understanding, use_of_evidence).
2. Describe every metric in every band: {bands}.
3. Give each band a short score_label, plus look_for and avoid_confusing_with notes.
4. Write borderline guidance for each pair of adjacent scores, keyed between_<low>_<high>.
5. List the common pitfalls graders should watch for.

## Required JSON Format
{{
  \"essay_question\": \"[the question students answer]\",
  \"rubrics\": {{
    \"{top}\": {{
      \"score_label\": \"[short label]\",
      \"<metric_name>\": \"[what this metric looks like at this score]\",
      \"look_for\": \"[evidence of this score]\",
      \"avoid_confusing_with\": \"[how it differs from neighbouring scores]\"
    }}
  }},
  \"scoring_guidance\": {{
    \"borderline_cases\": {{\"between_<low>_<high>\": \"[how to decide]\"}},
    \"common_pitfalls\": \"[frequent grading mistakes]\"
  }}
}}
Every band from {top} down to score_{min} must be present with the same metric names.",
        bands = band_keys.join(", "),
        top = band_keys.first().map(String::as_str).unwrap_or("score_3"),
        min = range.min,
    );
    p
}

/// Pulls the JSON object out of a reply, tolerating a fenced code block or
/// prose around it.
pub fn parse_generated_rubric(text: &str) -> Result<Map<String, Value>, GenerationError> {
    let body = fenced_block(text).unwrap_or(text);
    let (start, end) = match (body.find('{'), body.rfind('}')) {
        (Some(s), Some(e)) if s < e => (s, e),
        _ => return Err(GenerationError::InvalidRubric("no JSON object in reply".to_string())),
    };
    match serde_json::from_str::<Value>(&body[start..=end]) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(GenerationError::InvalidRubric("reply is not a JSON object".to_string())),
        Err(e) => Err(GenerationError::InvalidRubric(e.to_string())),
    }
}

fn fenced_block(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let rest = &text[open + 3..];
    // skip the info string, e.g. ```json
    let rest = &rest[rest.find('\n').map(|i| i + 1).unwrap_or(0)..];
    let close = rest.find("```")?;
    Some(&rest[..close])
}

/// Generated content plus identity and provenance fields.
pub fn assemble_record(
    req: &RubricRequest,
    range_raw: &str,
    generated: Map<String, Value>,
    essay_id: &str,
    model: &str,
    at: DateTime<Utc>,
) -> RubricRecord {
    let mut attrs = Map::new();
    attrs.insert("essay_type".into(), req.essay_type.trim().into());
    attrs.insert("essay_id".into(), essay_id.into());
    attrs.insert("rubric_version".into(), RUBRIC_VERSION.into());
    attrs.insert("created_at".into(), at.to_rfc3339().into());

    let question = generated
        .get("essay_question")
        .and_then(Value::as_str)
        .filter(|q| !q.trim().is_empty())
        .unwrap_or(&req.essay_prompt)
        .to_string();
    attrs.insert("essay_question".into(), question.into());
    attrs.insert("score_range".into(), range_raw.into());
    attrs.insert("grade_level".into(), req.grade_level.trim().into());
    attrs.insert("source_text_title".into(), req.source_text_title.trim().into());
    if let Some(author) = &req.author {
        attrs.insert("author".into(), author.clone().into());
    }
    if let Some(url) = &req.original_rubric_guidelines_url {
        attrs.insert("original_rubric_guidelines_url".into(), url.clone().into());
    }
    if let Some(url) = &req.sample_essays_csv_url {
        attrs.insert("sample_essays_csv_url".into(), url.clone().into());
    }
    for key in ["rubrics", "scoring_guidance"] {
        if let Some(v) = generated.get(key) {
            attrs.insert(key.into(), v.clone());
        }
    }
    attrs.insert("generated_by".into(), model.into());
    RubricRecord::new(attrs)
}

async fn fetch_object(state: &AppState, url: &str) -> Result<(String, bytes::Bytes), GenerationError> {
    let loc = ObjectLocation::parse(url).map_err(|e| GenerationError::InvalidRequest(e.to_string()))?;
    let bytes = state
        .objects
        .get_at(&loc)
        .await
        .map_err(|e| GenerationError::Source(e.to_string()))?;
    Ok((loc.key, bytes))
}

pub async fn generate_rubric(state: &AppState, payload: Value) -> Result<RubricCreatedResponse, GenerationError> {
    // 1) request
    let req: RubricRequest =
        serde_json::from_value(payload).map_err(|e| GenerationError::InvalidRequest(e.to_string()))?;
    req.check()?;
    let range_raw = req.score_range.clone().unwrap_or_else(|| "0-3".to_string());
    let parsed = parse_score_range_str(&range_raw);
    if let Some(anomaly) = parsed.anomaly {
        return Err(GenerationError::InvalidRequest(anomaly.to_string()));
    }
    let levels = parsed.range.max - parsed.range.min + 1;
    if levels > MAX_RUBRIC_LEVELS {
        return Err(GenerationError::InvalidRequest(format!(
            "score_range '{range_raw}' has {levels} levels, at most {MAX_RUBRIC_LEVELS} are supported"
        )));
    }
    info!(essay_type = %req.essay_type, title = %req.source_text_title, "generating rubric");

    // 2) sources
    let guidelines = match req.original_rubric_guidelines_url.as_deref() {
        Some(url) => {
            let (key, bytes) = fetch_object(state, url).await?;
            Some(document_text(&key, &bytes).map_err(|e| GenerationError::Source(format!("{e:#}")))?)
        }
        None => None,
    };
    let samples = match req.sample_essays_csv_url.as_deref() {
        Some(url) => {
            let (_, bytes) = fetch_object(state, url).await?;
            sample_essays(&bytes, MAX_SAMPLE_ESSAYS).map_err(|e| GenerationError::Source(format!("{e:#}")))?
        }
        None => Vec::new(),
    };

    // 3) model
    let prompt = build_rubric_prompt(&req, parsed.range, guidelines.as_deref(), &samples);
    let text = state
        .provider
        .generate(&prompt, &state.cfg.generation)
        .await
        .map_err(|e| GenerationError::Model(format!("{e:#}")))?;
    let generated = parse_generated_rubric(&text)?;

    // 4) validate
    let now = Utc::now();
    let essay_id = rubric_content_id(&req.source_text_title, &req.grade_level, now);
    let model = state.provider.info().model;
    let record = assemble_record(&req, &range_raw, generated, &essay_id, &model, now);
    let rubric = normalize(&record);
    if rubric.bands.is_empty() || rubric.metric_names.is_empty() {
        return Err(GenerationError::InvalidRubric("rubric needs at least one band and one metric".to_string()));
    }
    let expected = (parsed.range.min..=parsed.range.max).count();
    if rubric.bands.len() != expected {
        warn!(
            bands = rubric.bands.len(),
            expected,
            "generated rubric band count does not match the score range"
        );
    }

    // 5) store
    state.rubrics.put_rubric(record).await?;
    info!(essay_type = %req.essay_type, essay_id = %essay_id, metrics = ?rubric.metric_names, "rubric stored");

    Ok(RubricCreatedResponse {
        processing_status: ProcessingStatus::Completed,
        essay_type: req.essay_type.trim().to_string(),
        essay_id,
        rubric_version: RUBRIC_VERSION.to_string(),
        score_range: range_raw,
        bands: rubric.bands.len(),
        metric_names: rubric.metric_names.clone(),
        sample_essays_used: samples.len(),
    })
}
