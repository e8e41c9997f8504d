//! Record → canonical rubric.

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::schema::RubricRecord;
use crate::score_range::{parse_score_range, RangeAnomaly, ScoreRange, DEFAULT_SCORE_RANGE};
use crate::wire::text_of;

/// Band keys that describe the band rather than a metric.
pub const NON_METRIC_KEYS: [&str; 4] = [
    "score_label",
    "avoid_confusing_with",
    "look_for",
    "specific_examples",
];

/// Bands consulted, in order, when discovering metric names.
pub const METRIC_SOURCE_PREFERENCE: [&str; 4] = ["score_3", "score_2", "score_1", "score_0"];

/// Borderline guidance keys that are always rendered, even when empty.
pub const STANDARD_BORDERLINE_KEYS: [&str; 3] = ["between_2_3", "between_1_2", "between_0_1"];

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ScoreBand {
    /// Key in the record, e.g. `score_3`.
    pub key: String,
    /// Numeric level parsed from `score_<n>` keys.
    pub level: Option<i64>,
    pub label: Option<String>,
    /// Every field of the band in record order, as text.
    pub fields: Vec<(String, String)>,
}

impl ScoreBand {
    pub fn criterion(&self, metric: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == metric)
            .map(|(_, v)| v.as_str())
    }

    fn metric_names(&self) -> Vec<String> {
        self.fields
            .iter()
            .map(|(k, _)| k)
            .filter(|k| !NON_METRIC_KEYS.contains(&k.as_str()))
            .cloned()
            .collect()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ScoringGuidance {
    /// `between_<a>_<b>` → narrative, record order.
    pub borderline_cases: Vec<(String, String)>,
    pub common_pitfalls: String,
}

impl ScoringGuidance {
    pub fn borderline(&self, key: &str) -> &str {
        self.borderline_cases
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .unwrap_or("")
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NormalizedRubric {
    pub essay_type: String,
    /// The record's `essay_id`.
    pub rubric_id: Option<String>,
    pub rubric_version: Option<String>,
    pub essay_question: Option<String>,
    pub score_range: ScoreRange,
    pub score_range_raw: String,
    #[serde(skip)]
    pub range_anomaly: Option<RangeAnomaly>,
    /// Bands in record order.
    pub bands: Vec<ScoreBand>,
    /// Metric names discovered from one band and applied to all of them.
    pub metric_names: Vec<String>,
    pub guidance: ScoringGuidance,
}

impl NormalizedRubric {
    /// Bands with a numeric level, highest first, then the rest in record order.
    pub fn bands_by_level(&self) -> Vec<&ScoreBand> {
        let mut leveled: Vec<&ScoreBand> = self.bands.iter().filter(|b| b.level.is_some()).collect();
        leveled.sort_by(|a, b| b.level.cmp(&a.level));
        leveled.extend(self.bands.iter().filter(|b| b.level.is_none()));
        leveled
    }

    /// `(band key, metric)` pairs for metrics a band does not describe.
    pub fn missing_criteria(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        for band in &self.bands {
            for metric in &self.metric_names {
                if band.criterion(metric).is_none() {
                    out.push((band.key.clone(), metric.clone()));
                }
            }
        }
        out
    }
}

pub fn normalize(record: &RubricRecord) -> NormalizedRubric {
    let (score_range, score_range_raw, range_anomaly) = match record.attributes.get("score_range") {
        Some(raw) => {
            let parsed = parse_score_range(raw);
            (parsed.range, parsed.raw, parsed.anomaly)
        }
        None => (DEFAULT_SCORE_RANGE, "0-3".to_string(), None),
    };

    let bands = match record.field("rubrics") {
        Some(Value::Object(map)) => map
            .iter()
            .filter_map(|(key, value)| band_from(key, value))
            .collect(),
        Some(other) => {
            warn!(kind = %json_kind(&other), "rubrics field is not a map, rubric has no bands");
            Vec::new()
        }
        None => {
            warn!("record has no rubrics section");
            Vec::new()
        }
    };

    let metric_names = discover_metrics(&bands);
    let guidance = guidance_from(record.field("scoring_guidance"));

    let rubric = NormalizedRubric {
        essay_type: record.essay_type().unwrap_or_default(),
        rubric_id: record.essay_id(),
        rubric_version: record.text("rubric_version"),
        essay_question: record.text("essay_question"),
        score_range,
        score_range_raw,
        range_anomaly,
        bands,
        metric_names,
        guidance,
    };

    for (band, metric) in rubric.missing_criteria() {
        warn!(band = %band, metric = %metric, "metric not described in band");
    }
    debug!(
        essay_type = %rubric.essay_type,
        bands = rubric.bands.len(),
        metrics = ?rubric.metric_names,
        "rubric normalized"
    );

    rubric
}

fn band_from(key: &str, value: &Value) -> Option<ScoreBand> {
    let Value::Object(map) = value else {
        warn!(band = %key, "band is not a map, skipped");
        return None;
    };
    let fields = map
        .iter()
        .map(|(k, v)| (k.clone(), text_of(v).unwrap_or_else(|| v.to_string())))
        .collect();
    Some(ScoreBand {
        key: key.to_string(),
        level: key.strip_prefix("score_").and_then(|n| n.parse().ok()),
        label: map.get("score_label").and_then(text_of),
        fields,
    })
}

fn discover_metrics(bands: &[ScoreBand]) -> Vec<String> {
    let source = METRIC_SOURCE_PREFERENCE
        .iter()
        .find_map(|pref| bands.iter().find(|b| b.key == *pref))
        .or_else(|| bands.first());

    match source {
        Some(band) => band.metric_names(),
        None => Vec::new(),
    }
}

fn guidance_from(value: Option<Value>) -> ScoringGuidance {
    let Some(Value::Object(map)) = value else {
        return ScoringGuidance::default();
    };

    let borderline_cases = match map.get("borderline_cases") {
        Some(Value::Object(cases)) => cases
            .iter()
            .map(|(k, v)| (k.clone(), text_of(v).unwrap_or_default()))
            .collect(),
        _ => Vec::new(),
    };

    ScoringGuidance {
        borderline_cases,
        common_pitfalls: map.get("common_pitfalls").and_then(text_of).unwrap_or_default(),
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
