use serde::ser::{Serialize, SerializeMap, Serializer};
use serde::Deserialize;
use serde_json::{Map, Number, Value};

use rubric::ScoreRange;

/// Output carries this many metric slots regardless of the rubric.
pub const METRIC_SLOTS: usize = 10;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagReason {
    #[default]
    None,
    SelfHarm,
    InappropriateContent,
    PlagiarismSuspected,
    OffTopic,
    Incoherent,
}

impl FlagReason {
    /// Empty text means not flagged. Unknown reasons yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Some(Self::None),
            "self_harm" => Some(Self::SelfHarm),
            "inappropriate_content" => Some(Self::InappropriateContent),
            "plagiarism_suspected" => Some(Self::PlagiarismSuspected),
            "off_topic" => Some(Self::OffTopic),
            "incoherent" => Some(Self::Incoherent),
            _ => None,
        }
    }

    pub fn is_self_harm(self) -> bool {
        self == Self::SelfHarm
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MetricScore {
    pub name: String,
    pub score: f64,
}

/// Metric scores in discovery order, serialized as the flat
/// `rubric_metric{i}_score` / `rubric_metric{i}_name` slots.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MetricSlots(pub Vec<MetricScore>);

impl Serialize for MetricSlots {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(METRIC_SLOTS * 2))?;
        for i in 0..METRIC_SLOTS {
            let slot = i + 1;
            match self.0.get(i) {
                Some(m) => {
                    map.serialize_entry(&format!("rubric_metric{slot}_score"), &json_number(m.score))?;
                    map.serialize_entry(&format!("rubric_metric{slot}_name"), &m.name)?;
                }
                None => {
                    map.serialize_entry(&format!("rubric_metric{slot}_score"), &0)?;
                    map.serialize_entry(&format!("rubric_metric{slot}_name"), "")?;
                }
            }
        }
        map.end()
    }
}

/// Whole numbers serialize as integers, the rest as floats.
pub fn json_number(x: f64) -> Number {
    if x.is_finite() && x.fract() == 0.0 && x.abs() < i64::MAX as f64 {
        Number::from(x as i64)
    } else {
        Number::from_f64(x).unwrap_or_else(|| Number::from(0))
    }
}

/// What the model said about the overall score before clamping.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct ScoreValidation {
    pub original_score: Number,
    pub was_clamped: bool,
    pub is_within_range: bool,
    pub range: ScoreRange,
    pub score_range_string: String,
    /// Rounded mean of the valid metric scores, for comparison with the
    /// model's own overall score.
    pub recomputed_score: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct GradingResult {
    pub student_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
    pub essay_id: String,
    pub essay_type: String,
    pub essay_question: String,
    pub essay_score: i64,
    pub min_score: i64,
    pub max_score: i64,
    pub score_description: String,

    pub ai_confidence: i64,
    pub confidence_explanation: String,

    pub manual_override: String,
    pub manual_essay_score: Option<i64>,

    pub essay_flagged: bool,
    pub flagged_content: Vec<String>,
    pub flag_reason: FlagReason,

    pub strengths: String,
    pub areas_for_improvement: String,
    pub metric_justifications: Map<String, Value>,

    #[serde(flatten)]
    pub metrics: MetricSlots,

    pub grading_timestamp: String,
    pub rubric_used: String,
    pub rubric_version: String,
    pub grader_model: String,
    pub prompt_fingerprint: String,

    pub requires_immediate_attention: bool,
    pub escalation_needed: bool,
    pub flagged_sentences_count: usize,

    pub score_validation: ScoreValidation,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub essay_index: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn slots_pad_to_ten() {
        let slots = MetricSlots(vec![
            MetricScore { name: "clarity".into(), score: 3.0 },
            MetricScore { name: "evidence".into(), score: 1.5 },
        ]);
        let v = serde_json::to_value(&slots).unwrap();
        let m = v.as_object().unwrap();
        assert_eq!(m.len(), 20);
        assert_eq!(m["rubric_metric1_score"], json!(3));
        assert_eq!(m["rubric_metric1_name"], json!("clarity"));
        assert_eq!(m["rubric_metric2_score"], json!(1.5));
        assert_eq!(m["rubric_metric3_score"], json!(0));
        assert_eq!(m["rubric_metric10_name"], json!(""));

        let keys: Vec<&String> = m.keys().take(4).collect();
        assert_eq!(
            keys,
            ["rubric_metric1_score", "rubric_metric1_name", "rubric_metric2_score", "rubric_metric2_name"]
        );
    }

    #[test]
    fn slots_cap_at_ten() {
        let many = (0..12)
            .map(|i| MetricScore { name: format!("m{i}"), score: 1.0 })
            .collect();
        let v = serde_json::to_value(MetricSlots(many)).unwrap();
        assert_eq!(v.as_object().unwrap().len(), 20);
        assert_eq!(v["rubric_metric10_name"], json!("m9"));
    }

    #[test]
    fn flag_reasons() {
        assert_eq!(FlagReason::parse(""), Some(FlagReason::None));
        assert_eq!(FlagReason::parse("Self_Harm"), Some(FlagReason::SelfHarm));
        assert_eq!(FlagReason::parse("rude"), None);
        assert_eq!(serde_json::to_value(FlagReason::OffTopic).unwrap(), json!("off_topic"));
    }
}
