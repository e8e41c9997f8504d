use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::wire::canonicalize;

pub const DEFAULT_SCORE_RANGE: ScoreRange = ScoreRange { min: 0, max: 3 };

/// Highest score a rubric may use. Scores are never negative.
pub const MAX_SCORE_VALUE: i64 = 100;

/// Inclusive score bounds of a rubric. `min <= max` always holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreRange {
    pub min: i64,
    pub max: i64,
}

impl Default for ScoreRange {
    fn default() -> Self {
        DEFAULT_SCORE_RANGE
    }
}

impl ScoreRange {
    pub fn contains(&self, score: f64) -> bool {
        (self.min as f64) <= score && score <= (self.max as f64)
    }

    /// `max(min, min(max, score))`
    pub fn clamp(&self, score: f64) -> f64 {
        (self.min as f64).max((self.max as f64).min(score))
    }
}

/// Recoverable problem found while reading a score range. The default range
/// is used instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RangeAnomaly {
    #[error("unexpected score_range value {0}")]
    NotText(String),
    #[error("could not parse score_range '{0}'")]
    Unparseable(String),
    #[error("score_range '{0}' has min above max")]
    Inverted(String),
    #[error("score_range '{0}' is outside 0-100")]
    OutOfBounds(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedScoreRange {
    pub range: ScoreRange,
    /// Text the range was read from, after envelope removal.
    pub raw: String,
    pub anomaly: Option<RangeAnomaly>,
}

impl ParsedScoreRange {
    fn fallback(raw: String, anomaly: RangeAnomaly) -> Self {
        warn!(score_range = %raw, "{anomaly}, using default 0-3");
        Self {
            range: DEFAULT_SCORE_RANGE,
            raw,
            anomaly: Some(anomaly),
        }
    }
}

/// Reads a score range from a record field, envelope-wrapped or not.
pub fn parse_score_range(raw: &Value) -> ParsedScoreRange {
    match canonicalize(raw) {
        Value::String(s) => parse_score_range_str(&s),
        Value::Number(n) => parse_score_range_str(&n.to_string()),
        other => ParsedScoreRange::fallback(other.to_string(), RangeAnomaly::NotText(other.to_string())),
    }
}

/// Accepted forms: `"0-3"`, `"1 to 4"` (any case), `"5"` meaning `0-5`.
pub fn parse_score_range_str(raw: &str) -> ParsedScoreRange {
    let s = raw.trim();

    let parsed = if s.contains('-') {
        pair(s.split('-'))
    } else {
        None
    };
    let parsed = parsed.or_else(|| {
        let lower = s.to_lowercase();
        if lower.contains(" to ") {
            pair(lower.split(" to "))
        } else {
            None
        }
    });
    let parsed = parsed.or_else(|| {
        if !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()) {
            s.parse::<i64>().ok().map(|max| (0, max))
        } else {
            None
        }
    });

    match parsed {
        Some((min, max)) if min < 0 || max > MAX_SCORE_VALUE => {
            ParsedScoreRange::fallback(s.to_string(), RangeAnomaly::OutOfBounds(s.to_string()))
        }
        Some((min, max)) if min <= max => ParsedScoreRange {
            range: ScoreRange { min, max },
            raw: s.to_string(),
            anomaly: None,
        },
        Some(_) => ParsedScoreRange::fallback(s.to_string(), RangeAnomaly::Inverted(s.to_string())),
        None => ParsedScoreRange::fallback(s.to_string(), RangeAnomaly::Unparseable(s.to_string())),
    }
}

fn pair<'a>(mut parts: impl Iterator<Item = &'a str>) -> Option<(i64, i64)> {
    let a = parts.next()?.trim().parse::<i64>().ok()?;
    let b = parts.next()?.trim().parse::<i64>().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((a, b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_forms() {
        assert_eq!(parse_score_range_str("0-3").range, ScoreRange { min: 0, max: 3 });
        assert_eq!(parse_score_range_str("1 to 4").range, ScoreRange { min: 1, max: 4 });
        assert_eq!(parse_score_range_str("1 TO 6").range, ScoreRange { min: 1, max: 6 });
        assert_eq!(parse_score_range_str("5").range, ScoreRange { min: 0, max: 5 });
        assert_eq!(parse_score_range_str(" 2 - 4 ").range, ScoreRange { min: 2, max: 4 });
    }

    #[test]
    fn implausible_ranges_fall_back() {
        let p = parse_score_range_str("0-4000000000000000000");
        assert_eq!(p.range, DEFAULT_SCORE_RANGE);
        assert_eq!(p.anomaly, Some(RangeAnomaly::OutOfBounds("0-4000000000000000000".into())));
        assert!(matches!(parse_score_range_str("-5 to 3").anomaly, Some(RangeAnomaly::OutOfBounds(_))));
        assert!(matches!(parse_score_range_str("101").anomaly, Some(RangeAnomaly::OutOfBounds(_))));
        assert_eq!(parse_score_range_str("0-100").range, ScoreRange { min: 0, max: 100 });
    }

    #[test]
    fn garbage_defaults_with_anomaly() {
        let p = parse_score_range_str("garbage");
        assert_eq!(p.range, DEFAULT_SCORE_RANGE);
        assert_eq!(p.anomaly, Some(RangeAnomaly::Unparseable("garbage".into())));
    }

    #[test]
    fn inverted_range_defaults() {
        let p = parse_score_range_str("4-1");
        assert_eq!(p.range, DEFAULT_SCORE_RANGE);
        assert!(matches!(p.anomaly, Some(RangeAnomaly::Inverted(_))));
    }

    #[test]
    fn envelope_and_non_text_values() {
        let p = parse_score_range(&json!({"S": "1-4"}));
        assert_eq!(p.range, ScoreRange { min: 1, max: 4 });
        assert!(p.anomaly.is_none());

        let p = parse_score_range(&json!({"nested": true}));
        assert_eq!(p.range, DEFAULT_SCORE_RANGE);
        assert!(matches!(p.anomaly, Some(RangeAnomaly::NotText(_))));
    }

    #[test]
    fn clamp_stays_in_range() {
        let r = ScoreRange { min: 1, max: 4 };
        for s in [-10.0, 0.0, 1.0, 2.5, 4.0, 4.5, 99.0] {
            let c = r.clamp(s);
            assert!(r.contains(c), "{s} clamped to {c}");
        }
        assert_eq!(r.clamp(3.0), 3.0);
    }
}
