//! Attribute envelopes leaked by the rubric store.
//!
//! Records read through some store paths carry the store's native encoding,
//! e.g. `{"S": "0-3"}` or `{"M": {"score_label": {"S": "Excellent"}}}`, while
//! others carry plain JSON. Everything is resolved to plain JSON here, once,
//! so the rest of the crate never sees an envelope.

use serde_json::{Map, Number, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WireTag {
    S,
    N,
    M,
    L,
    Bool,
    Null,
}

impl WireTag {
    fn from_key(key: &str) -> Option<Self> {
        match key {
            "S" => Some(Self::S),
            "N" => Some(Self::N),
            "M" => Some(Self::M),
            "L" => Some(Self::L),
            "BOOL" => Some(Self::Bool),
            "NULL" => Some(Self::Null),
            _ => None,
        }
    }

    /// An envelope is only recognised when the payload has the shape its tag
    /// promises; `{"S": 3}` stays a plain map.
    fn accepts(self, payload: &Value) -> bool {
        match self {
            Self::S | Self::N => payload.is_string(),
            Self::M => payload.is_object(),
            Self::L => payload.is_array(),
            Self::Bool | Self::Null => payload.is_boolean(),
        }
    }
}

/// One field as read from the store: a plain value or a tagged envelope.
#[derive(Clone, Copy, Debug)]
pub enum WireValue<'a> {
    Scalar(&'a Value),
    Envelope { tag: WireTag, payload: &'a Value },
}

impl<'a> WireValue<'a> {
    pub fn classify(value: &'a Value) -> Self {
        if let Value::Object(map) = value {
            if map.len() == 1 {
                if let Some((key, payload)) = map.iter().next() {
                    if let Some(tag) = WireTag::from_key(key) {
                        if tag.accepts(payload) {
                            return Self::Envelope { tag, payload };
                        }
                    }
                }
            }
        }
        Self::Scalar(value)
    }

    pub fn is_envelope(&self) -> bool {
        matches!(self, Self::Envelope { .. })
    }

    /// Plain JSON for this value, with nested envelopes resolved too.
    pub fn canonical(self) -> Value {
        match self {
            Self::Scalar(Value::Object(map)) => Value::Object(canonical_map(map)),
            Self::Scalar(Value::Array(items)) => {
                Value::Array(items.iter().map(canonicalize).collect())
            }
            Self::Scalar(v) => v.clone(),
            Self::Envelope { tag, payload } => match tag {
                WireTag::S | WireTag::Bool => payload.clone(),
                WireTag::N => parse_number(payload),
                WireTag::M => match payload {
                    Value::Object(map) => Value::Object(canonical_map(map)),
                    other => other.clone(),
                },
                WireTag::L => match payload {
                    Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
                    other => other.clone(),
                },
                WireTag::Null => Value::Null,
            },
        }
    }
}

pub fn canonicalize(value: &Value) -> Value {
    WireValue::classify(value).canonical()
}

fn canonical_map(map: &Map<String, Value>) -> Map<String, Value> {
    map.iter().map(|(k, v)| (k.clone(), canonicalize(v))).collect()
}

fn parse_number(payload: &Value) -> Value {
    let Some(s) = payload.as_str() else {
        return payload.clone();
    };
    let s = s.trim();
    if let Ok(i) = s.parse::<i64>() {
        return Value::Number(i.into());
    }
    s.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(s.to_string()))
}

/// Text form of a canonical value: strings as-is, numbers and booleans
/// printed, lists of strings joined. `None` for null and maps.
pub fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(text_of)
                .collect::<Vec<_>>()
                .join("; "),
        ),
        Value::Null | Value::Object(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_envelope_is_unwrapped() {
        let v = json!({"S": "0-3"});
        assert!(WireValue::classify(&v).is_envelope());
        assert_eq!(canonicalize(&v), json!("0-3"));
    }

    #[test]
    fn nested_map_envelopes_are_resolved() {
        let v = json!({"M": {
            "score_label": {"S": "Excellent"},
            "points": {"N": "3"},
            "examples": {"L": [{"S": "a"}, {"S": "b"}]},
        }});
        assert_eq!(
            canonicalize(&v),
            json!({"score_label": "Excellent", "points": 3, "examples": ["a", "b"]})
        );
    }

    #[test]
    fn plain_values_pass_through() {
        let v = json!({"score_label": "Good", "clarity": "Clear prose"});
        assert!(!WireValue::classify(&v).is_envelope());
        assert_eq!(canonicalize(&v), v);
    }

    #[test]
    fn mismatched_payload_is_not_an_envelope() {
        let v = json!({"S": 3});
        assert!(!WireValue::classify(&v).is_envelope());
        assert_eq!(canonicalize(&v), v);
    }

    #[test]
    fn text_of_joins_lists() {
        assert_eq!(text_of(&json!(["x", "y"])).as_deref(), Some("x; y"));
        assert_eq!(text_of(&json!(4)).as_deref(), Some("4"));
        assert_eq!(text_of(&Value::Null), None);
    }
}
