use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use rubric::RubricKey;

/// Which identifier an essay submission carries besides the student id.
///
/// `ContentId` is the current contract and selects a specific rubric.
/// `ItemId` is the older contract: the id is echoed back but rubrics are
/// looked up by essay type alone.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdField {
    #[default]
    ContentId,
    ItemId,
}

impl IdField {
    pub fn name(self) -> &'static str {
        match self {
            Self::ContentId => "content_id",
            Self::ItemId => "item_id",
        }
    }

    fn camel_name(self) -> &'static str {
        match self {
            Self::ContentId => "contentId",
            Self::ItemId => "itemId",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "content_id" | "contentid" => Some(Self::ContentId),
            "item_id" | "itemid" => Some(Self::ItemId),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Essay payload must be a JSON object")]
    NotAnObject,
    #[error("Missing required parameter: {0}")]
    Missing(&'static str),
    #[error("{0} must be a string")]
    NotText(&'static str),
    #[error("{0} cannot be empty")]
    Empty(&'static str),
}

/// A validated submission. Built once, never mutated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EssayInput {
    pub student_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
    pub essay_type: String,
    /// Trimmed, never empty.
    pub essay_response: String,
}

impl EssayInput {
    pub fn rubric_key(&self) -> RubricKey {
        RubricKey::new(self.essay_type.clone(), self.content_id.as_deref())
    }
}

fn lookup<'a>(map: &'a Map<String, Value>, snake: &str, camel: &str) -> Option<&'a Value> {
    map.get(snake)
        .or_else(|| map.get(camel))
        .filter(|v| !v.is_null())
}

/// Ids may arrive as strings or numbers; both become strings.
fn id_text(map: &Map<String, Value>, snake: &'static str, camel: &str) -> Result<String, ValidationError> {
    match lookup(map, snake, camel) {
        None => Err(ValidationError::Missing(snake)),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(_) => Err(ValidationError::NotText(snake)),
    }
}

fn text(map: &Map<String, Value>, snake: &'static str, camel: &str) -> Result<String, ValidationError> {
    match lookup(map, snake, camel) {
        None => Err(ValidationError::Missing(snake)),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(ValidationError::NotText(snake)),
    }
}

pub fn validate_essay(payload: &Value, mode: IdField) -> Result<EssayInput, ValidationError> {
    let Value::Object(map) = payload else {
        return Err(ValidationError::NotAnObject);
    };

    let student_id = id_text(map, "student_id", "studentId")?;
    let id = id_text(map, mode.name(), mode.camel_name())?;
    let essay_type = text(map, "essay_type", "essayType")?;
    let essay_response = text(map, "essay_response", "essayResponse")?;

    if essay_type.trim().is_empty() {
        return Err(ValidationError::Empty("essay_type"));
    }
    let essay_response = essay_response.trim();
    if essay_response.is_empty() {
        return Err(ValidationError::Empty("essay_response"));
    }

    let (content_id, item_id) = match mode {
        IdField::ContentId => (Some(id), None),
        IdField::ItemId => (None, Some(id)),
    };

    Ok(EssayInput {
        student_id,
        content_id,
        item_id,
        essay_type,
        essay_response: essay_response.to_string(),
    })
}

/// Student id for error reports on payloads that failed validation.
pub fn student_id_hint(payload: &Value) -> String {
    payload
        .as_object()
        .and_then(|m| lookup(m, "student_id", "studentId"))
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_snake_and_camel_case() {
        let a = validate_essay(
            &json!({"student_id": "s1", "content_id": "c1", "essay_type": "T", "essay_response": "  hello  "}),
            IdField::ContentId,
        )
        .unwrap();
        let b = validate_essay(
            &json!({"studentId": "s1", "contentId": "c1", "essayType": "T", "essayResponse": "hello"}),
            IdField::ContentId,
        )
        .unwrap();
        assert_eq!(a, b);
        assert_eq!(a.essay_response, "hello");
        assert_eq!(a.rubric_key(), RubricKey::new("T", Some("c1")));
    }

    #[test]
    fn numeric_ids_are_stringified() {
        let e = validate_essay(
            &json!({"student_id": 42, "item_id": 7, "essay_type": "T", "essay_response": "x"}),
            IdField::ItemId,
        )
        .unwrap();
        assert_eq!(e.student_id, "42");
        assert_eq!(e.item_id.as_deref(), Some("7"));
        assert_eq!(e.content_id, None);
        assert_eq!(e.rubric_key(), RubricKey::latest("T"));
    }

    #[test]
    fn rejects_missing_and_blank_fields() {
        let missing = validate_essay(&json!({"student_id": "s1", "essay_type": "T", "essay_response": "x"}), IdField::ContentId);
        assert_eq!(missing, Err(ValidationError::Missing("content_id")));

        let blank = validate_essay(
            &json!({"student_id": "s1", "content_id": "c", "essay_type": "T", "essay_response": "   "}),
            IdField::ContentId,
        );
        assert_eq!(blank, Err(ValidationError::Empty("essay_response")));

        let wrong_type = validate_essay(
            &json!({"student_id": "s1", "content_id": "c", "essay_type": "T", "essay_response": 5}),
            IdField::ContentId,
        );
        assert_eq!(wrong_type, Err(ValidationError::NotText("essay_response")));

        assert_eq!(validate_essay(&json!("x"), IdField::ContentId), Err(ValidationError::NotAnObject));
    }

    #[test]
    fn student_hint_defaults_to_unknown() {
        assert_eq!(student_id_hint(&json!({"student_id": "s9"})), "s9");
        assert_eq!(student_id_hint(&json!({})), "unknown");
        assert_eq!(IdField::parse("ITEM_ID"), Some(IdField::ItemId));
    }
}
