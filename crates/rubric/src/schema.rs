use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::wire::{canonicalize, text_of};

/// A rubric exactly as the store holds it. Field values may be plain JSON or
/// attribute envelopes; use [`RubricRecord::field`] to read them.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RubricRecord {
    pub attributes: Map<String, Value>,
}

impl RubricRecord {
    pub fn new(attributes: Map<String, Value>) -> Self {
        Self { attributes }
    }

    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(attributes) => Some(Self { attributes }),
            _ => None,
        }
    }

    /// Canonical (envelope-free) value of a top-level field.
    pub fn field(&self, name: &str) -> Option<Value> {
        self.attributes.get(name).map(canonicalize)
    }

    pub fn text(&self, name: &str) -> Option<String> {
        self.field(name).as_ref().and_then(text_of)
    }

    pub fn essay_type(&self) -> Option<String> {
        self.text("essay_type")
    }

    /// The record's content id (the store's sort key).
    pub fn essay_id(&self) -> Option<String> {
        self.text("essay_id")
    }
}

/// Identity of a rubric lookup: essay type plus an optional content id.
/// `None` means "most recent rubric for the essay type".
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RubricKey {
    pub essay_type: String,
    pub content_id: Option<String>,
}

impl RubricKey {
    pub fn new(essay_type: impl Into<String>, content_id: Option<&str>) -> Self {
        Self {
            essay_type: essay_type.into(),
            content_id: content_id.map(str::to_string),
        }
    }

    pub fn latest(essay_type: impl Into<String>) -> Self {
        Self::new(essay_type, None)
    }
}

/// `<essay_type>|<content_id or latest>`
impl fmt::Display for RubricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}",
            self.essay_type,
            self.content_id.as_deref().unwrap_or("latest")
        )
    }
}
