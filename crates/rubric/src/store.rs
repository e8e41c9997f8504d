use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use thiserror::Error;

use crate::RubricRecord;

#[derive(Debug, Error)]
pub enum RubricError {
    #[error("No rubric found for essay type '{essay_type}' (content_id: {})", .content_id.as_deref().unwrap_or("latest"))]
    NotFound {
        essay_type: String,
        content_id: Option<String>,
    },
    #[error("Store error: {0}")]
    Store(String),
    #[error("Serialization error: {0}")]
    Ser(String),
    #[error("Invalid record: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, RubricError>;

/// Where rubrics live. Implementations only look records up; fallback and
/// caching decisions are made by [`crate::RubricCache`].
#[async_trait]
pub trait RubricStore: Send + Sync {
    /// Exact `(essay_type, content_id)` match when a content id is given,
    /// otherwise the most recent rubric (greatest `essay_id`) for the type.
    async fn get_rubric(&self, essay_type: &str, content_id: Option<&str>) -> Result<Option<RubricRecord>>;

    async fn put_rubric(&self, record: RubricRecord) -> Result<()>;
}

fn identity(record: &RubricRecord) -> Result<(String, String)> {
    let essay_type = record
        .essay_type()
        .ok_or_else(|| RubricError::Invalid("missing essay_type".into()))?;
    let essay_id = record
        .essay_id()
        .ok_or_else(|| RubricError::Invalid("missing essay_id".into()))?;
    Ok((essay_type, essay_id))
}

/// In-memory store (tests, local runs).
#[derive(Clone, Default)]
pub struct InMemoryRubricStore {
    data: Arc<RwLock<BTreeMap<(String, String), RubricRecord>>>,
}

impl InMemoryRubricStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = RubricRecord>) -> Result<Self> {
        let store = Self::new();
        {
            let mut data = store.data.write().unwrap_or_else(|e| e.into_inner());
            for rec in records {
                let id = identity(&rec)?;
                data.insert(id, rec);
            }
        }
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.data.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RubricStore for InMemoryRubricStore {
    async fn get_rubric(&self, essay_type: &str, content_id: Option<&str>) -> Result<Option<RubricRecord>> {
        let data = self.data.read().unwrap_or_else(|e| e.into_inner());
        Ok(match content_id {
            Some(id) => data.get(&(essay_type.to_string(), id.to_string())).cloned(),
            None => data
                .iter()
                .filter(|((t, _), _)| t == essay_type)
                .map(|(_, rec)| rec)
                .last()
                .cloned(),
        })
    }

    async fn put_rubric(&self, record: RubricRecord) -> Result<()> {
        let id = identity(&record)?;
        self.data
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, record);
        Ok(())
    }
}

/// Percent-encodes one path segment. `/` is encoded, so only empty and
/// dot-only names could leave the root.
fn path_segment(field: &str, value: &str) -> Result<String> {
    if value.is_empty() || value == "." || value == ".." {
        return Err(RubricError::Invalid(format!("{field} '{value}' is not a usable name")));
    }
    Ok(urlencoding::encode(value).into_owned())
}

/// One JSON document per rubric: `<root>/<essay_type>/<essay_id>.json`,
/// both path segments percent-encoded.
#[derive(Clone, Debug)]
pub struct FileRubricStore {
    root: PathBuf,
}

impl FileRubricStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn type_dir(&self, essay_type: &str) -> Result<PathBuf> {
        Ok(self.root.join(path_segment("essay_type", essay_type)?))
    }

    fn record_path(&self, essay_type: &str, essay_id: &str) -> Result<PathBuf> {
        Ok(self
            .type_dir(essay_type)?
            .join(format!("{}.json", path_segment("essay_id", essay_id)?)))
    }

    async fn read(&self, path: &Path) -> Result<Option<RubricRecord>> {
        let bytes = match tokio::fs::read(path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(RubricError::Store(format!("{}: {e}", path.display()))),
        };
        let rec = serde_json::from_slice(&bytes).map_err(|e| RubricError::Ser(e.to_string()))?;
        Ok(Some(rec))
    }

    async fn latest_id(&self, essay_type: &str) -> Result<Option<String>> {
        let dir = self.type_dir(essay_type)?;
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(RubricError::Store(format!("{}: {e}", dir.display()))),
        };

        let mut latest: Option<String> = None;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| RubricError::Store(e.to_string()))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(stem) = name.strip_suffix(".json") else { continue };
            let Ok(id) = urlencoding::decode(stem) else { continue };
            if latest.as_deref().map_or(true, |cur| id.as_ref() > cur) {
                latest = Some(id.into_owned());
            }
        }
        Ok(latest)
    }
}

#[async_trait]
impl RubricStore for FileRubricStore {
    async fn get_rubric(&self, essay_type: &str, content_id: Option<&str>) -> Result<Option<RubricRecord>> {
        let essay_id = match content_id {
            Some(id) => id.to_string(),
            None => match self.latest_id(essay_type).await? {
                Some(id) => id,
                None => return Ok(None),
            },
        };
        self.read(&self.record_path(essay_type, &essay_id)?).await
    }

    async fn put_rubric(&self, record: RubricRecord) -> Result<()> {
        let (essay_type, essay_id) = identity(&record)?;
        let dir = self.type_dir(&essay_type)?;
        let path = self.record_path(&essay_type, &essay_id)?;
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| RubricError::Store(e.to_string()))?;
        let bytes = serde_json::to_vec_pretty(&record).map_err(|e| RubricError::Ser(e.to_string()))?;
        tokio::fs::write(path, bytes)
            .await
            .map_err(|e| RubricError::Store(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rec(essay_type: &str, essay_id: &str) -> RubricRecord {
        RubricRecord::from_value(json!({"essay_type": essay_type, "essay_id": essay_id})).unwrap()
    }

    #[tokio::test]
    async fn in_memory_latest_is_greatest_id() {
        let store = InMemoryRubricStore::with_records([
            rec("SDR", "Winter_20250101_000000"),
            rec("SDR", "Winter_20250812_180450"),
            rec("Argument", "Zeta"),
        ])
        .unwrap();

        let latest = store.get_rubric("SDR", None).await.unwrap().unwrap();
        assert_eq!(latest.essay_id().as_deref(), Some("Winter_20250812_180450"));

        let exact = store.get_rubric("SDR", Some("Winter_20250101_000000")).await.unwrap();
        assert!(exact.is_some());
        assert!(store.get_rubric("SDR", Some("nope")).await.unwrap().is_none());
        assert!(store.get_rubric("Other", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_requires_identity() {
        let store = InMemoryRubricStore::new();
        let bad = RubricRecord::from_value(json!({"essay_type": "SDR"})).unwrap();
        assert!(matches!(store.put_rubric(bad).await, Err(RubricError::Invalid(_))));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn file_store_round_trip_and_latest() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRubricStore::new(dir.path());

        store.put_rubric(rec("Source Dependent Responses", "a/1")).await.unwrap();
        store.put_rubric(rec("Source Dependent Responses", "b/2")).await.unwrap();

        let latest = store.get_rubric("Source Dependent Responses", None).await.unwrap().unwrap();
        assert_eq!(latest.essay_id().as_deref(), Some("b/2"));

        let exact = store.get_rubric("Source Dependent Responses", Some("a/1")).await.unwrap().unwrap();
        assert_eq!(exact.essay_id().as_deref(), Some("a/1"));

        assert!(store.get_rubric("Missing", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_store_stays_under_its_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("rubrics");
        std::fs::write(dir.path().join("secret.json"), r#"{"essay_type": "x", "essay_id": "secret"}"#).unwrap();
        let store = FileRubricStore::new(&root);

        for essay_type in ["..", ".", ""] {
            let err = store.get_rubric(essay_type, Some("secret")).await.unwrap_err();
            assert!(matches!(err, RubricError::Invalid(_)), "{essay_type:?}");
            assert!(matches!(store.get_rubric(essay_type, None).await, Err(RubricError::Invalid(_))));
        }

        let planted = rec("..", "planted");
        assert!(matches!(store.put_rubric(planted).await, Err(RubricError::Invalid(_))));
        assert!(!dir.path().join("planted.json").exists());
        assert!(matches!(store.put_rubric(rec("SDR", "..")).await, Err(RubricError::Invalid(_))));

        // dots inside a name are fine
        store.put_rubric(rec("SDR", "v1..2")).await.unwrap();
        assert!(store.get_rubric("SDR", Some("v1..2")).await.unwrap().is_some());
    }
}
