use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{info, warn};

use crate::normalize::{normalize, NormalizedRubric};
use crate::store::{Result, RubricError, RubricStore};
use crate::{RubricKey, RubricRecord};

/// Normalized rubrics by lookup key, kept for the life of the process.
///
/// Lookups never hold the lock across a store call. Two callers missing the
/// same key at once both fetch; the first insert wins and the second result
/// is dropped.
#[derive(Default)]
pub struct RubricCache {
    entries: RwLock<HashMap<RubricKey, Arc<NormalizedRubric>>>,
}

pub type SharedRubricCache = Arc<RubricCache>;

impl RubricCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &RubricKey) -> Option<Arc<NormalizedRubric>> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    /// Inserts unless the key is already present; returns the cached entry.
    pub fn insert(&self, key: RubricKey, rubric: NormalizedRubric) -> Arc<NormalizedRubric> {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(key)
            .or_insert_with(|| Arc::new(rubric))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.write().unwrap_or_else(|e| e.into_inner()).clear();
    }

    pub async fn resolve(&self, store: &dyn RubricStore, key: &RubricKey) -> Result<Arc<NormalizedRubric>> {
        if let Some(hit) = self.get(key) {
            info!(cache_key = %key, "using cached rubric");
            return Ok(hit);
        }

        info!(cache_key = %key, "loading rubric from store");
        let record = fetch_rubric(store, key).await?;
        Ok(self.insert(key.clone(), normalize(&record)))
    }
}

/// Looks a rubric up by key. A content id with no exact match falls back to
/// the most recent rubric for the essay type.
pub async fn fetch_rubric(store: &dyn RubricStore, key: &RubricKey) -> Result<RubricRecord> {
    let not_found = || RubricError::NotFound {
        essay_type: key.essay_type.clone(),
        content_id: key.content_id.clone(),
    };

    let Some(content_id) = key.content_id.as_deref() else {
        return store.get_rubric(&key.essay_type, None).await?.ok_or_else(not_found);
    };

    if let Some(rec) = store.get_rubric(&key.essay_type, Some(content_id)).await? {
        return Ok(rec);
    }

    warn!(
        essay_type = %key.essay_type,
        content_id = %content_id,
        "no rubric for content_id, falling back to most recent for essay type"
    );
    let rec = store
        .get_rubric(&key.essay_type, None)
        .await?
        .ok_or_else(not_found)?;

    let found = rec.essay_id().unwrap_or_default();
    if found != content_id {
        warn!(requested = %content_id, found = %found, "rubric essay_id does not match requested content_id");
    }
    Ok(rec)
}
