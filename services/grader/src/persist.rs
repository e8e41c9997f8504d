use anyhow::{Context, Result};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use blobstore::{ObjectLocation, ObjectStore};

use crate::types::{BatchResponse, StorageLocations, StorageOutcome};

/// A prefix is used as a directory: it gains a trailing `/` if missing.
pub fn normalize_prefix(prefix: &str) -> String {
    let p = prefix.trim().trim_start_matches('/');
    if p.is_empty() || p.ends_with('/') {
        p.to_string()
    } else {
        format!("{p}/")
    }
}

async fn put_json<T: Serialize + ?Sized>(
    store: &dyn ObjectStore,
    bucket: &str,
    key: String,
    value: &T,
) -> Result<ObjectLocation> {
    let body = serde_json::to_vec_pretty(value).context("failed to serialize batch object")?;
    store
        .put(bucket, &key, Bytes::from(body))
        .await
        .with_context(|| format!("failed to write s3://{bucket}/{key}"))?;
    Ok(ObjectLocation::new(bucket, key))
}

/// Writes the full batch, the results alone and the per-type aggregates.
pub async fn store_batch(
    store: &dyn ObjectStore,
    bucket: &str,
    prefix: &str,
    batch: &BatchResponse,
    now: DateTime<Utc>,
) -> Result<StorageOutcome> {
    let prefix = normalize_prefix(prefix);
    let stamp = now.format("%Y%m%d_%H%M%S");
    let id = &batch.batch_id;

    let complete = put_json(store, bucket, format!("{prefix}batch_results/{stamp}_{id}_complete.json"), batch).await?;
    let results = put_json(
        store,
        bucket,
        format!("{prefix}results_only/{stamp}_{id}_results.json"),
        &batch.results,
    )
    .await?;
    let aggregated = put_json(
        store,
        bucket,
        format!("{prefix}aggregated/{stamp}_{id}_aggregated.json"),
        &batch.aggregates_by_essay_type,
    )
    .await?;

    info!(batch_id = %id, results = batch.results.len(), "stored batch results");

    Ok(StorageOutcome::stored(
        batch.results.len(),
        StorageLocations {
            complete_batch: complete.to_string(),
            results_only: results.to_string(),
            aggregated_results: aggregated.to_string(),
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use blobstore::BlobError;
    use std::collections::BTreeMap;

    use crate::types::{BatchErrors, BatchSummary, ProcessingStatus};

    struct BrokenStore;

    #[async_trait]
    impl ObjectStore for BrokenStore {
        async fn get(&self, bucket: &str, key: &str) -> blobstore::Result<Bytes> {
            Err(BlobError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
        }

        async fn put(&self, _bucket: &str, _key: &str, _body: Bytes) -> blobstore::Result<()> {
            Err(BlobError::Io(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied")))
        }
    }

    fn empty_batch() -> BatchResponse {
        BatchResponse {
            processing_mode: "bulk",
            batch_id: "b1".to_string(),
            processing_status: ProcessingStatus::Completed,
            summary: BatchSummary::default(),
            unique_essay_types: Vec::new(),
            results: Vec::new(),
            errors: BatchErrors::default(),
            aggregates_by_essay_type: BTreeMap::new(),
            s3_storage: None,
        }
    }

    #[test]
    fn prefixes_become_directories() {
        assert_eq!(normalize_prefix("grading_results/2025/01/02/"), "grading_results/2025/01/02/");
        assert_eq!(normalize_prefix("/runs/a"), "runs/a/");
        assert_eq!(normalize_prefix(""), "");
    }

    #[tokio::test]
    async fn write_failure_surfaces_as_error() {
        let err = store_batch(&BrokenStore, "bucket", "p/", &empty_batch(), Utc::now())
            .await
            .unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("s3://bucket/p/batch_results/"));
        assert!(msg.contains("access denied"));
    }

    #[tokio::test]
    async fn complete_object_holds_the_batch() {
        let store = blobstore::InMemoryObjectStore::new();
        let now = Utc::now();
        let outcome = store_batch(&store, "bucket", "p", &empty_batch(), now).await.unwrap();
        let loc = ObjectLocation::parse(&outcome.s3_locations.unwrap().complete_batch).unwrap();
        assert!(loc.key.starts_with("p/batch_results/"));

        let body: serde_json::Value = serde_json::from_slice(&store.get_at(&loc).await.unwrap()).unwrap();
        assert_eq!(body["batch_id"], "b1");
        assert_eq!(body["processing_mode"], "bulk");
        assert!(body.get("s3_storage").is_none());
    }

    #[tokio::test]
    async fn filesystem_store_lays_out_bucket_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let store = blobstore::FsObjectStore::new(dir.path());
        let now = Utc::now();
        store_batch(&store, "out", "runs/x", &empty_batch(), now).await.unwrap();

        let stamp = now.format("%Y%m%d_%H%M%S");
        let agg = dir.path().join(format!("out/runs/x/aggregated/{stamp}_b1_aggregated.json"));
        assert_eq!(std::fs::read_to_string(agg).unwrap().trim(), "{}");
        let results = dir.path().join(format!("out/runs/x/results_only/{stamp}_b1_results.json"));
        assert_eq!(std::fs::read_to_string(results).unwrap().trim(), "[]");
    }
}
