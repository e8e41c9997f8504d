//! Test doubles shared by the service's unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use blobstore::{InMemoryObjectStore, ObjectStore};
use rubric::{InMemoryRubricStore, RubricRecord, RubricStore};

use crate::config::AppConfig;
use crate::provider::{GenerationConfig, LLMProvider, ProviderInfo};
use crate::state::AppState;

#[derive(Clone)]
enum Scripted {
    Text(String),
    Fail(String),
    Slow(Duration, String),
}

/// Answers by the first rule whose needle appears in the prompt.
pub struct StubProvider {
    rules: Vec<(String, Scripted)>,
    fallback: String,
    calls: AtomicUsize,
}

impl StubProvider {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            fallback: json!({"overall_essay_score": 1, "ai_confidence": 50}).to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn reply(mut self, needle: &str, reply: Value) -> Self {
        self.rules.push((needle.to_string(), Scripted::Text(reply.to_string())));
        self
    }

    pub fn raw(mut self, needle: &str, text: &str) -> Self {
        self.rules.push((needle.to_string(), Scripted::Text(text.to_string())));
        self
    }

    pub fn fail(mut self, needle: &str, message: &str) -> Self {
        self.rules.push((needle.to_string(), Scripted::Fail(message.to_string())));
        self
    }

    pub fn slow(mut self, needle: &str, delay: Duration, reply: Value) -> Self {
        self.rules.push((needle.to_string(), Scripted::Slow(delay, reply.to_string())));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LLMProvider for StubProvider {
    async fn generate(&self, prompt: &str, _cfg: &GenerationConfig) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let rule = self
            .rules
            .iter()
            .find(|(needle, _)| prompt.contains(needle.as_str()))
            .map(|(_, r)| r.clone());
        match rule {
            None => Ok(self.fallback.clone()),
            Some(Scripted::Text(t)) => Ok(t),
            Some(Scripted::Fail(m)) => anyhow::bail!("{m}"),
            Some(Scripted::Slow(d, t)) => {
                tokio::time::sleep(d).await;
                Ok(t)
            }
        }
    }

    async fn ping(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "stub".to_string(),
            base_url: "http://stub".to_string(),
            model: "stub-model".to_string(),
        }
    }
}

/// Counts lookups on top of an in-memory store.
pub struct CountingRubricStore {
    inner: InMemoryRubricStore,
    gets: AtomicUsize,
}

impl CountingRubricStore {
    pub fn new(records: Vec<RubricRecord>) -> Self {
        Self {
            inner: InMemoryRubricStore::with_records(records).expect("valid test records"),
            gets: AtomicUsize::new(0),
        }
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RubricStore for CountingRubricStore {
    async fn get_rubric(&self, essay_type: &str, content_id: Option<&str>) -> rubric::Result<Option<RubricRecord>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get_rubric(essay_type, content_id).await
    }

    async fn put_rubric(&self, record: RubricRecord) -> rubric::Result<()> {
        self.inner.put_rubric(record).await
    }
}

pub fn rubric_record(essay_type: &str, essay_id: &str, range: &str) -> RubricRecord {
    RubricRecord::from_value(json!({
        "essay_type": essay_type,
        "essay_id": essay_id,
        "rubric_version": "1.0",
        "score_range": range,
        "essay_question": "What does the symbol mean?",
        "rubrics": {
            "score_3": {"score_label": "Thorough", "content_understanding": "full", "use_of_evidence": "precise"},
            "score_1": {"score_label": "Minimal", "content_understanding": "little", "use_of_evidence": "none"},
        },
    }))
    .expect("object literal")
}

pub fn test_config() -> AppConfig {
    AppConfig::from_lookup(|k| (k == "LLM_BASE_URL").then(|| "http://stub".to_string())).expect("test config")
}

pub fn state_with(
    provider: Arc<StubProvider>,
    rubrics: Arc<dyn RubricStore>,
    objects: Arc<dyn ObjectStore>,
) -> AppState {
    AppState::new(test_config(), provider, rubrics, objects)
}

pub fn test_state(provider: StubProvider, records: Vec<RubricRecord>) -> AppState {
    state_with(
        Arc::new(provider),
        Arc::new(CountingRubricStore::new(records)),
        Arc::new(InMemoryObjectStore::new()),
    )
}
