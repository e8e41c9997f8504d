use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use grading::IdField;

use crate::bulk::BulkOptions;
use crate::provider::GenerationConfig;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub bind_addr: String,

    pub llm_base_url: String,
    pub llm_model: String,
    pub llm_api_key: Option<String>,
    pub llm_http_timeout: Duration,
    pub generation: GenerationConfig,

    pub rubrics_dir: PathBuf,
    pub object_store_dir: PathBuf,
    pub output_bucket: String,

    pub id_field: IdField,
    pub bulk: BulkOptions,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let llm_base_url = get(&var, "LLM_BASE_URL")?;
        let llm_model = var("LLM_MODEL").unwrap_or_else(|| "amazon.nova-pro-v1:0".to_string());
        let llm_api_key = var("LLM_API_KEY").filter(|k| !k.is_empty());
        let llm_http_timeout = Duration::from_secs(parse_or(&var, "LLM_HTTP_TIMEOUT_SECS", 180)?);

        let generation = GenerationConfig {
            max_tokens: parse_or(&var, "LLM_MAX_TOKENS", 3000)?,
            temperature: parse_or(&var, "LLM_TEMPERATURE", 0.1)?,
            top_p: parse_or(&var, "LLM_TOP_P", 0.9)?,
        };

        let bind_addr = var("GRADER_BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string());
        let rubrics_dir = PathBuf::from(var("RUBRICS_DIR").unwrap_or_else(|| "./data/rubrics".to_string()));
        let object_store_dir = PathBuf::from(var("OBJECT_STORE_DIR").unwrap_or_else(|| "./data/objects".to_string()));
        let output_bucket = var("OUTPUT_BUCKET").unwrap_or_else(|| "ku-grading-output-bucket".to_string());

        let id_field = match var("GRADER_ID_FIELD") {
            None => IdField::default(),
            Some(v) => IdField::parse(&v)
                .with_context(|| format!("GRADER_ID_FIELD must be content_id or item_id, got '{v}'"))?,
        };

        let bulk = BulkOptions {
            invocation_budget: Duration::from_secs(parse_or(&var, "GRADER_INVOCATION_BUDGET_SECS", 300)?),
            max_concurrency: parse_or(&var, "GRADER_MAX_CONCURRENCY", 5)?,
            item_timeout: Duration::from_secs(parse_or(&var, "GRADER_ITEM_TIMEOUT_SECS", 120)?),
            low_time_threshold: Duration::from_secs(parse_or(&var, "GRADER_LOW_TIME_THRESHOLD_SECS", 30)?),
        };

        // sanity checks
        if !llm_base_url.starts_with("http://") && !llm_base_url.starts_with("https://") {
            bail!("LLM_BASE_URL must start with http:// or https://");
        }
        if bulk.max_concurrency == 0 {
            bail!("GRADER_MAX_CONCURRENCY must be at least 1");
        }
        if !(0.0..=1.0).contains(&generation.top_p) {
            bail!("LLM_TOP_P must be between 0 and 1");
        }
        if output_bucket.is_empty() || output_bucket.contains('/') {
            bail!("OUTPUT_BUCKET must be a bare bucket name");
        }

        Ok(Self {
            bind_addr,
            llm_base_url,
            llm_model,
            llm_api_key,
            llm_http_timeout,
            generation,
            rubrics_dir,
            object_store_dir,
            output_bucket,
            id_field,
            bulk,
        })
    }
}

fn get(var: &impl Fn(&str) -> Option<String>, key: &str) -> Result<String> {
    var(key).with_context(|| format!("Missing required env var: {key}"))
}

fn parse_or<T>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{key}='{raw}' is invalid: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_apply() {
        let cfg = AppConfig::from_lookup(lookup(&[("LLM_BASE_URL", "http://127.0.0.1:1234")])).unwrap();
        assert_eq!(cfg.llm_model, "amazon.nova-pro-v1:0");
        assert_eq!(cfg.generation.max_tokens, 3000);
        assert_eq!(cfg.bulk.max_concurrency, 5);
        assert_eq!(cfg.bulk.item_timeout, Duration::from_secs(120));
        assert_eq!(cfg.bulk.low_time_threshold, Duration::from_secs(30));
        assert_eq!(cfg.output_bucket, "ku-grading-output-bucket");
        assert_eq!(cfg.id_field, IdField::ContentId);
        assert!(cfg.llm_api_key.is_none());
    }

    #[test]
    fn fails_fast_on_bad_values() {
        assert!(AppConfig::from_lookup(lookup(&[])).is_err());
        assert!(AppConfig::from_lookup(lookup(&[("LLM_BASE_URL", "localhost:1234")])).is_err());

        let err = AppConfig::from_lookup(lookup(&[
            ("LLM_BASE_URL", "http://x"),
            ("GRADER_ITEM_TIMEOUT_SECS", "soon"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("GRADER_ITEM_TIMEOUT_SECS"));

        assert!(AppConfig::from_lookup(lookup(&[("LLM_BASE_URL", "http://x"), ("GRADER_ID_FIELD", "uuid")])).is_err());
        assert!(AppConfig::from_lookup(lookup(&[("LLM_BASE_URL", "http://x"), ("GRADER_MAX_CONCURRENCY", "0")])).is_err());
    }

    #[test]
    fn legacy_id_mode() {
        let cfg = AppConfig::from_lookup(lookup(&[("LLM_BASE_URL", "https://x"), ("GRADER_ID_FIELD", "item_id")])).unwrap();
        assert_eq!(cfg.id_field, IdField::ItemId);
    }
}
