use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tracing::info;

use crate::provider::{GenerationConfig, LLMProvider, ProviderInfo};

/// Chat-completions client for any OpenAI-compatible endpoint.
pub struct OpenAiCompatProvider {
    base_url: String,
    model: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    pub fn new(base_url: String, model: String, api_key: Option<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build model http client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            api_key,
            client,
        })
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }
}

#[async_trait]
impl LLMProvider for OpenAiCompatProvider {
    async fn generate(&self, prompt: &str, cfg: &GenerationConfig) -> anyhow::Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "max_tokens": cfg.max_tokens,
            "temperature": cfg.temperature,
            "top_p": cfg.top_p,
        });

        let url = format!("{}/v1/chat/completions", self.base_url);
        let resp = self
            .request(self.client.post(url))
            .json(&body)
            .send()
            .await
            .context("model request failed")?
            .error_for_status()
            .context("model endpoint returned an error status")?;
        let json: serde_json::Value = resp.json().await.context("model response is not JSON")?;

        let text = json["choices"][0]["message"]["content"]
            .as_str()
            .context("model response has no message content")?
            .to_string();
        info!(chars = text.len(), model = %self.model, "received model response");
        Ok(text)
    }

    async fn ping(&self) -> anyhow::Result<()> {
        let url = format!("{}/v1/models", self.base_url);
        self.request(self.client.get(url)).send().await?.error_for_status()?;
        Ok(())
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "openai-compatible".to_string(),
            base_url: self.base_url.clone(),
            model: self.model.clone(),
        }
    }
}
