use async_trait::async_trait;

/// Sampling parameters sent with every model call.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GenerationConfig {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_tokens: 3000,
            temperature: 0.1,
            top_p: 0.9,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ProviderInfo {
    pub name: String,
    pub base_url: String,
    pub model: String,
}

#[async_trait]
pub trait LLMProvider: Send + Sync {
    async fn generate(&self, prompt: &str, cfg: &GenerationConfig) -> anyhow::Result<String>;
    async fn ping(&self) -> anyhow::Result<()>;
    fn info(&self) -> ProviderInfo;
}
