//! Embedding provider seam. Memory content can optionally be
//! embedded for semantic recall; the vector math and HTTP protocol
//! details of any particular provider are out of scope here, so this
//! module is deliberately thin: a trait, a no-op implementation, and a
//! stub HTTP client good enough to wire a real provider in behind.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// Configuration for an embedding provider, read from `AppConfig`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub model_name: String,
    pub dimensions: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            model_name: "none".to_string(),
            dimensions: 0,
        }
    }
}

/// Generates a vector embedding for a piece of memory content.
#[async_trait::async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
    fn dimensions(&self) -> usize;
    fn model_name(&self) -> &str;
}

/// Provider used when no embedding backend is configured. `recall`'s
/// graph/substring search still works without it; semantic ranking
/// simply does not.
pub struct NullEmbeddingProvider;

#[async_trait::async_trait]
impl EmbeddingProvider for NullEmbeddingProvider {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(anyhow!("no embedding provider configured"))
    }

    fn dimensions(&self) -> usize {
        0
    }

    fn model_name(&self) -> &str {
        "none"
    }
}

/// A thin HTTP client for an OpenAI-compatible embeddings endpoint.
/// Connection details (auth scheme, response shape) are expected to need
/// adjustment per provider; this is the stub the spec calls for, not a
/// general-purpose client.
pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    config: EmbeddingConfig,
}

impl HttpEmbeddingProvider {
    pub fn new(config: EmbeddingConfig) -> Result<Self> {
        if config.endpoint.is_none() {
            return Err(anyhow!("HttpEmbeddingProvider requires an endpoint"));
        }
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()?;
        Ok(Self { client, config })
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a str,
    model: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

#[async_trait::async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let endpoint = self
            .config
            .endpoint
            .as_deref()
            .ok_or_else(|| anyhow!("HttpEmbeddingProvider requires an endpoint"))?;

        let mut request = self.client.post(endpoint).json(&EmbeddingRequest {
            input: text,
            model: &self.config.model_name,
        });
        if let Some(key) = &self.config.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("embedding provider returned an error: {body}"));
        }

        let parsed: EmbeddingResponse = response.json().await?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| anyhow!("embedding provider returned no vectors"))
    }

    fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    fn model_name(&self) -> &str {
        &self.config.model_name
    }
}
