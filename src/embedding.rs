//! Embedding clients used by the taxonomy matcher.
//!
//! - **[`OpenAIEmbeddingClient`]** calls an OpenAI-compatible
//!   `/v1/embeddings` endpoint with retry and exponential backoff.
//! - **[`DisabledEmbeddingClient`]** always fails; the matcher then
//!   degrades to a zero vector.
//!
//! # Retry Strategy
//!
//! - HTTP 429 and 5xx retry with backoff 1s, 2s, ...
//! - Other 4xx fail immediately
//! - Network errors retry

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::config::EmbeddingConfig;

const MAX_RETRIES: u32 = 2;

/// Turns text into a fixed-length dense vector.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Model identifier, e.g. `"text-embedding-3-small"`.
    fn model_name(&self) -> &str;
    /// Vector dimensionality, e.g. `1536`.
    fn dims(&self) -> usize;
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Build the client selected by `embedding.provider`.
pub fn create_embedding_client(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingClient>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAIEmbeddingClient::new(config)?)),
        "disabled" => Ok(Arc::new(DisabledEmbeddingClient { dims: config.dims })),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

pub struct DisabledEmbeddingClient {
    pub dims: usize,
}

#[async_trait]
impl EmbeddingClient for DisabledEmbeddingClient {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        bail!("Embedding provider is disabled")
    }
}

pub struct OpenAIEmbeddingClient {
    http: reqwest::Client,
    url: String,
    model: String,
    dims: usize,
    api_key: String,
}

impl OpenAIEmbeddingClient {
    /// # Errors
    ///
    /// Fails when `embedding.model` is unset or `OPENAI_API_KEY` is missing.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("embedding.model required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            url: config.url.clone(),
            model,
            dims: config.dims,
            api_key,
        })
    }
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingClient for OpenAIEmbeddingClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
        });

        let mut last_err = None;

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_secs(1 << (attempt - 1))).await;
            }

            let response = match self
                .http
                .post(&self.url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    last_err = Some(anyhow!(e).context("embedding request failed"));
                    continue;
                }
            };

            let status = response.status();
            if status.is_success() {
                let parsed: EmbeddingResponse = response
                    .json()
                    .await
                    .context("Invalid embedding response")?;
                return first_embedding(parsed, self.dims);
            }

            let body_text = response.text().await.unwrap_or_default();
            if status.as_u16() == 429 || status.is_server_error() {
                last_err = Some(anyhow!("Embedding API error {}: {}", status, body_text));
                continue;
            }
            bail!("Embedding API error {}: {}", status, body_text);
        }

        Err(last_err.unwrap_or_else(|| anyhow!("Embedding failed after retries")))
    }
}

fn first_embedding(response: EmbeddingResponse, dims: usize) -> Result<Vec<f32>> {
    let vector = response
        .data
        .into_iter()
        .next()
        .map(|d| d.embedding)
        .ok_or_else(|| anyhow!("Empty embedding response"))?;
    if vector.len() != dims {
        bail!(
            "Embedding has {} dimensions, expected {}",
            vector.len(),
            dims
        );
    }
    Ok(vector)
}
