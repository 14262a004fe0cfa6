//! Completion clients and the shared retry/backoff policy.
//!
//! A [`CompletionClient`] makes exactly one request per call. Retries,
//! per-attempt timeouts, rate limiting, and cancellation are layered on
//! top by [`RetryingCompletion`], which the classifier and the insight
//! summarizer share.
//!
//! # Retry Strategy
//!
//! - Up to `max_attempts` attempts in total
//! - Waits `initial_delay`, then `initial_delay × multiplier`, ... between attempts
//! - Each attempt holds one rate-limiter permit and has its own timeout
//! - Cancellation during an attempt or a wait returns [`CompletionError::Cancelled`]
//! - Exhaustion returns [`CompletionError::Exhausted`] wrapping the last error

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::CompletionConfig;
use crate::error::CompletionError;
use crate::rate_limit::RateLimiter;

/// Sends one prompt to a text-completion model.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    fn model_name(&self) -> &str;
    async fn complete(&self, prompt: &str) -> Result<String, CompletionError>;
}

/// Build the client selected by `completion.provider`.
pub fn create_completion_client(config: &CompletionConfig) -> Result<Arc<dyn CompletionClient>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAIChatClient::new(config)?)),
        "disabled" => Ok(Arc::new(DisabledCompletionClient)),
        other => Err(anyhow!("Unknown completion provider: {}", other)),
    }
}

pub struct DisabledCompletionClient;

#[async_trait]
impl CompletionClient for DisabledCompletionClient {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _prompt: &str) -> Result<String, CompletionError> {
        Err(CompletionError::Unavailable(
            "completion provider is disabled".into(),
        ))
    }
}

/// Client for OpenAI-compatible `/v1/chat/completions` endpoints.
pub struct OpenAIChatClient {
    http: reqwest::Client,
    url: String,
    model: String,
    api_key: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAIChatClient {
    pub fn new(config: &CompletionConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("completion.model required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;

        Ok(Self {
            http: reqwest::Client::builder().build()?,
            url: config.url.clone(),
            model,
            api_key,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

fn first_choice(response: ChatResponse) -> Result<String, CompletionError> {
    response
        .choices
        .into_iter()
        .next()
        .map(|c| c.message.content)
        .ok_or(CompletionError::EmptyChoices)
}

#[async_trait]
impl CompletionClient for OpenAIChatClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String, CompletionError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });

        let response = self
            .http
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CompletionError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = response.json().await?;
        first_choice(parsed)
    }
}

/// Attempt budget and backoff schedule.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: u32,
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            multiplier: 2,
            attempt_timeout: Duration::from_secs(15),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &CompletionConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_delay: config.initial_delay(),
            multiplier: config.backoff_multiplier.max(1),
            attempt_timeout: config.attempt_timeout(),
        }
    }

    /// Upper bound on wall-clock time for one `complete` call that never
    /// succeeds, excluding time spent waiting for a rate-limiter permit.
    pub fn worst_case(&self) -> Duration {
        let mut total = self.attempt_timeout * self.max_attempts;
        let mut delay = self.initial_delay;
        for _ in 1..self.max_attempts {
            total += delay;
            delay = delay.saturating_mul(self.multiplier);
        }
        total
    }
}

/// A completion client wrapped in the shared retry, timeout, and rate
/// limiting policy. Cheap to clone.
#[derive(Clone)]
pub struct RetryingCompletion {
    client: Arc<dyn CompletionClient>,
    policy: RetryPolicy,
    limiter: RateLimiter,
}

impl RetryingCompletion {
    pub fn new(client: Arc<dyn CompletionClient>, policy: RetryPolicy, limiter: RateLimiter) -> Self {
        Self {
            client,
            policy,
            limiter,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn complete(
        &self,
        cancel: &CancellationToken,
        prompt: &str,
    ) -> Result<String, CompletionError> {
        let mut delay = self.policy.initial_delay;
        let mut last_err = None;

        for attempt in 1..=self.policy.max_attempts {
            if cancel.is_cancelled() {
                return Err(CompletionError::Cancelled);
            }

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(CompletionError::Cancelled),
                outcome = self.attempt(prompt) => outcome,
            };

            match outcome {
                Ok(text) => {
                    debug!(attempt, model = self.client.model_name(), "completion succeeded");
                    return Ok(text);
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    warn!(attempt, error = %e, "completion attempt failed");
                    last_err = Some(e);
                }
            }

            if attempt < self.policy.max_attempts {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(CompletionError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
                delay = delay.saturating_mul(self.policy.multiplier);
            }
        }

        Err(CompletionError::Exhausted {
            attempts: self.policy.max_attempts,
            source: Box::new(last_err.unwrap_or(CompletionError::EmptyChoices)),
        })
    }

    async fn attempt(&self, prompt: &str) -> Result<String, CompletionError> {
        let _permit = self.limiter.acquire().await?;
        match tokio::time::timeout(self.policy.attempt_timeout, self.client.complete(prompt)).await {
            Ok(result) => result,
            Err(_) => Err(CompletionError::Timeout(self.policy.attempt_timeout)),
        }
    }
}
