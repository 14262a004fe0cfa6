use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use feedback_insights_core::scoring::PriorityPolicy;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub insights: InsightsConfig,
    #[serde(default)]
    pub tickets: TicketsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: Option<String>,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_embedding_url")]
    pub url: String,
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_embedding_model(),
            dims: default_dims(),
            url: default_embedding_url(),
            timeout_secs: default_embedding_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}
fn default_embedding_model() -> Option<String> {
    Some("text-embedding-3-small".to_string())
}
fn default_dims() -> usize {
    1536
}
fn default_embedding_url() -> String {
    "https://api.openai.com/v1/embeddings".to_string()
}
fn default_embedding_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct CompletionConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_completion_model")]
    pub model: Option<String>,
    #[serde(default = "default_completion_url")]
    pub url: String,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: u32,
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_max_concurrent_calls")]
    pub max_concurrent_calls: usize,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_completion_model(),
            url: default_completion_url(),
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            max_concurrent_calls: default_max_concurrent_calls(),
        }
    }
}

fn default_completion_model() -> Option<String> {
    Some("gpt-4o-mini".to_string())
}
fn default_completion_url() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}
fn default_max_attempts() -> u32 {
    3
}
fn default_initial_delay_ms() -> u64 {
    1000
}
fn default_backoff_multiplier() -> u32 {
    2
}
fn default_attempt_timeout_secs() -> u64 {
    15
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    1000
}
fn default_max_concurrent_calls() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct MatchingConfig {
    #[serde(default = "default_threshold")]
    pub threshold: f32,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
        }
    }
}

fn default_threshold() -> f32 {
    0.8
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            worker_count: default_worker_count(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

fn default_batch_size() -> usize {
    100
}
fn default_worker_count() -> usize {
    5
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    2000
}

#[derive(Debug, Deserialize, Clone)]
pub struct InsightsConfig {
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    #[serde(default = "default_lob_min_support")]
    pub lob_min_support: u64,
    #[serde(default = "default_category_min_support")]
    pub category_min_support: u64,
    #[serde(default = "default_max_feedbacks_per_group")]
    pub max_feedbacks_per_group: usize,
    #[serde(default = "default_summary_workers")]
    pub summary_workers: usize,
    #[serde(default = "default_top_feedback_limit")]
    pub top_feedback_limit: usize,
}

impl Default for InsightsConfig {
    fn default() -> Self {
        Self {
            top_n: default_top_n(),
            lob_min_support: default_lob_min_support(),
            category_min_support: default_category_min_support(),
            max_feedbacks_per_group: default_max_feedbacks_per_group(),
            summary_workers: default_summary_workers(),
            top_feedback_limit: default_top_feedback_limit(),
        }
    }
}

fn default_top_n() -> usize {
    15
}
fn default_lob_min_support() -> u64 {
    5
}
fn default_category_min_support() -> u64 {
    3
}
fn default_max_feedbacks_per_group() -> usize {
    10
}
fn default_summary_workers() -> usize {
    5
}
fn default_top_feedback_limit() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct TicketsConfig {
    #[serde(default)]
    pub team_id: Option<String>,
    #[serde(default = "default_tracker_url")]
    pub url: String,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default)]
    pub priority_policy: PriorityPolicy,
}

impl Default for TicketsConfig {
    fn default() -> Self {
        Self {
            team_id: None,
            url: default_tracker_url(),
            cache_ttl_secs: default_cache_ttl_secs(),
            priority_policy: PriorityPolicy::default(),
        }
    }
}

fn default_tracker_url() -> String {
    "https://api.linear.app/graphql".to_string()
}
fn default_cache_ttl_secs() -> u64 {
    300
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

impl CompletionConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }
}

impl TicketsConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

impl PipelineConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate a TOML configuration document.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.pipeline.batch_size == 0 {
        bail!("pipeline.batch_size must be > 0");
    }
    if config.pipeline.worker_count == 0 {
        bail!("pipeline.worker_count must be > 0");
    }
    if config.completion.max_attempts == 0 {
        bail!("completion.max_attempts must be > 0");
    }
    if config.completion.max_concurrent_calls == 0 {
        bail!("completion.max_concurrent_calls must be > 0");
    }
    if config.insights.summary_workers == 0 {
        bail!("insights.summary_workers must be > 0");
    }
    if config.insights.top_n == 0 {
        bail!("insights.top_n must be > 0");
    }
    if config.matching.threshold <= 0.0 {
        bail!("matching.threshold must be > 0");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }
    match config.completion.provider.as_str() {
        "disabled" | "openai" => {}
        other => bail!(
            "Unknown completion provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims == 0 {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }
    if config.completion.is_enabled() && config.completion.model.is_none() {
        bail!(
            "completion.model must be specified when provider is '{}'",
            config.completion.provider
        );
    }

    Ok(config)
}
