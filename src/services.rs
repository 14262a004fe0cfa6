//! Wiring from [`Config`] to the pipeline and aggregator.
//!
//! One [`RateLimiter`] is built per process and shared by classification
//! and summarization through a single [`RetryingCompletion`].

use anyhow::Result;
use std::sync::Arc;

use feedback_insights_core::store::{FeedbackStore, VectorIndex};

use crate::classifier::Classifier;
use crate::completion::{create_completion_client, CompletionClient, RetryPolicy, RetryingCompletion};
use crate::config::Config;
use crate::db;
use crate::embedding::{create_embedding_client, EmbeddingClient};
use crate::insights::summary::InsightSummarizer;
use crate::insights::InsightAggregator;
use crate::matcher::TaxonomyMatcher;
use crate::pipeline::PredictionPipeline;
use crate::rate_limit::RateLimiter;
use crate::sqlite_store::SqliteStore;

pub struct Services {
    pub matcher: Arc<TaxonomyMatcher>,
    pub pipeline: PredictionPipeline,
    pub aggregator: InsightAggregator,
    pub limiter: RateLimiter,
}

impl Services {
    pub fn build(
        store: Arc<dyn FeedbackStore>,
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn EmbeddingClient>,
        completion: Arc<dyn CompletionClient>,
        config: &Config,
    ) -> Self {
        let limiter = RateLimiter::new(config.completion.max_concurrent_calls);
        let completion = RetryingCompletion::new(
            completion,
            RetryPolicy::from_config(&config.completion),
            limiter.clone(),
        );

        let matcher = Arc::new(TaxonomyMatcher::new(embedder, index, &config.matching));
        let pipeline = PredictionPipeline::new(
            Arc::clone(&store),
            Arc::clone(&matcher),
            Classifier::new(completion.clone()),
            config.pipeline.clone(),
        );
        let aggregator = InsightAggregator::new(
            store,
            InsightSummarizer::new(completion),
            config.insights.clone(),
        );

        Self {
            matcher,
            pipeline,
            aggregator,
            limiter,
        }
    }
}

pub async fn open_store(config: &Config) -> Result<Arc<SqliteStore>> {
    let pool = db::connect(&config.db).await?;
    Ok(Arc::new(SqliteStore::new(pool)))
}

/// Open the database and construct the configured network clients.
pub async fn from_config(config: &Config) -> Result<(Arc<SqliteStore>, Services)> {
    let store = open_store(config).await?;
    let embedder = create_embedding_client(&config.embedding)?;
    let completion = create_completion_client(&config.completion)?;
    let services = Services::build(
        store.clone(),
        store.clone(),
        embedder,
        completion,
        config,
    );
    Ok((store, services))
}
