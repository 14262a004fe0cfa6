//! Stub clients and fixtures shared by the integration tests.

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use feedback_insights::completion::CompletionClient;
use feedback_insights::config::{parse_config, Config};
use feedback_insights::embedding::EmbeddingClient;
use feedback_insights::error::CompletionError;
use feedback_insights_core::models::{FeedbackItem, FeedbackSource, TaxonomyNode};

// ─── Embedding ──────────────────────────────────────────────────────

/// Payment-related text embeds to `[1, 0]`, everything else to `[0, 1]`.
pub struct KeywordEmbedding;

#[async_trait]
impl EmbeddingClient for KeywordEmbedding {
    fn model_name(&self) -> &str {
        "keyword"
    }

    fn dims(&self) -> usize {
        2
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let lower = text.to_lowercase();
        if lower.contains("pay") || lower.contains("bill") {
            Ok(vec![1.0, 0.0])
        } else {
            Ok(vec![0.0, 1.0])
        }
    }
}

/// `Payments / Bills / Electricity` at cosine distance ~0.1 from `[1, 0]`.
pub fn payments_node() -> TaxonomyNode {
    TaxonomyNode::new(
        "Payments",
        "Bills",
        "Electricity",
        "Payment Failures",
        vec![0.9, 0.435_89],
    )
}

pub fn rewards_node() -> TaxonomyNode {
    TaxonomyNode::new("Rewards", "Cashback", "Offers", "Missing Cashback", vec![0.0, 1.0])
}

// ─── Completion ─────────────────────────────────────────────────────

type Reply = dyn Fn(&str) -> Result<String, CompletionError> + Send + Sync;

/// Completion stub driven by a prompt → reply function. Counts calls.
pub struct ScriptedCompletion {
    reply: Box<Reply>,
    pub calls: AtomicUsize,
}

impl ScriptedCompletion {
    pub fn new(reply: impl Fn(&str) -> Result<String, CompletionError> + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            reply: Box::new(reply),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionClient for ScriptedCompletion {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, prompt: &str) -> Result<String, CompletionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.reply)(prompt)
    }
}

pub fn is_classification_prompt(prompt: &str) -> bool {
    prompt.starts_with("Classify this feedback")
}

/// Labels everything `label`; summary prompts get canned markdown.
pub fn labelling(label: &'static str) -> Arc<ScriptedCompletion> {
    ScriptedCompletion::new(move |prompt| {
        if is_classification_prompt(prompt) {
            Ok(label.to_string())
        } else if prompt.contains("extract feature requests") {
            Ok("- Dark mode\n- Split bills\n- Dark mode".to_string())
        } else {
            Ok("## Summary\n**Users** cannot pay their bills.\nCheckout fails often.".to_string())
        }
    })
}

pub fn server_error() -> CompletionError {
    CompletionError::Status {
        status: 500,
        body: "internal error".into(),
    }
}

// ─── Fixtures ───────────────────────────────────────────────────────

pub fn test_config() -> Config {
    parse_config(
        r#"
[db]
path = "unused.sqlite"
"#,
    )
    .unwrap()
}

pub fn feedback(id: i64, author: &str, content: &str, rating: Option<f32>, posted_at: DateTime<Utc>) -> FeedbackItem {
    FeedbackItem {
        id,
        source: FeedbackSource::AppStore,
        author: author.to_string(),
        content: content.to_string(),
        rating,
        posted_at,
    }
}

pub fn days_ago(now: DateTime<Utc>, days: i64) -> DateTime<Utc> {
    now - Duration::days(days)
}
