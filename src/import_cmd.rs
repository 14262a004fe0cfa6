//! JSON-lines loaders for feedback and taxonomy nodes.
//!
//! Feedback lines deserialize straight into [`FeedbackItem`]. Taxonomy
//! lines carry `lob`, `category`, `folder`, and `title`; each node is
//! embedded from a labelled rendering of those four fields.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;
use tracing::warn;

use feedback_insights_core::models::{FeedbackItem, TaxonomyNode};
use feedback_insights_core::store::FeedbackStore;

use crate::config::Config;
use crate::embedding::create_embedding_client;
use crate::services;

#[derive(Debug, Deserialize)]
pub struct TaxonomyRecord {
    pub lob: String,
    pub category: String,
    pub folder: String,
    pub title: String,
}

impl TaxonomyRecord {
    /// Text embedded for this node.
    pub fn embedding_text(&self) -> String {
        format!(
            "LOB: {} | Category: {} | Subcategory: {} | Question: {}",
            self.lob, self.category, self.folder, self.title
        )
    }
}

fn read_lines<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Vec<T>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("{}:{}: invalid record", path.display(), i + 1))
        })
        .collect()
}

pub async fn run_import_feedback(config: &Config, path: &Path) -> Result<()> {
    let items: Vec<FeedbackItem> = read_lines(path)?;
    let store = services::open_store(config).await?;
    for item in &items {
        store
            .insert_feedback(item)
            .await
            .with_context(|| format!("failed to store feedback {}", item.id))?;
    }
    println!("import feedback");
    println!("  records: {}", items.len());
    store.pool().close().await;
    Ok(())
}

pub async fn run_import_taxonomy(config: &Config, path: &Path) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }
    let records: Vec<TaxonomyRecord> = read_lines(path)?;
    let embedder = create_embedding_client(&config.embedding)?;
    let store = services::open_store(config).await?;

    let mut stored = 0u64;
    let mut failed = 0u64;
    for record in &records {
        let embedding = match embedder.embed(&record.embedding_text()).await {
            Ok(v) => v,
            Err(e) => {
                warn!(lob = %record.lob, title = %record.title, error = %format!("{e:#}"), "failed to embed taxonomy node");
                failed += 1;
                continue;
            }
        };
        let node = TaxonomyNode::new(
            &record.lob,
            &record.category,
            &record.folder,
            &record.title,
            embedding,
        );
        store.insert_taxonomy_node(&node).await?;
        stored += 1;
    }

    println!("import taxonomy");
    println!("  records: {}", records.len());
    println!("  stored: {}", stored);
    println!("  failed: {}", failed);
    store.pool().close().await;
    Ok(())
}
