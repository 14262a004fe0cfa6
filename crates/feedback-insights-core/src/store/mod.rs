//! Storage abstraction for Feedback Insights.
//!
//! Two traits split the persistence collaborator by concern:
//!
//! - [`FeedbackStore`] reads and writes feedback items and their
//!   classifications, and answers the aggregate queries insight generation
//!   needs.
//! - [`VectorIndex`] answers nearest-neighbour queries over taxonomy nodes.
//!
//! Implementations must be `Send + Sync` so they can be shared across the
//! pipeline's worker tasks behind an `Arc`.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{
    Classification, ClassifiedFeedback, FeedbackItem, GroupBy, InsightType, TaxonomyNode,
    TaxonomyScope,
};

/// Aggregate metrics for one `(group key, insight type)` pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupMetrics {
    pub name: String,
    pub insight_type: InsightType,
    /// Number of classified items in the group.
    pub count: u64,
    /// Number of distinct authors in the group.
    pub unique_count: u64,
    /// Average rating, with unrated items counted as 3.
    pub avg_rating: f64,
    /// Sum of per-item recency weights.
    pub recency_score: f64,
}

/// Feedback content aggregated by exact text within a scope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedbackScoreRow {
    pub content: String,
    pub insight_type: InsightType,
    pub count: u64,
    pub avg_rating: f64,
}

/// Persistence operations over feedback items and classifications.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`insert_feedback`](FeedbackStore::insert_feedback) | Insert or replace a feedback item |
/// | [`fetch_unclassified`](FeedbackStore::fetch_unclassified) | Keyset page of items lacking a classification |
/// | [`replace_classification`](FeedbackStore::replace_classification) | Atomic delete-insert-flag |
/// | [`group_metrics`](FeedbackStore::group_metrics) | Per-group aggregates for ranking |
/// | [`representative_feedback`](FeedbackStore::representative_feedback) | Texts fed to the summarizer |
#[async_trait]
pub trait FeedbackStore: Send + Sync {
    /// Insert a feedback item, replacing any existing item with the same id.
    /// Replacing an item does not touch its classification.
    async fn insert_feedback(&self, item: &FeedbackItem) -> Result<()>;

    async fn get_feedback(&self, id: i64) -> Result<Option<FeedbackItem>>;

    /// Number of items not yet flagged as classified.
    async fn count_unclassified(&self) -> Result<u64>;

    /// Items not yet flagged as classified with `id > after_id`, in
    /// ascending id order, at most `limit` of them.
    async fn fetch_unclassified(&self, after_id: Option<i64>, limit: usize)
        -> Result<Vec<FeedbackItem>>;

    /// Atomically delete any prior classification for the item, insert
    /// `classification`, and flag the item as classified.
    async fn replace_classification(&self, classification: &Classification) -> Result<()>;

    /// All live classifications for a feedback item. At most one under
    /// normal operation.
    async fn classifications_for(&self, feedback_id: i64) -> Result<Vec<Classification>>;

    /// Per-group metrics for the ranked insight types, restricted to
    /// groups with a non-empty key and at least `min_support` items.
    ///
    /// Rows come back in first-seen order (lowest feedback id in the group
    /// first); ranking is the caller's job.
    async fn group_metrics(
        &self,
        group_by: GroupBy,
        min_support: u64,
        now: DateTime<Utc>,
    ) -> Result<Vec<GroupMetrics>>;

    /// Up to `limit` feedback items in the group, highest rating first
    /// (unrated last), then most recent first.
    async fn representative_feedback(
        &self,
        group_by: GroupBy,
        name: &str,
        insight_type: InsightType,
        limit: usize,
    ) -> Result<Vec<FeedbackItem>>;

    /// Feedback in scope aggregated by `(content, insight type)`, in
    /// first-seen order.
    async fn feedback_scores(&self, scope: &TaxonomyScope) -> Result<Vec<FeedbackScoreRow>>;

    /// Feedback in scope joined with its classification, in id order.
    async fn classified_feedback(&self, scope: &TaxonomyScope) -> Result<Vec<ClassifiedFeedback>>;
}

/// Similarity search over taxonomy nodes.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn add_node(&self, node: &TaxonomyNode) -> Result<()>;

    /// The `k` nearest nodes to `vector` by cosine distance, closest first.
    /// An empty index yields an empty list.
    async fn nearest_neighbors(&self, vector: &[f32], k: usize) -> Result<Vec<(TaxonomyNode, f32)>>;

    /// The nearest node with a non-empty LOB and category, searched over
    /// the whole index. `None` when no such node exists.
    async fn nearest_valid(&self, vector: &[f32]) -> Result<Option<(TaxonomyNode, f32)>>;

    async fn node_count(&self) -> Result<u64>;
}
