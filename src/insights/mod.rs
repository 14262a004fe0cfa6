//! Ranked insight aggregation.
//!
//! [`InsightAggregator::aggregate`] runs the by-LOB and by-Category
//! dimensions concurrently. Each dimension:
//!
//! 1. loads per-group metrics from the store (fatal on failure),
//! 2. ranks groups per insight type by composite score and keeps the top N,
//! 3. streams representative feedback for each kept group into a bounded
//!    channel consumed by a fixed pool of summary workers,
//! 4. reconciles narrative results back to their group by `(name, type)`.
//!
//! A group whose narrative fails keeps its metrics and gets an empty
//! summary; it is never dropped. A cancelled aggregation is an error, so
//! callers never act on a partially summarized response.

pub mod report;
pub mod summary;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use feedback_insights_core::models::{GroupBy, InsightType, TaxonomyScope};
use feedback_insights_core::scoring::{group_composite_score, rank_descending, weighted_feedback_score};
use feedback_insights_core::store::{FeedbackStore, GroupMetrics};

use crate::config::InsightsConfig;
use crate::error::CompletionError;
use summary::{InsightSummarizer, InsightSummary, SummaryOutcome};

/// One ranked group in an [`InsightsResponse`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryInsight {
    pub name: String,
    pub insight_type: InsightType,
    pub count: u64,
    pub unique_count: u64,
    pub avg_rating: f64,
    pub impact_score: f64,
    pub summary: InsightSummary,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TypeInsights {
    pub top_lobs: Vec<CategoryInsight>,
    pub top_categories: Vec<CategoryInsight>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InsightsResponse {
    pub feature_requests: TypeInsights,
    pub improvements: TypeInsights,
    pub complaints: TypeInsights,
}

impl InsightsResponse {
    pub fn for_type(&self, insight_type: InsightType) -> Option<&TypeInsights> {
        match insight_type {
            InsightType::FeatureRequest => Some(&self.feature_requests),
            InsightType::Improvement => Some(&self.improvements),
            InsightType::Complaint => Some(&self.complaints),
            InsightType::Other => None,
        }
    }

    fn for_type_mut(&mut self, insight_type: InsightType) -> Option<&mut TypeInsights> {
        match insight_type {
            InsightType::FeatureRequest => Some(&mut self.feature_requests),
            InsightType::Improvement => Some(&mut self.improvements),
            InsightType::Complaint => Some(&mut self.complaints),
            InsightType::Other => None,
        }
    }

    /// Every group across types and dimensions.
    pub fn groups(&self) -> impl Iterator<Item = &CategoryInsight> {
        [&self.feature_requests, &self.improvements, &self.complaints]
            .into_iter()
            .flat_map(|t| t.top_lobs.iter().chain(t.top_categories.iter()))
    }
}

/// A group's metrics paired with its composite score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredGroup {
    pub metrics: GroupMetrics,
    pub score: f64,
}

/// Rank `metrics` per insight type by composite score, keeping the top
/// `top_n` of each type. Output is grouped by type in
/// [`InsightType::RANKED`] order; ties keep input order.
pub fn rank_groups(metrics: Vec<GroupMetrics>, top_n: usize) -> Vec<ScoredGroup> {
    let mut ranked = Vec::with_capacity(metrics.len().min(top_n * 3));
    for insight_type in InsightType::RANKED {
        let mut of_type: Vec<ScoredGroup> = metrics
            .iter()
            .filter(|m| m.insight_type == insight_type)
            .map(|m| ScoredGroup {
                score: group_composite_score(m.count, m.avg_rating, m.recency_score),
                metrics: m.clone(),
            })
            .collect();
        rank_descending(&mut of_type, |g| g.score);
        of_type.truncate(top_n);
        ranked.extend(of_type);
    }
    ranked
}

/// One feedback text ranked within a LOB scope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopFeedbackItem {
    pub feedback: String,
    pub user_count: u64,
    pub score: f64,
    pub affinity_avg: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FeedbackResponse {
    pub lob: String,
    pub category: Option<String>,
    pub sub_category: Option<String>,
    pub feature_requests: Vec<TopFeedbackItem>,
    pub improvements: Vec<TopFeedbackItem>,
    pub complaints: Vec<TopFeedbackItem>,
}

pub(crate) struct SummaryTask<K> {
    pub key: K,
    pub insight_type: InsightType,
    pub texts: Vec<String>,
}

pub(crate) struct SummaryResult<K> {
    pub key: K,
    pub outcome: SummaryOutcome,
}

type GroupKey = (String, InsightType);

#[derive(Clone)]
pub struct InsightAggregator {
    store: Arc<dyn FeedbackStore>,
    summarizer: InsightSummarizer,
    config: InsightsConfig,
}

impl InsightAggregator {
    pub fn new(
        store: Arc<dyn FeedbackStore>,
        summarizer: InsightSummarizer,
        config: InsightsConfig,
    ) -> Self {
        Self {
            store,
            summarizer,
            config,
        }
    }

    pub async fn aggregate(&self, cancel: &CancellationToken) -> Result<InsightsResponse> {
        self.aggregate_at(cancel, Utc::now()).await
    }

    /// [`aggregate`](Self::aggregate) with recency measured from `now`.
    pub async fn aggregate_at(
        &self,
        cancel: &CancellationToken,
        now: DateTime<Utc>,
    ) -> Result<InsightsResponse> {
        let (lobs, categories) = tokio::join!(
            self.aggregate_dimension(cancel, GroupBy::Lob, self.config.lob_min_support, now),
            self.aggregate_dimension(
                cancel,
                GroupBy::Category,
                self.config.category_min_support,
                now
            ),
        );
        if cancel.is_cancelled() {
            return Err(anyhow::Error::new(CompletionError::Cancelled))
                .context("insight aggregation cancelled");
        }
        let lobs = lobs.context("failed to aggregate LOB insights")?;
        let categories = categories.context("failed to aggregate category insights")?;

        let mut response = InsightsResponse::default();
        for insight in lobs {
            if let Some(slot) = response.for_type_mut(insight.insight_type) {
                slot.top_lobs.push(insight);
            }
        }
        for insight in categories {
            if let Some(slot) = response.for_type_mut(insight.insight_type) {
                slot.top_categories.push(insight);
            }
        }
        Ok(response)
    }

    async fn aggregate_dimension(
        &self,
        cancel: &CancellationToken,
        group_by: GroupBy,
        min_support: u64,
        now: DateTime<Utc>,
    ) -> Result<Vec<CategoryInsight>> {
        let metrics = self
            .store
            .group_metrics(group_by, min_support, now)
            .await
            .with_context(|| format!("failed to query {} metrics", group_by))?;

        let ranked = rank_groups(metrics, self.config.top_n);
        info!(group = %group_by, groups = ranked.len(), "ranked insight groups");
        if ranked.is_empty() {
            return Ok(Vec::new());
        }

        let workers = self.config.summary_workers.max(1);
        let (task_tx, task_rx) = mpsc::channel::<SummaryTask<GroupKey>>(workers);
        let (result_tx, result_rx) = mpsc::channel::<SummaryResult<GroupKey>>(workers);
        let mut pool = self.spawn_summary_workers(cancel, task_rx, result_tx);

        let (_, mut summaries) = tokio::join!(
            self.produce_group_tasks(cancel, group_by, &ranked, task_tx),
            collect_summaries(result_rx),
        );

        while let Some(joined) = pool.join_next().await {
            if let Err(e) = joined {
                warn!(group = %group_by, error = %e, "summary worker failed");
            }
        }
        if cancel.is_cancelled() {
            info!(group = %group_by, "aggregation cancelled");
        }

        Ok(ranked
            .into_iter()
            .map(|g| {
                let key = (g.metrics.name.clone(), g.metrics.insight_type);
                let summary = summaries
                    .remove(&key)
                    .map(|o| o.summary)
                    .unwrap_or_default();
                CategoryInsight {
                    name: g.metrics.name,
                    insight_type: g.metrics.insight_type,
                    count: g.metrics.count,
                    unique_count: g.metrics.unique_count,
                    avg_rating: g.metrics.avg_rating,
                    impact_score: g.score,
                    summary,
                }
            })
            .collect())
    }

    async fn produce_group_tasks(
        &self,
        cancel: &CancellationToken,
        group_by: GroupBy,
        ranked: &[ScoredGroup],
        tx: mpsc::Sender<SummaryTask<GroupKey>>,
    ) {
        for group in ranked {
            if cancel.is_cancelled() {
                return;
            }
            let name = &group.metrics.name;
            let insight_type = group.metrics.insight_type;
            let feedback = match self
                .store
                .representative_feedback(
                    group_by,
                    name,
                    insight_type,
                    self.config.max_feedbacks_per_group,
                )
                .await
            {
                Ok(items) => items,
                Err(e) => {
                    warn!(group = %name, insight_type = %insight_type, error = %format!("{e:#}"), "failed to load feedback for group");
                    continue;
                }
            };
            if feedback.is_empty() {
                continue;
            }

            let task = SummaryTask {
                key: (name.clone(), insight_type),
                insight_type,
                texts: feedback.into_iter().map(|f| f.content).collect(),
            };
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                sent = tx.send(task) => {
                    if sent.is_err() {
                        return;
                    }
                }
            }
        }
    }

    /// Start `summary_workers` tasks draining `tasks` into `results`.
    ///
    /// Workers exit when `tasks` closes. Failed narratives are logged and
    /// still produce a result so the caller can reconcile every key.
    pub(crate) fn spawn_summary_workers<K>(
        &self,
        cancel: &CancellationToken,
        tasks: mpsc::Receiver<SummaryTask<K>>,
        results: mpsc::Sender<SummaryResult<K>>,
    ) -> JoinSet<()>
    where
        K: std::fmt::Debug + Send + 'static,
    {
        let tasks = Arc::new(Mutex::new(tasks));
        let mut pool = JoinSet::new();
        for worker_id in 0..self.config.summary_workers.max(1) {
            let tasks = Arc::clone(&tasks);
            let results = results.clone();
            let summarizer = self.summarizer.clone();
            let cancel = cancel.clone();
            pool.spawn(async move {
                loop {
                    let task = tasks.lock().await.recv().await;
                    let Some(task) = task else { break };
                    debug!(worker_id, key = ?task.key, items = task.texts.len(), "summarizing group");

                    let outcome = summarizer
                        .summarize(&cancel, task.insight_type, &task.texts)
                        .await;
                    if let Some(err) = &outcome.error {
                        warn!(key = ?task.key, insight_type = %task.insight_type, error = %err, "failed to summarize group");
                    }
                    if results
                        .send(SummaryResult {
                            key: task.key,
                            outcome,
                        })
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            });
        }
        pool
    }

    /// Most frequent feedback texts in a LOB scope, per ranked insight type.
    pub async fn get_top_feedback(&self, scope: &TaxonomyScope) -> Result<FeedbackResponse> {
        if scope.lob.trim().is_empty() {
            bail!("lob is required");
        }

        let rows = self
            .store
            .feedback_scores(scope)
            .await
            .context("failed to query feedback")?;

        let mut response = FeedbackResponse {
            lob: scope.lob.clone(),
            category: scope.category.clone(),
            sub_category: scope.folder.clone(),
            ..FeedbackResponse::default()
        };

        for insight_type in InsightType::RANKED {
            let mut items: Vec<TopFeedbackItem> = rows
                .iter()
                .filter(|r| r.insight_type == insight_type)
                .map(|r| TopFeedbackItem {
                    feedback: r.content.clone(),
                    user_count: r.count,
                    score: weighted_feedback_score(r.count, r.avg_rating),
                    affinity_avg: r.avg_rating,
                })
                .collect();
            rank_descending(&mut items, |i| i.score);
            items.truncate(self.config.top_feedback_limit);

            match insight_type {
                InsightType::FeatureRequest => response.feature_requests = items,
                InsightType::Improvement => response.improvements = items,
                InsightType::Complaint => response.complaints = items,
                InsightType::Other => {}
            }
        }
        Ok(response)
    }
}

pub(crate) async fn collect_summaries<K: Eq + Hash>(
    mut results: mpsc::Receiver<SummaryResult<K>>,
) -> HashMap<K, SummaryOutcome> {
    let mut out = HashMap::new();
    while let Some(result) = results.recv().await {
        out.insert(result.key, result.outcome);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(name: &str, insight_type: InsightType, count: u64) -> GroupMetrics {
        GroupMetrics {
            name: name.to_string(),
            insight_type,
            count,
            unique_count: count,
            avg_rating: 1.0,
            recency_score: 1.0,
        }
    }

    #[test]
    fn test_rank_groups_ties_keep_insertion_order() {
        let input = vec![
            metrics("a", InsightType::Complaint, 10),
            metrics("b", InsightType::Complaint, 30),
            metrics("c", InsightType::Complaint, 30),
            metrics("d", InsightType::Complaint, 5),
        ];
        let ranked = rank_groups(input, 15);
        let names: Vec<_> = ranked.iter().map(|g| g.metrics.name.as_str()).collect();
        assert_eq!(names, vec!["b", "c", "a", "d"]);
        assert_eq!(ranked[0].score, 30.0);
    }

    #[test]
    fn test_rank_groups_truncates_per_type() {
        let mut input = Vec::new();
        for i in 0..20 {
            input.push(metrics(&format!("f{i}"), InsightType::FeatureRequest, i + 1));
            input.push(metrics(&format!("c{i}"), InsightType::Complaint, i + 1));
        }
        input.push(metrics("o", InsightType::Other, 100));

        let ranked = rank_groups(input, 15);
        assert_eq!(ranked.len(), 30);
        assert_eq!(ranked[0].metrics.name, "f19");
        assert_eq!(ranked[15].metrics.name, "c19");
        assert!(ranked.iter().all(|g| g.metrics.insight_type != InsightType::Other));
    }

    #[test]
    fn test_composite_score_uses_recency() {
        let mut m = metrics("Payments", InsightType::Complaint, 5);
        m.avg_rating = 2.0;
        m.recency_score = 7.5;
        let ranked = rank_groups(vec![m], 15);
        assert_eq!(ranked[0].score, 75.0);
    }

    #[test]
    fn test_response_slots() {
        let r = InsightsResponse::default();
        assert!(r.for_type(InsightType::Other).is_none());
        assert!(r.for_type(InsightType::Complaint).is_some());
        assert_eq!(r.groups().count(), 0);
    }
}
