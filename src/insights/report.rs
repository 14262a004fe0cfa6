//! Scoped insight reports for one LOB, optionally narrowed to a category
//! and folder.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use feedback_insights_core::models::{ClassifiedFeedback, InsightType, TaxonomyScope};
use feedback_insights_core::scoring::{batch_impact_score, rank_descending, ImpactInput, DEFAULT_RATING};

use super::{collect_summaries, InsightAggregator, SummaryTask};

const TOP_CATEGORY_LIMIT: usize = 5;
const TRENDING_LIMIT: usize = 5;
const EXAMPLE_LIMIT: usize = 3;

/// One summarized batch of feedback.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Insight {
    pub summary: String,
    pub action_items: Vec<String>,
    pub impact_score: f64,
    pub feedback_count: usize,
    pub examples: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSummary {
    pub total_feedback: usize,
    /// Mean over rated items only; 0 when nothing is rated.
    pub avg_rating: f64,
    pub trending_issues: Vec<String>,
    /// "LOB > Category" keys by summed per-item impact.
    pub top_categories: Vec<String>,
    pub impact_breakdown: BTreeMap<InsightType, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InsightReport {
    pub lob: String,
    pub category: Option<String>,
    pub folder: Option<String>,
    pub insights: BTreeMap<InsightType, Vec<Insight>>,
    pub metrics: MetricsSummary,
}

fn impact_input(item: &ClassifiedFeedback, now: DateTime<Utc>) -> ImpactInput {
    ImpactInput {
        rating: item.feedback.rating,
        days_since_posted: item.feedback.days_since_posted(now),
    }
}

fn item_impact(item: &ClassifiedFeedback, now: DateTime<Utc>) -> f64 {
    batch_impact_score(&[impact_input(item, now)])
}

fn group_impact(items: &[ClassifiedFeedback], now: DateTime<Utc>) -> f64 {
    let inputs: Vec<_> = items.iter().map(|i| impact_input(i, now)).collect();
    batch_impact_score(&inputs)
}

fn taxonomy_key(item: &ClassifiedFeedback) -> String {
    format!(
        "{} > {}",
        item.classification.lob, item.classification.category
    )
}

/// Highest, median, and lowest impact items; every item when there are
/// three or fewer.
pub fn representative_examples(batch: &[ClassifiedFeedback], now: DateTime<Utc>) -> Vec<String> {
    if batch.len() <= EXAMPLE_LIMIT {
        return batch.iter().map(|i| i.feedback.content.clone()).collect();
    }
    let mut scored: Vec<(&ClassifiedFeedback, f64)> =
        batch.iter().map(|i| (i, item_impact(i, now))).collect();
    rank_descending(&mut scored, |(_, s)| *s);
    [0, scored.len() / 2, scored.len() - 1]
        .iter()
        .map(|&idx| scored[idx].0.feedback.content.clone())
        .collect()
}

/// Sum per-item impact by "LOB > Category" and keep the highest keys.
pub fn top_categories(items: &[ClassifiedFeedback], now: DateTime<Utc>) -> Vec<String> {
    let mut order: Vec<String> = Vec::new();
    let mut totals: HashMap<String, f64> = HashMap::new();
    for item in items {
        let key = taxonomy_key(item);
        if !totals.contains_key(&key) {
            order.push(key.clone());
        }
        *totals.entry(key).or_insert(0.0) += item_impact(item, now);
    }
    let mut scored: Vec<(String, f64)> = order
        .into_iter()
        .map(|k| {
            let score = totals.get(&k).copied().unwrap_or_default();
            (k, score)
        })
        .collect();
    rank_descending(&mut scored, |(_, s)| *s);
    scored
        .into_iter()
        .take(TOP_CATEGORY_LIMIT)
        .map(|(k, _)| k)
        .collect()
}

/// "LOB > Category" keys with the most recent, poorly rated volume.
///
/// Score is `count × avg_rating × (1 + posted within 30 days)`, unrated
/// items counting as the default rating.
pub fn trending_issues(items: &[ClassifiedFeedback], now: DateTime<Utc>) -> Vec<String> {
    #[derive(Default)]
    struct Trend {
        count: u64,
        rating_sum: f64,
        recent: u64,
    }

    let mut order: Vec<String> = Vec::new();
    let mut trends: HashMap<String, Trend> = HashMap::new();
    for item in items {
        let key = taxonomy_key(item);
        if !trends.contains_key(&key) {
            order.push(key.clone());
        }
        let t = trends.entry(key).or_default();
        t.count += 1;
        t.rating_sum += item
            .feedback
            .rating
            .filter(|r| *r > 0.0)
            .map(f64::from)
            .unwrap_or(DEFAULT_RATING);
        if item.feedback.days_since_posted(now) <= 30.0 {
            t.recent += 1;
        }
    }

    let mut scored: Vec<(String, u64, f64)> = order
        .into_iter()
        .filter_map(|k| {
            let t = trends.get(&k)?;
            let avg = t.rating_sum / t.count as f64;
            let score = t.count as f64 * avg * (1 + t.recent) as f64;
            Some((k, t.recent, score))
        })
        .collect();
    rank_descending(&mut scored, |(_, _, s)| *s);
    scored
        .into_iter()
        .take(TRENDING_LIMIT)
        .map(|(k, recent, _)| format!("{k} ({recent} recent)"))
        .collect()
}

pub fn metrics_summary(
    groups: &BTreeMap<InsightType, Vec<ClassifiedFeedback>>,
    all: &[ClassifiedFeedback],
    now: DateTime<Utc>,
) -> MetricsSummary {
    let mut metrics = MetricsSummary {
        total_feedback: all.len(),
        ..MetricsSummary::default()
    };

    for (insight_type, items) in groups {
        metrics
            .impact_breakdown
            .insert(*insight_type, group_impact(items, now));
    }

    let rated: Vec<f64> = all
        .iter()
        .filter_map(|i| i.feedback.rating.filter(|r| *r > 0.0))
        .map(f64::from)
        .collect();
    if !rated.is_empty() {
        metrics.avg_rating = rated.iter().sum::<f64>() / rated.len() as f64;
    }

    metrics.trending_issues = trending_issues(all, now);
    metrics.top_categories = top_categories(all, now);
    metrics
}

type BatchKey = (InsightType, usize);

impl InsightAggregator {
    /// Summarize every classified item in `scope`, batched per insight type.
    ///
    /// Batches go through the same bounded summary pool as aggregation; a
    /// failed narrative leaves that batch's summary empty.
    pub async fn generate_report(
        &self,
        cancel: &CancellationToken,
        scope: &TaxonomyScope,
        now: DateTime<Utc>,
    ) -> Result<InsightReport> {
        let all = self
            .store
            .classified_feedback(scope)
            .await
            .context("failed to query feedback")?;

        let mut groups: BTreeMap<InsightType, Vec<ClassifiedFeedback>> = BTreeMap::new();
        for item in &all {
            groups
                .entry(item.classification.insight_type)
                .or_default()
                .push(item.clone());
        }

        let batch_size = self.config.max_feedbacks_per_group.max(1);
        let mut batches: Vec<(BatchKey, &[ClassifiedFeedback])> = Vec::new();
        for (insight_type, items) in groups.iter().filter(|(t, _)| t.is_ranked()) {
            for (idx, chunk) in items.chunks(batch_size).enumerate() {
                batches.push(((*insight_type, idx), chunk));
            }
        }
        info!(lob = %scope.lob, items = all.len(), batches = batches.len(), "generating insight report");

        let workers = self.config.summary_workers.max(1);
        let (task_tx, task_rx) = mpsc::channel::<SummaryTask<BatchKey>>(workers);
        let (result_tx, result_rx) = mpsc::channel(workers);
        let mut pool = self.spawn_summary_workers(cancel, task_rx, result_tx);

        let tasks: Vec<SummaryTask<BatchKey>> = batches
            .iter()
            .map(|(key, chunk)| SummaryTask {
                key: *key,
                insight_type: key.0,
                texts: chunk.iter().map(|i| i.feedback.content.clone()).collect(),
            })
            .collect();
        let produce = async move {
            for task in tasks {
                if cancel.is_cancelled() || task_tx.send(task).await.is_err() {
                    return;
                }
            }
        };
        let (_, mut summaries) = tokio::join!(produce, collect_summaries(result_rx));

        while let Some(joined) = pool.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "summary worker failed");
            }
        }

        let mut insights: BTreeMap<InsightType, Vec<Insight>> = BTreeMap::new();
        for (key, chunk) in &batches {
            let summary = summaries
                .remove(key)
                .map(|o| o.summary)
                .unwrap_or_default();
            insights.entry(key.0).or_default().push(Insight {
                summary: summary.narrative(key.0).to_string(),
                action_items: summary.requested_features,
                impact_score: group_impact(chunk, now),
                feedback_count: chunk.len(),
                examples: representative_examples(chunk, now),
            });
        }

        Ok(InsightReport {
            lob: scope.lob.clone(),
            category: scope.category.clone(),
            folder: scope.folder.clone(),
            metrics: metrics_summary(&groups, &all, now),
            insights,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use feedback_insights_core::models::{
        Classification, FeedbackItem, FeedbackSource, TaxonomyNode,
    };

    fn item(
        id: i64,
        rating: Option<f32>,
        days_ago: i64,
        category: &str,
        now: DateTime<Utc>,
    ) -> ClassifiedFeedback {
        let node = TaxonomyNode::new("Payments", category, "F", "T", vec![]);
        ClassifiedFeedback {
            feedback: FeedbackItem {
                id,
                source: FeedbackSource::AppStore,
                author: format!("u{id}"),
                content: format!("feedback {id}"),
                rating,
                posted_at: now - Duration::days(days_ago),
            },
            classification: Classification::new(id, InsightType::Complaint, &node, 0.9, Some(0.1)),
        }
    }

    #[test]
    fn test_examples_small_batch_returns_all() {
        let now = Utc::now();
        let batch = vec![item(1, Some(1.0), 1, "Bills", now), item(2, None, 1, "Bills", now)];
        assert_eq!(
            representative_examples(&batch, now),
            vec!["feedback 1", "feedback 2"]
        );
    }

    #[test]
    fn test_examples_pick_high_median_low() {
        let now = Utc::now();
        let batch = vec![
            item(1, Some(5.0), 100, "Bills", now), // 0.2
            item(2, Some(1.0), 1, "Bills", now),   // 1.5
            item(3, Some(3.0), 100, "Bills", now), // 0.6
            item(4, Some(2.0), 100, "Bills", now), // 0.8
            item(5, Some(4.0), 100, "Bills", now), // 0.4
        ];
        assert_eq!(
            representative_examples(&batch, now),
            vec!["feedback 2", "feedback 3", "feedback 1"]
        );
    }

    #[test]
    fn test_top_categories_by_summed_impact() {
        let now = Utc::now();
        let items = vec![
            item(1, Some(5.0), 100, "Cards", now),
            item(2, Some(1.0), 100, "Bills", now),
            item(3, Some(1.0), 100, "Bills", now),
        ];
        assert_eq!(
            top_categories(&items, now),
            vec!["Payments > Bills", "Payments > Cards"]
        );
    }

    #[test]
    fn test_metrics_summary() {
        let now = Utc::now();
        let all = vec![
            item(1, Some(1.0), 1, "Bills", now),
            item(2, Some(3.0), 1, "Bills", now),
            item(3, None, 1, "Cards", now),
        ];
        let mut groups = BTreeMap::new();
        groups.insert(InsightType::Complaint, all.clone());

        let m = metrics_summary(&groups, &all, now);
        assert_eq!(m.total_feedback, 3);
        assert!((m.avg_rating - 2.0).abs() < 1e-9);
        assert!(m.impact_breakdown.contains_key(&InsightType::Complaint));
        assert_eq!(m.trending_issues[0], "Payments > Bills (2 recent)");
    }
}
