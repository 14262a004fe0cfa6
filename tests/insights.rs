//! Aggregation, top-feedback, and report tests over the in-memory store.

mod common;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use feedback_insights::error::CompletionError;
use feedback_insights::services::Services;
use feedback_insights_core::models::{
    Classification, ClassifiedFeedback, FeedbackItem, GroupBy, InsightType, TaxonomyNode,
    TaxonomyScope,
};
use feedback_insights_core::store::memory::InMemoryStore;
use feedback_insights_core::store::{FeedbackScoreRow, FeedbackStore, GroupMetrics};

use common::*;

async fn seed(
    store: &InMemoryStore,
    id: i64,
    author: &str,
    content: &str,
    rating: Option<f32>,
    posted_at: DateTime<Utc>,
    insight_type: InsightType,
    node: &TaxonomyNode,
) {
    store
        .insert_feedback(&feedback(id, author, content, rating, posted_at))
        .await
        .unwrap();
    store
        .replace_classification(&Classification::new(id, insight_type, node, 0.9, Some(0.1)))
        .await
        .unwrap();
}

fn services(store: Arc<dyn FeedbackStore>, completion: Arc<ScriptedCompletion>) -> Services {
    Services::build(
        store,
        Arc::new(InMemoryStore::new()),
        Arc::new(KeywordEmbedding),
        completion,
        &test_config(),
    )
}

#[tokio::test(start_paused = true)]
async fn test_failed_summary_keeps_group() {
    let now = Utc::now();
    let store = Arc::new(InMemoryStore::new());
    let node = payments_node();
    for id in 1..=5 {
        seed(&store, id, &format!("u{id}"), "Checkout broken", Some(1.0), now, InsightType::Complaint, &node).await;
    }

    let completion = ScriptedCompletion::new(|_| Err(server_error()));
    let svc = services(store.clone(), completion.clone());

    let insights = svc
        .aggregator
        .aggregate_at(&CancellationToken::new(), now)
        .await
        .unwrap();
    assert_eq!(insights.complaints.top_lobs.len(), 1);
    let group = &insights.complaints.top_lobs[0];
    assert_eq!(group.name, "Payments");
    assert!(group.summary.is_empty());
    // 5 × 1.0 × (5 × 2.0)
    assert!((group.impact_score - 50.0).abs() < 1e-9);
    assert_eq!(insights.complaints.top_categories.len(), 1);
    // two groups, three attempts each
    assert_eq!(completion.calls(), 6);
}

#[tokio::test]
async fn test_min_support_differs_per_dimension() {
    let now = Utc::now();
    let store = Arc::new(InMemoryStore::new());
    let node = payments_node();
    for id in 1..=4 {
        seed(&store, id, "u", "Add dark mode", None, now, InsightType::FeatureRequest, &node).await;
    }
    seed(&store, 5, "u", "Whatever", None, now, InsightType::Other, &node).await;

    let svc = services(store.clone(), labelling("other"));
    let insights = svc
        .aggregator
        .aggregate_at(&CancellationToken::new(), now)
        .await
        .unwrap();

    let features = &insights.feature_requests;
    assert!(features.top_lobs.is_empty());
    assert_eq!(features.top_categories.len(), 1);
    assert_eq!(features.top_categories[0].unique_count, 1);
    assert_eq!(
        features.top_categories[0].summary.requested_features,
        vec!["Dark mode".to_string(), "Split bills".to_string()]
    );
    assert!(insights.groups().all(|g| g.insight_type != InsightType::Other));
}

#[tokio::test]
async fn test_groups_ranked_by_composite_score() {
    let now = Utc::now();
    let store = Arc::new(InMemoryStore::new());
    let payments = payments_node();
    let rewards = rewards_node();
    let mut id = 0;
    // Rewards: fewer items but all recent; Payments: more items, all old.
    for _ in 0..6 {
        id += 1;
        seed(&store, id, "a", "Old bill issue", Some(2.0), days_ago(now, 120), InsightType::Complaint, &payments).await;
    }
    for _ in 0..5 {
        id += 1;
        seed(&store, id, "b", "Cashback missing", Some(2.0), days_ago(now, 1), InsightType::Complaint, &rewards).await;
    }

    let svc = services(store.clone(), labelling("other"));
    let insights = svc
        .aggregator
        .aggregate_at(&CancellationToken::new(), now)
        .await
        .unwrap();

    let names: Vec<&str> = insights
        .complaints
        .top_lobs
        .iter()
        .map(|g| g.name.as_str())
        .collect();
    // Rewards 5 × 2 × 10 = 100, Payments 6 × 2 × 6 = 72
    assert_eq!(names, vec!["Rewards", "Payments"]);
    assert!((insights.complaints.top_lobs[0].impact_score - 100.0).abs() < 1e-9);
}

/// Delegates to an in-memory store but fails category metrics.
struct FailingCategoryMetrics(InMemoryStore);

#[async_trait]
impl FeedbackStore for FailingCategoryMetrics {
    async fn insert_feedback(&self, item: &FeedbackItem) -> Result<()> {
        self.0.insert_feedback(item).await
    }
    async fn get_feedback(&self, id: i64) -> Result<Option<FeedbackItem>> {
        self.0.get_feedback(id).await
    }
    async fn count_unclassified(&self) -> Result<u64> {
        self.0.count_unclassified().await
    }
    async fn fetch_unclassified(&self, after_id: Option<i64>, limit: usize) -> Result<Vec<FeedbackItem>> {
        self.0.fetch_unclassified(after_id, limit).await
    }
    async fn replace_classification(&self, classification: &Classification) -> Result<()> {
        self.0.replace_classification(classification).await
    }
    async fn classifications_for(&self, feedback_id: i64) -> Result<Vec<Classification>> {
        self.0.classifications_for(feedback_id).await
    }
    async fn group_metrics(
        &self,
        group_by: GroupBy,
        min_support: u64,
        now: DateTime<Utc>,
    ) -> Result<Vec<GroupMetrics>> {
        if group_by == GroupBy::Category {
            bail!("database is locked");
        }
        self.0.group_metrics(group_by, min_support, now).await
    }
    async fn representative_feedback(
        &self,
        group_by: GroupBy,
        name: &str,
        insight_type: InsightType,
        limit: usize,
    ) -> Result<Vec<FeedbackItem>> {
        self.0
            .representative_feedback(group_by, name, insight_type, limit)
            .await
    }
    async fn feedback_scores(&self, scope: &TaxonomyScope) -> Result<Vec<FeedbackScoreRow>> {
        self.0.feedback_scores(scope).await
    }
    async fn classified_feedback(&self, scope: &TaxonomyScope) -> Result<Vec<ClassifiedFeedback>> {
        self.0.classified_feedback(scope).await
    }
}

#[tokio::test]
async fn test_dimension_failure_fails_aggregation() {
    let now = Utc::now();
    let inner = InMemoryStore::new();
    for id in 1..=5 {
        seed(&inner, id, "u", "Checkout broken", Some(1.0), now, InsightType::Complaint, &payments_node()).await;
    }
    let svc = services(Arc::new(FailingCategoryMetrics(inner)), labelling("other"));

    let err = svc
        .aggregator
        .aggregate_at(&CancellationToken::new(), now)
        .await
        .unwrap_err();
    let msg = format!("{err:#}");
    assert!(msg.contains("failed to aggregate category insights"), "{msg}");
    assert!(msg.contains("database is locked"), "{msg}");
}

#[tokio::test]
async fn test_cancelled_aggregation_is_an_error() {
    let now = Utc::now();
    let store = Arc::new(InMemoryStore::new());
    for id in 1..=5 {
        seed(&store, id, "u", "Checkout broken", Some(1.0), now, InsightType::Complaint, &payments_node()).await;
    }
    let completion = labelling("other");
    let svc = services(store.clone(), completion.clone());

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = svc.aggregator.aggregate_at(&cancel, now).await.unwrap_err();
    assert!(format!("{err:#}").contains("cancelled"));
    assert!(err
        .chain()
        .any(|c| matches!(c.downcast_ref::<CompletionError>(), Some(CompletionError::Cancelled))));
    assert_eq!(completion.calls(), 0);
}

#[tokio::test]
async fn test_top_feedback_weighted_by_rating() {
    let now = Utc::now();
    let store = Arc::new(InMemoryStore::new());
    let node = payments_node();
    for id in 1..=3 {
        seed(&store, id, &format!("u{id}"), "Crash on pay", Some(1.0), now, InsightType::Complaint, &node).await;
    }
    seed(&store, 4, "u4", "Slow bills page", Some(5.0), now, InsightType::Complaint, &node).await;
    seed(&store, 5, "u5", "Export to CSV", None, now, InsightType::FeatureRequest, &node).await;
    seed(&store, 6, "u6", "Cashback late", Some(1.0), now, InsightType::Complaint, &rewards_node()).await;

    let svc = services(store.clone(), labelling("other"));
    let top = svc
        .aggregator
        .get_top_feedback(&TaxonomyScope::new("Payments", None, None))
        .await
        .unwrap();

    assert_eq!(top.lob, "Payments");
    let complaints: Vec<(&str, u64)> = top
        .complaints
        .iter()
        .map(|i| (i.feedback.as_str(), i.user_count))
        .collect();
    assert_eq!(complaints, vec![("Slow bills page", 1), ("Crash on pay", 3)]);
    assert!((top.complaints[1].score - 3.0).abs() < 1e-9);
    assert_eq!(top.feature_requests.len(), 1);
    assert!((top.feature_requests[0].affinity_avg - 3.0).abs() < 1e-9);
    assert!(top.improvements.is_empty());
}

#[tokio::test]
async fn test_top_feedback_requires_lob() {
    let store = Arc::new(InMemoryStore::new());
    let svc = services(store, labelling("other"));
    let err = svc
        .aggregator
        .get_top_feedback(&TaxonomyScope::new("  ", None, None))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("lob is required"));
}

#[tokio::test]
async fn test_generate_report() {
    let now = Utc::now();
    let store = Arc::new(InMemoryStore::new());
    let node = payments_node();
    for id in 1..=4 {
        seed(&store, id, &format!("u{id}"), &format!("Bill payment failed #{id}"), Some(1.0), days_ago(now, 2), InsightType::Complaint, &node).await;
    }
    seed(&store, 5, "u5", "Add dark mode", Some(4.0), days_ago(now, 60), InsightType::FeatureRequest, &node).await;
    seed(&store, 6, "u6", "Hello", None, now, InsightType::Other, &node).await;
    seed(&store, 7, "u7", "Cashback late", Some(1.0), now, InsightType::Complaint, &rewards_node()).await;

    let svc = services(store.clone(), labelling("other"));
    let report = svc
        .aggregator
        .generate_report(
            &CancellationToken::new(),
            &TaxonomyScope::new("Payments", Some("Bills".into()), None),
            now,
        )
        .await
        .unwrap();

    assert_eq!(report.lob, "Payments");
    assert_eq!(report.category.as_deref(), Some("Bills"));
    assert!(!report.insights.contains_key(&InsightType::Other));

    let complaints = &report.insights[&InsightType::Complaint];
    assert_eq!(complaints.len(), 1);
    assert_eq!(complaints[0].feedback_count, 4);
    assert_eq!(complaints[0].examples.len(), 3);
    assert_eq!(
        complaints[0].summary,
        "Users cannot pay their bills. Checkout fails often."
    );
    // one-star, recent: (6 - 1) / 5 × 1.5
    assert!((complaints[0].impact_score - 1.5).abs() < 1e-9);

    let features = &report.insights[&InsightType::FeatureRequest];
    assert_eq!(features[0].summary, "");
    assert_eq!(features[0].action_items, vec!["Dark mode", "Split bills"]);
    assert_eq!(features[0].examples, vec!["Add dark mode"]);

    assert_eq!(report.metrics.total_feedback, 6);
    assert!((report.metrics.avg_rating - 1.6).abs() < 1e-9);
    assert!(report.metrics.impact_breakdown.contains_key(&InsightType::Other));
    assert_eq!(report.metrics.top_categories, vec!["Payments > Bills"]);
    assert_eq!(report.metrics.trending_issues, vec!["Payments > Bills (5 recent)"]);
}

#[tokio::test]
async fn test_report_batches_by_group_size() {
    let now = Utc::now();
    let store = Arc::new(InMemoryStore::new());
    for id in 1..=25 {
        seed(&store, id, "u", "Needs split bills", None, now, InsightType::Improvement, &payments_node()).await;
    }
    let svc = services(store.clone(), labelling("other"));
    let report = svc
        .aggregator
        .generate_report(
            &CancellationToken::new(),
            &TaxonomyScope::new("Payments", None, None),
            now,
        )
        .await
        .unwrap();

    let counts: Vec<usize> = report.insights[&InsightType::Improvement]
        .iter()
        .map(|i| i.feedback_count)
        .collect();
    assert_eq!(counts, vec![10, 10, 5]);
}
