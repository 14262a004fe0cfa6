//! In-memory [`FeedbackStore`] and [`VectorIndex`] implementation.
//!
//! Feedback and classifications share one `std::sync::RwLock` so that
//! [`replace_classification`](FeedbackStore::replace_classification) is a
//! single critical section. Nearest-neighbour search is brute-force cosine
//! distance over every node.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::embedding::cosine_distance;
use crate::models::{
    Classification, ClassifiedFeedback, FeedbackItem, GroupBy, InsightType, TaxonomyNode,
    TaxonomyScope,
};
use crate::scoring::{aggregation_recency_weight, DEFAULT_RATING};

use super::{FeedbackScoreRow, FeedbackStore, GroupMetrics, VectorIndex};

struct FeedbackRow {
    item: FeedbackItem,
    classified: bool,
}

#[derive(Default)]
struct State {
    feedback: BTreeMap<i64, FeedbackRow>,
    /// The live classification per feedback id.
    classifications: HashMap<i64, Classification>,
}

impl State {
    /// Classified items in id order, paired with their live classification.
    fn joined(&self) -> impl Iterator<Item = (&FeedbackItem, &Classification)> {
        self.feedback.values().filter_map(move |row| {
            self.classifications
                .get(&row.item.id)
                .map(|c| (&row.item, c))
        })
    }
}

/// In-memory store for tests and dry runs.
pub struct InMemoryStore {
    state: RwLock<State>,
    nodes: RwLock<Vec<TaxonomyNode>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
            nodes: RwLock::new(Vec::new()),
        }
    }

    fn read_state(&self) -> Result<RwLockReadGuard<'_, State>> {
        self.state.read().map_err(|_| anyhow!("feedback state lock poisoned"))
    }

    fn write_state(&self) -> Result<RwLockWriteGuard<'_, State>> {
        self.state.write().map_err(|_| anyhow!("feedback state lock poisoned"))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default)]
struct GroupAcc {
    count: u64,
    authors: HashSet<String>,
    rating_sum: f64,
    recency_score: f64,
}

#[async_trait]
impl FeedbackStore for InMemoryStore {
    async fn insert_feedback(&self, item: &FeedbackItem) -> Result<()> {
        let mut state = self.write_state()?;
        let classified = state.feedback.get(&item.id).is_some_and(|r| r.classified);
        state.feedback.insert(
            item.id,
            FeedbackRow {
                item: item.clone(),
                classified,
            },
        );
        Ok(())
    }

    async fn get_feedback(&self, id: i64) -> Result<Option<FeedbackItem>> {
        let state = self.read_state()?;
        Ok(state.feedback.get(&id).map(|r| r.item.clone()))
    }

    async fn count_unclassified(&self) -> Result<u64> {
        let state = self.read_state()?;
        Ok(state.feedback.values().filter(|r| !r.classified).count() as u64)
    }

    async fn fetch_unclassified(
        &self,
        after_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<FeedbackItem>> {
        let state = self.read_state()?;
        let start = after_id.map_or(i64::MIN, |id| id.saturating_add(1));
        Ok(state
            .feedback
            .range(start..)
            .map(|(_, row)| row)
            .filter(|row| !row.classified)
            .take(limit)
            .map(|row| row.item.clone())
            .collect())
    }

    async fn replace_classification(&self, classification: &Classification) -> Result<()> {
        let mut state = self.write_state()?;
        let row = state
            .feedback
            .get_mut(&classification.feedback_id)
            .ok_or_else(|| anyhow!("feedback {} not found", classification.feedback_id))?;
        row.classified = true;
        state
            .classifications
            .insert(classification.feedback_id, classification.clone());
        Ok(())
    }

    async fn classifications_for(&self, feedback_id: i64) -> Result<Vec<Classification>> {
        let state = self.read_state()?;
        Ok(state
            .classifications
            .get(&feedback_id)
            .cloned()
            .into_iter()
            .collect())
    }

    async fn group_metrics(
        &self,
        group_by: GroupBy,
        min_support: u64,
        now: DateTime<Utc>,
    ) -> Result<Vec<GroupMetrics>> {
        let state = self.read_state()?;
        let mut order: Vec<(String, InsightType)> = Vec::new();
        let mut groups: HashMap<(String, InsightType), GroupAcc> = HashMap::new();

        for (item, c) in state.joined() {
            let name = group_by.key(c);
            if name.is_empty() || !c.insight_type.is_ranked() {
                continue;
            }
            let key = (name.to_string(), c.insight_type);
            let acc = groups.entry(key.clone()).or_insert_with(|| {
                order.push(key);
                GroupAcc::default()
            });
            acc.count += 1;
            acc.authors.insert(item.author.clone());
            acc.rating_sum += item.rating.map_or(DEFAULT_RATING, f64::from);
            acc.recency_score += aggregation_recency_weight(item.days_since_posted(now));
        }

        Ok(order
            .into_iter()
            .filter_map(|key| {
                let acc = groups.remove(&key)?;
                (acc.count >= min_support).then(|| GroupMetrics {
                    name: key.0,
                    insight_type: key.1,
                    count: acc.count,
                    unique_count: acc.authors.len() as u64,
                    avg_rating: acc.rating_sum / acc.count as f64,
                    recency_score: acc.recency_score,
                })
            })
            .collect())
    }

    async fn representative_feedback(
        &self,
        group_by: GroupBy,
        name: &str,
        insight_type: InsightType,
        limit: usize,
    ) -> Result<Vec<FeedbackItem>> {
        let state = self.read_state()?;
        let mut items: Vec<FeedbackItem> = state
            .joined()
            .filter(|(_, c)| c.insight_type == insight_type && group_by.key(c) == name)
            .map(|(item, _)| item.clone())
            .collect();

        items.sort_by(|a, b| {
            let by_rating = match (a.rating, b.rating) {
                (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(std::cmp::Ordering::Equal),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            };
            by_rating.then_with(|| b.posted_at.cmp(&a.posted_at))
        });
        items.truncate(limit);
        Ok(items)
    }

    async fn feedback_scores(&self, scope: &TaxonomyScope) -> Result<Vec<FeedbackScoreRow>> {
        let state = self.read_state()?;
        let mut rows: Vec<(FeedbackScoreRow, f64)> = Vec::new();
        let mut index: HashMap<(String, InsightType), usize> = HashMap::new();

        for (item, c) in state.joined().filter(|(_, c)| scope.contains(c)) {
            let key = (item.content.clone(), c.insight_type);
            let rating = item.rating.map_or(DEFAULT_RATING, f64::from);
            match index.get(&key) {
                Some(&i) => {
                    rows[i].0.count += 1;
                    rows[i].1 += rating;
                }
                None => {
                    index.insert(key, rows.len());
                    rows.push((
                        FeedbackScoreRow {
                            content: item.content.clone(),
                            insight_type: c.insight_type,
                            count: 1,
                            avg_rating: 0.0,
                        },
                        rating,
                    ));
                }
            }
        }

        Ok(rows
            .into_iter()
            .map(|(mut row, sum)| {
                row.avg_rating = sum / row.count as f64;
                row
            })
            .collect())
    }

    async fn classified_feedback(&self, scope: &TaxonomyScope) -> Result<Vec<ClassifiedFeedback>> {
        let state = self.read_state()?;
        Ok(state
            .joined()
            .filter(|(_, c)| scope.contains(c))
            .map(|(item, c)| ClassifiedFeedback {
                feedback: item.clone(),
                classification: c.clone(),
            })
            .collect())
    }
}

#[async_trait]
impl VectorIndex for InMemoryStore {
    async fn add_node(&self, node: &TaxonomyNode) -> Result<()> {
        let mut nodes = self
            .nodes
            .write()
            .map_err(|_| anyhow!("taxonomy lock poisoned"))?;
        nodes.push(node.clone());
        Ok(())
    }

    async fn nearest_neighbors(&self, vector: &[f32], k: usize) -> Result<Vec<(TaxonomyNode, f32)>> {
        let nodes = self
            .nodes
            .read()
            .map_err(|_| anyhow!("taxonomy lock poisoned"))?;
        let mut scored: Vec<(TaxonomyNode, f32)> = nodes
            .iter()
            .map(|n| (n.clone(), cosine_distance(vector, &n.embedding)))
            .collect();
        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    async fn nearest_valid(&self, vector: &[f32]) -> Result<Option<(TaxonomyNode, f32)>> {
        let nodes = self
            .nodes
            .read()
            .map_err(|_| anyhow!("taxonomy lock poisoned"))?;
        Ok(nodes
            .iter()
            .filter(|n| n.is_valid_target())
            .map(|n| (n, cosine_distance(vector, &n.embedding)))
            .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(n, d)| (n.clone(), d)))
    }

    async fn node_count(&self) -> Result<u64> {
        let nodes = self
            .nodes
            .read()
            .map_err(|_| anyhow!("taxonomy lock poisoned"))?;
        Ok(nodes.len() as u64)
    }
}
