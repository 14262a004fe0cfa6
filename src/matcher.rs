//! Maps feedback text to the nearest taxonomy node.
//!
//! The matcher never reports "no match". It walks a fallback ladder:
//!
//! 1. the single nearest node, if its distance is below the threshold and
//!    it is a valid target;
//! 2. otherwise the nearest valid node over the whole index, regardless
//!    of distance;
//! 3. otherwise the sentinel `Uncategorized / General / Other`.
//!
//! Embedding failures degrade to a zero vector. Errors from the vector
//! index itself are propagated.

use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use feedback_insights_core::embedding::zero_vector;
use feedback_insights_core::models::TaxonomyNode;
use feedback_insights_core::store::VectorIndex;

use crate::config::MatchingConfig;
use crate::embedding::EmbeddingClient;

/// Which rung of the fallback ladder produced the match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchKind {
    Confident,
    Nearest,
    Sentinel,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaxonomyMatch {
    pub node: TaxonomyNode,
    /// Cosine distance to `node`. `None` for the sentinel.
    pub distance: Option<f32>,
    pub kind: MatchKind,
    /// The query vector was a zero vector because embedding failed.
    pub embedding_degraded: bool,
}

impl TaxonomyMatch {
    fn sentinel(embedding_degraded: bool) -> Self {
        Self {
            node: TaxonomyNode::sentinel(),
            distance: None,
            kind: MatchKind::Sentinel,
            embedding_degraded,
        }
    }

    /// `1 - distance`, clamped to `[0, 1]`. The sentinel scores `0`.
    pub fn confidence(&self) -> f32 {
        self.distance.map_or(0.0, |d| (1.0 - d).clamp(0.0, 1.0))
    }
}

pub struct TaxonomyMatcher {
    embedder: Arc<dyn EmbeddingClient>,
    index: Arc<dyn VectorIndex>,
    threshold: f32,
}

impl TaxonomyMatcher {
    pub fn new(
        embedder: Arc<dyn EmbeddingClient>,
        index: Arc<dyn VectorIndex>,
        config: &MatchingConfig,
    ) -> Self {
        Self {
            embedder,
            index,
            threshold: config.threshold,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub async fn match_text(&self, text: &str) -> Result<TaxonomyMatch> {
        let (vector, degraded) = match self.embedder.embed(text).await {
            Ok(v) => (v, false),
            Err(e) => {
                warn!(error = %e, "embedding failed, matching with zero vector");
                (zero_vector(self.embedder.dims()), true)
            }
        };

        let nearest = self
            .index
            .nearest_neighbors(&vector, 1)
            .await
            .context("taxonomy nearest-neighbour query failed")?;

        let Some((node, distance)) = nearest.into_iter().next() else {
            warn!("taxonomy index is empty, using sentinel");
            return Ok(TaxonomyMatch::sentinel(degraded));
        };

        if distance < self.threshold && node.is_valid_target() {
            debug!(lob = %node.lob, category = %node.category, distance, "confident taxonomy match");
            return Ok(TaxonomyMatch {
                node,
                distance: Some(distance),
                kind: MatchKind::Confident,
                embedding_degraded: degraded,
            });
        }

        let fallback = self
            .index
            .nearest_valid(&vector)
            .await
            .context("taxonomy fallback query failed")?;

        match fallback {
            Some((node, distance)) => {
                debug!(
                    lob = %node.lob,
                    category = %node.category,
                    distance,
                    threshold = self.threshold,
                    "no confident match, using nearest valid node"
                );
                Ok(TaxonomyMatch {
                    node,
                    distance: Some(distance),
                    kind: MatchKind::Nearest,
                    embedding_degraded: degraded,
                })
            }
            None => {
                warn!("no taxonomy node with LOB and category near query, using sentinel");
                Ok(TaxonomyMatch::sentinel(degraded))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::DisabledEmbeddingClient;
    use anyhow::bail;
    use async_trait::async_trait;
    use feedback_insights_core::store::memory::InMemoryStore;

    struct FixedEmbedding(Vec<f32>);

    #[async_trait]
    impl EmbeddingClient for FixedEmbedding {
        fn model_name(&self) -> &str {
            "fixed"
        }
        fn dims(&self) -> usize {
            self.0.len()
        }
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(self.0.clone())
        }
    }

    struct BrokenIndex;

    #[async_trait]
    impl VectorIndex for BrokenIndex {
        async fn add_node(&self, _node: &TaxonomyNode) -> Result<()> {
            Ok(())
        }
        async fn nearest_neighbors(&self, _v: &[f32], _k: usize) -> Result<Vec<(TaxonomyNode, f32)>> {
            bail!("index offline")
        }
        async fn nearest_valid(&self, _v: &[f32]) -> Result<Option<(TaxonomyNode, f32)>> {
            bail!("index offline")
        }
        async fn node_count(&self) -> Result<u64> {
            Ok(0)
        }
    }

    fn matcher(embedder: Arc<dyn EmbeddingClient>, index: Arc<dyn VectorIndex>) -> TaxonomyMatcher {
        TaxonomyMatcher::new(embedder, index, &MatchingConfig::default())
    }

    async fn index_with(nodes: &[TaxonomyNode]) -> Arc<InMemoryStore> {
        let store = Arc::new(InMemoryStore::new());
        for n in nodes {
            store.add_node(n).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_empty_index_yields_sentinel() {
        let m = matcher(Arc::new(FixedEmbedding(vec![1.0, 0.0])), index_with(&[]).await);
        let hit = m.match_text("anything").await.unwrap();
        assert_eq!(hit.kind, MatchKind::Sentinel);
        assert_eq!(hit.node, TaxonomyNode::sentinel());
        assert_eq!(hit.distance, None);
        assert_eq!(hit.confidence(), 0.0);
    }

    #[tokio::test]
    async fn test_confident_match() {
        let payments = TaxonomyNode::new("Payments", "Bills", "Electricity", "Payment Failures", vec![0.9, 0.435_89]);
        let m = matcher(Arc::new(FixedEmbedding(vec![1.0, 0.0])), index_with(&[payments]).await);
        let hit = m.match_text("App crashes every time I pay my electricity bill").await.unwrap();
        assert_eq!(hit.kind, MatchKind::Confident);
        assert_eq!(hit.node.lob, "Payments");
        assert!((hit.distance.unwrap() - 0.1).abs() < 1e-3);
        assert!((hit.confidence() - 0.9).abs() < 1e-3);
        assert!(!hit.embedding_degraded);
    }

    #[tokio::test]
    async fn test_far_node_used_as_nearest() {
        let far = TaxonomyNode::new("Rewards", "Points", "F", "T", vec![-1.0, 0.0]);
        let m = matcher(Arc::new(FixedEmbedding(vec![1.0, 0.0])), index_with(&[far]).await);
        let hit = m.match_text("x").await.unwrap();
        assert_eq!(hit.kind, MatchKind::Nearest);
        assert_eq!(hit.node.lob, "Rewards");
    }

    #[tokio::test]
    async fn test_invalid_nearest_skipped() {
        let invalid = TaxonomyNode::new("", "Bills", "F", "T", vec![1.0, 0.0]);
        let valid = TaxonomyNode::new("Cards", "Limits", "F", "T", vec![0.0, 1.0]);
        let m = matcher(Arc::new(FixedEmbedding(vec![1.0, 0.0])), index_with(&[invalid, valid]).await);
        let hit = m.match_text("x").await.unwrap();
        assert_eq!(hit.kind, MatchKind::Nearest);
        assert_eq!(hit.node.lob, "Cards");
    }

    #[tokio::test]
    async fn test_valid_node_found_behind_many_invalid() {
        let mut nodes: Vec<TaxonomyNode> = (0..30)
            .map(|i| TaxonomyNode::new("", "Bills", "F", &format!("T{i}"), vec![1.0, 0.0]))
            .collect();
        nodes.push(TaxonomyNode::new("Cards", "Limits", "F", "T", vec![0.0, 1.0]));
        let m = matcher(Arc::new(FixedEmbedding(vec![1.0, 0.0])), index_with(&nodes).await);
        let hit = m.match_text("x").await.unwrap();
        assert_eq!(hit.kind, MatchKind::Nearest);
        assert_eq!(hit.node.lob, "Cards");
        assert_eq!(hit.node.category, "Limits");
    }

    #[tokio::test]
    async fn test_only_invalid_nodes_yield_sentinel() {
        let invalid = TaxonomyNode::new("Cards", "", "F", "T", vec![1.0, 0.0]);
        let m = matcher(Arc::new(FixedEmbedding(vec![1.0, 0.0])), index_with(&[invalid]).await);
        assert_eq!(m.match_text("x").await.unwrap().kind, MatchKind::Sentinel);
    }

    #[tokio::test]
    async fn test_embedding_failure_degrades() {
        let node = TaxonomyNode::new("Payments", "Bills", "F", "T", vec![1.0, 0.0]);
        let m = matcher(Arc::new(DisabledEmbeddingClient { dims: 2 }), index_with(&[node]).await);
        let hit = m.match_text("x").await.unwrap();
        assert!(hit.embedding_degraded);
        // zero vector is 1.0 away from everything
        assert_eq!(hit.kind, MatchKind::Nearest);
        assert_eq!(hit.distance, Some(1.0));
    }

    #[tokio::test]
    async fn test_index_error_propagates() {
        let m = matcher(Arc::new(FixedEmbedding(vec![1.0])), Arc::new(BrokenIndex));
        assert!(m.match_text("x").await.is_err());
    }
}
