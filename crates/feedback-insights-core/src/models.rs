//! Core data models shared by the matching, classification, and
//! aggregation stages.
//!
//! Feedback items and taxonomy nodes are read-only inputs owned by
//! external loaders. Classifications are the only entity the pipeline
//! writes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a piece of feedback was collected from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FeedbackSource {
    AppStore,
    PlayStore,
    Reddit,
    Twitter,
    Conversation,
    Other,
}

impl FeedbackSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackSource::AppStore => "app-store",
            FeedbackSource::PlayStore => "play-store",
            FeedbackSource::Reddit => "reddit",
            FeedbackSource::Twitter => "twitter",
            FeedbackSource::Conversation => "conversation",
            FeedbackSource::Other => "other",
        }
    }

    /// Parse a stored source label. Unknown labels map to [`FeedbackSource::Other`].
    pub fn parse(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "app-store" => FeedbackSource::AppStore,
            "play-store" => FeedbackSource::PlayStore,
            "reddit" => FeedbackSource::Reddit,
            "twitter" => FeedbackSource::Twitter,
            "conversation" => FeedbackSource::Conversation,
            _ => FeedbackSource::Other,
        }
    }
}

/// A single piece of user feedback (review, tweet, support transcript).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackItem {
    /// Opaque, stable identifier assigned by the ingestion side. Pagination
    /// orders by this key.
    pub id: i64,
    pub source: FeedbackSource,
    pub author: String,
    pub content: String,
    /// Star rating in `1..=5`, when the source provides one.
    pub rating: Option<f32>,
    pub posted_at: DateTime<Utc>,
}

impl FeedbackItem {
    /// Whole and fractional days between `posted_at` and `now`.
    pub fn days_since_posted(&self, now: DateTime<Utc>) -> f64 {
        (now - self.posted_at).num_seconds() as f64 / 86_400.0
    }
}

/// A taxonomy leaf used as a classification target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxonomyNode {
    pub lob: String,
    pub category: String,
    pub folder: String,
    pub title: String,
    /// Precomputed embedding of the node. Empty for the sentinel.
    #[serde(default, skip_serializing)]
    pub embedding: Vec<f32>,
}

pub const SENTINEL_LOB: &str = "Uncategorized";
pub const SENTINEL_CATEGORY: &str = "General";
pub const SENTINEL_FOLDER: &str = "Other";
pub const SENTINEL_TITLE: &str = "Uncategorized Feedback";

impl TaxonomyNode {
    pub fn new(lob: &str, category: &str, folder: &str, title: &str, embedding: Vec<f32>) -> Self {
        Self {
            lob: lob.to_string(),
            category: category.to_string(),
            folder: folder.to_string(),
            title: title.to_string(),
            embedding,
        }
    }

    /// The fixed fallback node used when nothing else can be matched.
    pub fn sentinel() -> Self {
        Self::new(
            SENTINEL_LOB,
            SENTINEL_CATEGORY,
            SENTINEL_FOLDER,
            SENTINEL_TITLE,
            Vec::new(),
        )
    }

    /// A node is a valid match target only when LOB and Category are set.
    pub fn is_valid_target(&self) -> bool {
        !self.lob.trim().is_empty() && !self.category.trim().is_empty()
    }

    pub fn is_sentinel(&self) -> bool {
        self.lob == SENTINEL_LOB && self.category == SENTINEL_CATEGORY && self.folder == SENTINEL_FOLDER
    }
}

/// Closed set of labels a classification can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum InsightType {
    #[serde(rename = "complaint")]
    Complaint,
    #[serde(rename = "improvement")]
    Improvement,
    #[serde(rename = "feature-request")]
    FeatureRequest,
    #[serde(rename = "other")]
    Other,
}

impl InsightType {
    /// The three types that insight aggregation ranks. `Other` is never
    /// aggregated.
    pub const RANKED: [InsightType; 3] = [
        InsightType::FeatureRequest,
        InsightType::Improvement,
        InsightType::Complaint,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InsightType::Complaint => "complaint",
            InsightType::Improvement => "improvement",
            InsightType::FeatureRequest => "feature-request",
            InsightType::Other => "other",
        }
    }

    /// Parse a stored label exactly. Returns `None` for anything outside
    /// the closed set.
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "complaint" => Some(InsightType::Complaint),
            "improvement" => Some(InsightType::Improvement),
            "feature-request" => Some(InsightType::FeatureRequest),
            "other" => Some(InsightType::Other),
            _ => None,
        }
    }

    /// Validate raw model output against the closed label set.
    ///
    /// The response is trimmed and lower-cased, then matched exactly.
    /// Anything else (empty, multi-line, multi-word, punctuation) becomes
    /// [`InsightType::Other`]. The legacy plural `others` is accepted as
    /// an alias for `other`.
    ///
    /// ```rust
    /// use feedback_insights_core::models::InsightType;
    ///
    /// assert_eq!(InsightType::from_model_output("  Complaint\n"), InsightType::Complaint);
    /// assert_eq!(InsightType::from_model_output("feature request"), InsightType::Other);
    /// assert_eq!(InsightType::from_model_output(""), InsightType::Other);
    /// ```
    pub fn from_model_output(raw: &str) -> Self {
        let normalized = raw.trim().to_lowercase();
        match normalized.as_str() {
            "others" => InsightType::Other,
            label => InsightType::from_label(label).unwrap_or(InsightType::Other),
        }
    }

    pub fn is_ranked(&self) -> bool {
        !matches!(self, InsightType::Other)
    }
}

impl fmt::Display for InsightType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The taxonomy dimension insight groups are keyed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupBy {
    Lob,
    Category,
}

impl GroupBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupBy::Lob => "lob",
            GroupBy::Category => "category",
        }
    }

    /// Extract this dimension's key from a classification.
    pub fn key<'a>(&self, classification: &'a Classification) -> &'a str {
        match self {
            GroupBy::Lob => &classification.lob,
            GroupBy::Category => &classification.category,
        }
    }
}

impl fmt::Display for GroupBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The result of classifying one feedback item.
///
/// Exactly one live classification exists per feedback item; reprocessing
/// replaces it atomically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub id: String,
    pub feedback_id: i64,
    pub insight_type: InsightType,
    pub lob: String,
    pub category: String,
    pub folder: String,
    pub title: String,
    pub confidence: f32,
    /// Vector distance to the matched node. `None` for the sentinel.
    pub distance: Option<f32>,
    pub created_at: DateTime<Utc>,
}

impl Classification {
    pub fn new(
        feedback_id: i64,
        insight_type: InsightType,
        node: &TaxonomyNode,
        confidence: f32,
        distance: Option<f32>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            feedback_id,
            insight_type,
            lob: node.lob.clone(),
            category: node.category.clone(),
            folder: node.folder.clone(),
            title: node.title.clone(),
            confidence,
            distance,
            created_at: Utc::now(),
        }
    }
}

/// A feedback item joined with its live classification.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedFeedback {
    pub feedback: FeedbackItem,
    pub classification: Classification,
}

/// Filter for scoped queries: a LOB, optionally narrowed to a category and
/// folder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaxonomyScope {
    pub lob: String,
    pub category: Option<String>,
    pub folder: Option<String>,
}

impl TaxonomyScope {
    pub fn new(lob: impl Into<String>, category: Option<String>, folder: Option<String>) -> Self {
        Self {
            lob: lob.into(),
            category: category.filter(|c| !c.is_empty()),
            folder: folder.filter(|f| !f.is_empty()),
        }
    }

    pub fn contains(&self, classification: &Classification) -> bool {
        classification.lob == self.lob
            && self
                .category
                .as_ref()
                .map_or(true, |c| *c == classification.category)
            && self
                .folder
                .as_ref()
                .map_or(true, |f| *f == classification.folder)
    }
}
