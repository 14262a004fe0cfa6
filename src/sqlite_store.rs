//! SQLite-backed [`FeedbackStore`] and [`VectorIndex`].
//!
//! Aggregates run in SQL. Nearest-neighbour search loads every taxonomy
//! embedding and ranks by cosine distance in Rust; taxonomies are small
//! enough that a scan per query is cheap.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use feedback_insights_core::embedding::{cosine_distance, decode_vector, encode_vector};
use feedback_insights_core::models::{
    Classification, ClassifiedFeedback, FeedbackItem, FeedbackSource, GroupBy, InsightType,
    TaxonomyNode, TaxonomyScope,
};
use feedback_insights_core::store::{FeedbackScoreRow, FeedbackStore, GroupMetrics, VectorIndex};

/// SQLite implementation of the storage traits.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert a taxonomy node and return its row id.
    pub async fn insert_taxonomy_node(&self, node: &TaxonomyNode) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO taxonomy_nodes (lob, category, folder, title, embedding) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&node.lob)
        .bind(&node.category)
        .bind(&node.folder)
        .bind(&node.title)
        .bind(encode_vector(&node.embedding))
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }
}

fn group_column(group_by: GroupBy) -> &'static str {
    match group_by {
        GroupBy::Lob => "c.lob",
        GroupBy::Category => "c.category",
    }
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0).ok_or_else(|| anyhow!("invalid timestamp {}", secs))
}

fn insight_type(label: &str) -> Result<InsightType> {
    InsightType::from_label(label).ok_or_else(|| anyhow!("unknown insight type '{}'", label))
}

fn feedback_from_row(row: &SqliteRow) -> Result<FeedbackItem> {
    let source: String = row.try_get("source")?;
    let rating: Option<f64> = row.try_get("rating")?;
    Ok(FeedbackItem {
        id: row.try_get("id")?,
        source: FeedbackSource::parse(&source),
        author: row.try_get("author")?,
        content: row.try_get("content")?,
        rating: rating.map(|r| r as f32),
        posted_at: timestamp(row.try_get("posted_at")?)?,
    })
}

fn classification_from_row(row: &SqliteRow) -> Result<Classification> {
    let label: String = row.try_get("insight_type")?;
    let confidence: f64 = row.try_get("confidence")?;
    let distance: Option<f64> = row.try_get("distance")?;
    Ok(Classification {
        id: row.try_get("classification_id")?,
        feedback_id: row.try_get("id")?,
        insight_type: insight_type(&label)?,
        lob: row.try_get("lob")?,
        category: row.try_get("category")?,
        folder: row.try_get("folder")?,
        title: row.try_get("title")?,
        confidence: confidence as f32,
        distance: distance.map(|d| d as f32),
        created_at: timestamp(row.try_get("created_at")?)?,
    })
}

const FEEDBACK_COLUMNS: &str = "f.id, f.source, f.author, f.content, f.rating, f.posted_at";

const JOINED_COLUMNS: &str = "f.id, f.source, f.author, f.content, f.rating, f.posted_at, \
     c.id AS classification_id, c.insight_type, c.lob, c.category, c.folder, c.title, \
     c.confidence, c.distance, c.created_at";

const RANKED_TYPES: &str = "('feature-request', 'improvement', 'complaint')";

const SCOPE_FILTER: &str =
    "c.lob = ? AND (? IS NULL OR c.category = ?) AND (? IS NULL OR c.folder = ?)";

#[async_trait]
impl FeedbackStore for SqliteStore {
    async fn insert_feedback(&self, item: &FeedbackItem) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO feedback (id, source, author, content, rating, posted_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                source = excluded.source,
                author = excluded.author,
                content = excluded.content,
                rating = excluded.rating,
                posted_at = excluded.posted_at
            "#,
        )
        .bind(item.id)
        .bind(item.source.as_str())
        .bind(&item.author)
        .bind(&item.content)
        .bind(item.rating.map(f64::from))
        .bind(item.posted_at.timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_feedback(&self, id: i64) -> Result<Option<FeedbackItem>> {
        let row = sqlx::query(&format!("SELECT {FEEDBACK_COLUMNS} FROM feedback f WHERE f.id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(feedback_from_row).transpose()
    }

    async fn count_unclassified(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM feedback WHERE classified = 0")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn fetch_unclassified(
        &self,
        after_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<FeedbackItem>> {
        let rows = sqlx::query(&format!(
            "SELECT {FEEDBACK_COLUMNS} FROM feedback f \
             WHERE f.classified = 0 AND f.id > ? ORDER BY f.id LIMIT ?"
        ))
        .bind(after_id.unwrap_or(i64::MIN))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(feedback_from_row).collect()
    }

    async fn replace_classification(&self, classification: &Classification) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM classifications WHERE feedback_id = ?")
            .bind(classification.feedback_id)
            .execute(&mut *tx)
            .await?;

        let flagged = sqlx::query("UPDATE feedback SET classified = 1 WHERE id = ?")
            .bind(classification.feedback_id)
            .execute(&mut *tx)
            .await?;
        if flagged.rows_affected() == 0 {
            bail!("feedback {} not found", classification.feedback_id);
        }

        sqlx::query(
            r#"
            INSERT INTO classifications (id, feedback_id, insight_type, lob, category, folder,
                                         title, confidence, distance, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&classification.id)
        .bind(classification.feedback_id)
        .bind(classification.insight_type.as_str())
        .bind(&classification.lob)
        .bind(&classification.category)
        .bind(&classification.folder)
        .bind(&classification.title)
        .bind(f64::from(classification.confidence))
        .bind(classification.distance.map(f64::from))
        .bind(classification.created_at.timestamp())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn classifications_for(&self, feedback_id: i64) -> Result<Vec<Classification>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOINED_COLUMNS} FROM classifications c \
             JOIN feedback f ON f.id = c.feedback_id WHERE c.feedback_id = ?"
        ))
        .bind(feedback_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(classification_from_row).collect()
    }

    async fn group_metrics(
        &self,
        group_by: GroupBy,
        min_support: u64,
        now: DateTime<Utc>,
    ) -> Result<Vec<GroupMetrics>> {
        let col = group_column(group_by);
        let sql = format!(
            r#"
            SELECT {col} AS name,
                   c.insight_type AS insight_type,
                   COUNT(*) AS count,
                   COUNT(DISTINCT f.author) AS unique_count,
                   AVG(COALESCE(f.rating, 3.0)) AS avg_rating,
                   SUM(CASE
                       WHEN f.posted_at >= ? THEN 2.0
                       WHEN f.posted_at >= ? THEN 1.5
                       ELSE 1.0
                   END) AS recency_score
            FROM classifications c
            JOIN feedback f ON f.id = c.feedback_id
            WHERE c.insight_type IN {RANKED_TYPES} AND {col} <> ''
            GROUP BY {col}, c.insight_type
            HAVING COUNT(*) >= ?
            ORDER BY MIN(f.id)
            "#
        );

        let rows = sqlx::query(&sql)
            .bind((now - Duration::days(30)).timestamp())
            .bind((now - Duration::days(90)).timestamp())
            .bind(min_support as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                let label: String = row.try_get("insight_type")?;
                let count: i64 = row.try_get("count")?;
                let unique_count: i64 = row.try_get("unique_count")?;
                Ok(GroupMetrics {
                    name: row.try_get("name")?,
                    insight_type: insight_type(&label)?,
                    count: count as u64,
                    unique_count: unique_count as u64,
                    avg_rating: row.try_get("avg_rating")?,
                    recency_score: row.try_get("recency_score")?,
                })
            })
            .collect()
    }

    async fn representative_feedback(
        &self,
        group_by: GroupBy,
        name: &str,
        insight_type: InsightType,
        limit: usize,
    ) -> Result<Vec<FeedbackItem>> {
        let col = group_column(group_by);
        let rows = sqlx::query(&format!(
            "SELECT {FEEDBACK_COLUMNS} FROM feedback f \
             JOIN classifications c ON c.feedback_id = f.id \
             WHERE {col} = ? AND c.insight_type = ? \
             ORDER BY f.rating IS NULL, f.rating DESC, f.posted_at DESC \
             LIMIT ?"
        ))
        .bind(name)
        .bind(insight_type.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(feedback_from_row).collect()
    }

    async fn feedback_scores(&self, scope: &TaxonomyScope) -> Result<Vec<FeedbackScoreRow>> {
        let rows = sqlx::query(&format!(
            "SELECT f.content AS content, c.insight_type AS insight_type, \
                    COUNT(*) AS count, AVG(COALESCE(f.rating, 3.0)) AS avg_rating \
             FROM feedback f JOIN classifications c ON c.feedback_id = f.id \
             WHERE {SCOPE_FILTER} \
             GROUP BY f.content, c.insight_type \
             ORDER BY MIN(f.id)"
        ))
        .bind(&scope.lob)
        .bind(&scope.category)
        .bind(&scope.category)
        .bind(&scope.folder)
        .bind(&scope.folder)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let label: String = row.try_get("insight_type")?;
                let count: i64 = row.try_get("count")?;
                Ok(FeedbackScoreRow {
                    content: row.try_get("content")?,
                    insight_type: insight_type(&label)?,
                    count: count as u64,
                    avg_rating: row.try_get("avg_rating")?,
                })
            })
            .collect()
    }

    async fn classified_feedback(&self, scope: &TaxonomyScope) -> Result<Vec<ClassifiedFeedback>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOINED_COLUMNS} FROM feedback f \
             JOIN classifications c ON c.feedback_id = f.id \
             WHERE {SCOPE_FILTER} ORDER BY f.id"
        ))
        .bind(&scope.lob)
        .bind(&scope.category)
        .bind(&scope.category)
        .bind(&scope.folder)
        .bind(&scope.folder)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(ClassifiedFeedback {
                    feedback: feedback_from_row(row)?,
                    classification: classification_from_row(row)?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl VectorIndex for SqliteStore {
    async fn add_node(&self, node: &TaxonomyNode) -> Result<()> {
        self.insert_taxonomy_node(node).await.map(|_| ())
    }

    async fn nearest_neighbors(&self, vector: &[f32], k: usize) -> Result<Vec<(TaxonomyNode, f32)>> {
        let rows = sqlx::query(
            "SELECT lob, category, folder, title, embedding FROM taxonomy_nodes ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut scored = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.try_get("embedding")?;
            let embedding = decode_vector(&blob);
            let distance = cosine_distance(vector, &embedding);
            let node = TaxonomyNode {
                lob: row.try_get("lob")?,
                category: row.try_get("category")?,
                folder: row.try_get("folder")?,
                title: row.try_get("title")?,
                embedding,
            };
            scored.push((node, distance));
        }
        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    async fn nearest_valid(&self, vector: &[f32]) -> Result<Option<(TaxonomyNode, f32)>> {
        let rows = sqlx::query(
            "SELECT lob, category, folder, title, embedding FROM taxonomy_nodes \
             WHERE TRIM(lob) <> '' AND TRIM(category) <> '' ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut best: Option<(TaxonomyNode, f32)> = None;
        for row in &rows {
            let blob: Vec<u8> = row.try_get("embedding")?;
            let embedding = decode_vector(&blob);
            let distance = cosine_distance(vector, &embedding);
            if best.as_ref().is_some_and(|(_, d)| *d <= distance) {
                continue;
            }
            best = Some((
                TaxonomyNode {
                    lob: row.try_get("lob")?,
                    category: row.try_get("category")?,
                    folder: row.try_get("folder")?,
                    title: row.try_get("title")?,
                    embedding,
                },
                distance,
            ));
        }
        Ok(best)
    }

    async fn node_count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM taxonomy_nodes")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}
