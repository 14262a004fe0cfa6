use anyhow::Result;
use sqlx::SqlitePool;

/// Create the feedback, classification, and taxonomy tables. Safe to run
/// repeatedly.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS feedback (
            id INTEGER PRIMARY KEY,
            source TEXT NOT NULL,
            author TEXT NOT NULL,
            content TEXT NOT NULL,
            rating REAL,
            posted_at INTEGER NOT NULL,
            classified INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One live classification per feedback item
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS classifications (
            id TEXT PRIMARY KEY,
            feedback_id INTEGER NOT NULL UNIQUE,
            insight_type TEXT NOT NULL,
            lob TEXT NOT NULL,
            category TEXT NOT NULL,
            folder TEXT NOT NULL,
            title TEXT NOT NULL,
            confidence REAL NOT NULL,
            distance REAL,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (feedback_id) REFERENCES feedback(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS taxonomy_nodes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            lob TEXT NOT NULL,
            category TEXT NOT NULL,
            folder TEXT NOT NULL,
            title TEXT NOT NULL,
            embedding BLOB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_feedback_unclassified ON feedback(classified, id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_classifications_lob ON classifications(lob, insight_type)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_classifications_category ON classifications(category, insight_type)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
