use anyhow::{bail, Result};
use tokio_util::sync::CancellationToken;

use feedback_insights_core::store::{FeedbackStore, VectorIndex};

use crate::config::Config;
use crate::progress::ProgressMode;
use crate::services;

/// Classify every unclassified feedback item.
pub async fn run_classify_pending(
    config: &Config,
    cancel: &CancellationToken,
    dry_run: bool,
    progress: ProgressMode,
) -> Result<()> {
    if dry_run {
        let store = services::open_store(config).await?;
        let pending = store.count_unclassified().await?;
        let nodes = store.node_count().await?;
        println!("classify pending (dry-run)");
        println!("  feedback awaiting classification: {}", pending);
        println!("  taxonomy nodes: {}", nodes);
        println!(
            "  batches of {}: {}",
            config.pipeline.batch_size,
            pending.div_ceil(config.pipeline.batch_size as u64)
        );
        store.pool().close().await;
        return Ok(());
    }

    let (store, services) = services::from_config(config).await?;
    let pipeline = services.pipeline.with_progress(progress.reporter());
    let report = pipeline.process_all(cancel).await?;

    println!("classify pending");
    println!("  total pending: {}", report.total_pending);
    println!("  classified: {}", report.classified);
    println!("  failed: {}", report.failures.len());
    if report.skipped > 0 {
        println!("  skipped: {}", report.skipped);
    }
    for failure in &report.failures {
        println!(
            "  - feedback {} after {} attempts: {}",
            failure.feedback_id, failure.attempts, failure.error
        );
    }
    if report.cancelled {
        println!("  cancelled before completion");
    }

    store.pool().close().await;
    report.ensure_success()
}

/// Classify (or reclassify) a single feedback item.
pub async fn run_classify_one(config: &Config, cancel: &CancellationToken, id: i64) -> Result<()> {
    let (store, services) = services::from_config(config).await?;
    let Some(item) = store.get_feedback(id).await? else {
        bail!("feedback {} not found", id);
    };

    let classification = services.pipeline.process_one(cancel, &item).await?;
    println!("{}", serde_json::to_string_pretty(&classification)?);

    store.pool().close().await;
    Ok(())
}
