//! Batched, parallel classification of the unclassified backlog.
//!
//! A producer pages through unclassified feedback in id order (keyset
//! pagination, so failed items are not re-fetched in the same run) and
//! pushes each page into a bounded channel. A fixed pool of workers
//! shares the receiving end; each worker classifies its batch items one
//! at a time with per-item retry.
//!
//! Failures are isolated per item and reported in [`PipelineReport`].
//! Errors that stop the producer are returned only after every worker
//! has drained and exited.

use anyhow::{anyhow, bail, Context, Result};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use feedback_insights_core::models::{Classification, FeedbackItem};
use feedback_insights_core::store::FeedbackStore;

use crate::classifier::Classifier;
use crate::config::PipelineConfig;
use crate::error::CompletionError;
use crate::matcher::TaxonomyMatcher;
use crate::progress::{ClassifyProgress, NoProgress, ProgressReporter};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemFailure {
    pub feedback_id: i64,
    pub attempts: u32,
    pub error: String,
}

/// Outcome of one [`PredictionPipeline::process_all`] run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineReport {
    /// Unclassified items when the run started.
    pub total_pending: u64,
    pub classified: u64,
    pub failures: Vec<ItemFailure>,
    /// Items fetched but not started, or abandoned, after cancellation.
    pub skipped: u64,
    pub cancelled: bool,
}

impl PipelineReport {
    /// Turn item-level failures into an error for callers that need one.
    pub fn ensure_success(&self) -> Result<()> {
        if let Some(first) = self.failures.first() {
            bail!(
                "{} feedback item(s) failed to classify; first: feedback {} after {} attempts: {}",
                self.failures.len(),
                first.feedback_id,
                first.attempts,
                first.error
            );
        }
        Ok(())
    }

    fn merge(&mut self, other: WorkerOutcome) {
        self.classified += other.classified;
        self.skipped += other.skipped;
        self.failures.extend(other.failures);
    }
}

#[derive(Default)]
struct WorkerOutcome {
    classified: u64,
    skipped: u64,
    failures: Vec<ItemFailure>,
}

enum ItemOutcome {
    Classified,
    Failed(ItemFailure),
    Cancelled,
}

/// Caller cancellation surfaced from any stage of item processing.
fn is_cancellation(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<CompletionError>()
            .is_some_and(CompletionError::is_cancelled)
    })
}

fn is_permanent(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<CompletionError>()
            .is_some_and(CompletionError::is_permanent)
    })
}

#[derive(Clone)]
pub struct PredictionPipeline {
    store: Arc<dyn FeedbackStore>,
    matcher: Arc<TaxonomyMatcher>,
    classifier: Classifier,
    config: PipelineConfig,
    progress: Arc<dyn ProgressReporter>,
}

impl PredictionPipeline {
    pub fn new(
        store: Arc<dyn FeedbackStore>,
        matcher: Arc<TaxonomyMatcher>,
        classifier: Classifier,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            matcher,
            classifier,
            config,
            progress: Arc::new(NoProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    /// Match, classify, and persist one item.
    ///
    /// The write replaces any earlier classification atomically, so calling
    /// this repeatedly leaves exactly one live classification.
    pub async fn process_one(
        &self,
        cancel: &CancellationToken,
        item: &FeedbackItem,
    ) -> Result<Classification> {
        let matched = self
            .matcher
            .match_text(&item.content)
            .await
            .context("taxonomy matching failed")?;

        let label = self
            .classifier
            .classify(cancel, &item.content, &matched.node)
            .await
            .context("classification failed")?;

        let classification = Classification::new(
            item.id,
            label,
            &matched.node,
            matched.confidence(),
            matched.distance,
        );

        self.store
            .replace_classification(&classification)
            .await
            .with_context(|| format!("failed to store classification for feedback {}", item.id))?;

        debug!(
            feedback_id = item.id,
            insight_type = %label,
            lob = %classification.lob,
            category = %classification.category,
            "feedback classified"
        );
        Ok(classification)
    }

    async fn process_with_retry(&self, cancel: &CancellationToken, item: &FeedbackItem) -> ItemOutcome {
        let max = self.config.max_retries.max(1);
        let mut last_err = None;

        for attempt in 1..=max {
            match self.process_one(cancel, item).await {
                Ok(_) => return ItemOutcome::Classified,
                Err(e) if is_cancellation(&e) => return ItemOutcome::Cancelled,
                Err(e) if is_permanent(&e) => {
                    warn!(feedback_id = item.id, attempt, error = %format!("{e:#}"), "feedback processing failed permanently");
                    return ItemOutcome::Failed(ItemFailure {
                        feedback_id: item.id,
                        attempts: attempt,
                        error: format!("{e:#}"),
                    });
                }
                Err(e) => {
                    warn!(feedback_id = item.id, attempt, error = %format!("{e:#}"), "feedback processing failed");
                    last_err = Some(e);
                }
            }

            if attempt < max {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return ItemOutcome::Cancelled,
                    _ = tokio::time::sleep(self.config.retry_delay()) => {}
                }
            }
        }

        ItemOutcome::Failed(ItemFailure {
            feedback_id: item.id,
            attempts: max,
            error: last_err
                .map(|e| format!("{e:#}"))
                .unwrap_or_else(|| "unknown error".to_string()),
        })
    }

    /// Classify every item that lacks a classification.
    ///
    /// Returns `Err` only when the backlog cannot be read or a worker task
    /// dies; item failures are listed in the report.
    pub async fn process_all(&self, cancel: &CancellationToken) -> Result<PipelineReport> {
        let total = self
            .store
            .count_unclassified()
            .await
            .context("failed to get total count")?;

        let mut report = PipelineReport {
            total_pending: total,
            ..PipelineReport::default()
        };

        info!(total, "starting prediction processing");
        if total == 0 {
            info!("no new feedback to process");
            return Ok(report);
        }

        let workers = self.config.worker_count.max(1);
        let (tx, rx) = mpsc::channel::<Vec<FeedbackItem>>(workers);
        let rx = Arc::new(Mutex::new(rx));
        let done = Arc::new(AtomicU64::new(0));
        let failed = Arc::new(AtomicU64::new(0));

        let mut pool = JoinSet::new();
        for worker_id in 0..workers {
            let pipeline = self.clone();
            let rx = Arc::clone(&rx);
            let cancel = cancel.clone();
            let done = Arc::clone(&done);
            let failed = Arc::clone(&failed);
            pool.spawn(async move {
                let mut outcome = WorkerOutcome::default();
                loop {
                    let batch = rx.lock().await.recv().await;
                    let Some(batch) = batch else { break };
                    debug!(worker_id, items = batch.len(), "worker picked up batch");

                    for item in batch {
                        if cancel.is_cancelled() {
                            outcome.skipped += 1;
                            continue;
                        }
                        match pipeline.process_with_retry(&cancel, &item).await {
                            ItemOutcome::Classified => outcome.classified += 1,
                            ItemOutcome::Cancelled => {
                                outcome.skipped += 1;
                                continue;
                            }
                            ItemOutcome::Failed(failure) => {
                                failed.fetch_add(1, Ordering::Relaxed);
                                outcome.failures.push(failure);
                            }
                        }
                        pipeline.progress.report(&ClassifyProgress::Classified {
                            done: done.fetch_add(1, Ordering::Relaxed) + 1,
                            failed: failed.load(Ordering::Relaxed),
                            total,
                        });
                    }
                }
                outcome
            });
        }

        let produced = self.produce(cancel, &tx, total).await;
        drop(tx);

        let mut join_errors = Vec::new();
        while let Some(joined) = pool.join_next().await {
            match joined {
                Ok(outcome) => report.merge(outcome),
                Err(e) => join_errors.push(e),
            }
        }
        report.cancelled = cancel.is_cancelled();
        report.failures.sort_by_key(|f| f.feedback_id);

        produced.context("failed to fetch batch")?;
        if let Some(e) = join_errors.into_iter().next() {
            return Err(anyhow!(e).context("classification worker failed"));
        }

        info!(
            classified = report.classified,
            failed = report.failures.len(),
            skipped = report.skipped,
            cancelled = report.cancelled,
            "prediction processing finished"
        );
        Ok(report)
    }

    async fn produce(
        &self,
        cancel: &CancellationToken,
        tx: &mpsc::Sender<Vec<FeedbackItem>>,
        total: u64,
    ) -> Result<()> {
        let mut after_id = None;
        let mut batch_no = 0u64;

        loop {
            if cancel.is_cancelled() {
                info!("cancellation observed, no further batches queued");
                return Ok(());
            }

            let batch = self
                .store
                .fetch_unclassified(after_id, self.config.batch_size)
                .await?;
            let Some(last) = batch.last() else {
                return Ok(());
            };
            after_id = Some(last.id);
            batch_no += 1;

            let items = batch.len();
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                sent = tx.send(batch) => {
                    if sent.is_err() {
                        return Ok(());
                    }
                }
            }
            debug!(batch = batch_no, items, "queued batch");
            self.progress.report(&ClassifyProgress::Queued {
                batch: batch_no,
                items,
                total,
            });
        }
    }
}
