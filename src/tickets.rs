//! Turns ranked insight groups into issue-tracker tickets.
//!
//! [`draft_tickets`] is pure: one [`TicketDraft`] per ranked group, scored
//! with the composite formula and prioritized by a [`PriorityPolicy`].
//! [`TicketSync`] pushes drafts to an [`IssueTracker`], creating tickets
//! whose title is new and updating the ones that already exist.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use feedback_insights_core::models::InsightType;
use feedback_insights_core::scoring::{composite_score, severity, Priority, PriorityPolicy};

use crate::cache::TimedCache;
use crate::insights::{CategoryInsight, InsightsResponse};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

/// One page of [`IssueTracker::list_issues`].
#[derive(Debug, Clone, Default)]
pub struct IssuePage {
    pub issues: Vec<Issue>,
    pub next_cursor: Option<String>,
}

/// Remote ticket system.
#[async_trait]
pub trait IssueTracker: Send + Sync {
    async fn create_issue(
        &self,
        team_id: &str,
        title: &str,
        description: &str,
        priority: Priority,
    ) -> Result<Issue>;

    async fn update_issue(&self, issue_id: &str, priority: Priority, description: &str) -> Result<()>;

    async fn add_comment(&self, issue_id: &str, body: &str) -> Result<()>;

    /// One page of issues; pass the previous page's cursor to continue.
    async fn list_issues(&self, cursor: Option<&str>) -> Result<IssuePage>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TicketDraft {
    pub title: String,
    pub description: String,
    pub priority: Priority,
    pub score: f64,
    pub insight_type: InsightType,
    pub unique_users: u64,
    pub mentions: u64,
}

fn type_title(insight_type: InsightType) -> &'static str {
    match insight_type {
        InsightType::FeatureRequest => "Feature requests",
        InsightType::Improvement => "Improvements",
        InsightType::Complaint => "Complaints",
        InsightType::Other => "Other feedback",
    }
}

fn draft_for(group: &CategoryInsight, dimension: &str, policy: PriorityPolicy) -> TicketDraft {
    let importance = severity(group.unique_count, group.count) as f64;
    let score = composite_score(group.unique_count, group.count, importance);
    let priority = policy.priority_for(score);

    let mut description = format!(
        "**Impact**: {} users ({} mentions), average rating {:.1}\n**Priority**: {} ({})\n**Score**: {:.1}\n",
        group.unique_count,
        group.count,
        group.avg_rating,
        priority,
        priority.label(),
        score
    );
    let narrative = group.summary.narrative(group.insight_type);
    if !narrative.is_empty() {
        description.push('\n');
        description.push_str(narrative);
        description.push('\n');
    }
    if !group.summary.requested_features.is_empty() {
        description.push_str("\nRequested features:\n");
        for feature in &group.summary.requested_features {
            description.push_str(&format!("- {feature}\n"));
        }
    }

    TicketDraft {
        title: format!(
            "{}: {} ({})",
            type_title(group.insight_type),
            group.name,
            dimension
        ),
        description,
        priority,
        score,
        insight_type: group.insight_type,
        unique_users: group.unique_count,
        mentions: group.count,
    }
}

/// One draft per ranked group, by type then LOB groups before category
/// groups, each in ranked order.
pub fn draft_tickets(response: &InsightsResponse, policy: PriorityPolicy) -> Vec<TicketDraft> {
    let mut drafts = Vec::new();
    for insight_type in InsightType::RANKED {
        let Some(insights) = response.for_type(insight_type) else {
            continue;
        };
        drafts.extend(insights.top_lobs.iter().map(|g| draft_for(g, "LOB", policy)));
        drafts.extend(
            insights
                .top_categories
                .iter()
                .map(|g| draft_for(g, "category", policy)),
        );
    }
    drafts
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TicketSyncReport {
    pub created: u64,
    pub updated: u64,
    pub failed: u64,
}

/// Pushes drafts to an [`IssueTracker`], matching existing issues by title.
///
/// The issue list is cached for `ttl` and refreshed under the cache's
/// double-checked write lock.
pub struct TicketSync {
    tracker: Arc<dyn IssueTracker>,
    team_id: String,
    issues: TimedCache<Vec<Issue>>,
}

impl TicketSync {
    pub fn new(tracker: Arc<dyn IssueTracker>, team_id: impl Into<String>, ttl: Duration) -> Self {
        Self {
            tracker,
            team_id: team_id.into(),
            issues: TimedCache::new(ttl),
        }
    }

    /// Every issue visible to the tracker, across all pages.
    pub async fn existing_issues(&self) -> Result<Vec<Issue>> {
        let tracker = Arc::clone(&self.tracker);
        self.issues
            .get_or_refresh(|| async move { list_all_issues(tracker.as_ref()).await })
            .await
    }

    /// Creates or updates one ticket per draft. Cancellation is checked
    /// before every tracker write; a cancelled sync returns an error and
    /// leaves the remaining drafts untouched.
    pub async fn sync(
        &self,
        cancel: &CancellationToken,
        drafts: &[TicketDraft],
    ) -> Result<TicketSyncReport> {
        if cancel.is_cancelled() {
            bail!("ticket sync cancelled before start");
        }
        let existing = self
            .existing_issues()
            .await
            .context("failed to list existing issues")?;
        let by_title: HashMap<&str, &Issue> =
            existing.iter().map(|i| (i.title.as_str(), i)).collect();

        let mut report = TicketSyncReport::default();
        for (done, draft) in drafts.iter().enumerate() {
            if cancel.is_cancelled() {
                if report.created > 0 {
                    self.issues.invalidate().await;
                }
                info!(
                    done,
                    remaining = drafts.len() - done,
                    created = report.created,
                    updated = report.updated,
                    "ticket sync cancelled"
                );
                bail!("ticket sync cancelled after {done} of {} drafts", drafts.len());
            }
            let result = match by_title.get(draft.title.as_str()) {
                Some(issue) => self.update(issue, draft).await.map(|_| report.updated += 1),
                None => self
                    .tracker
                    .create_issue(&self.team_id, &draft.title, &draft.description, draft.priority)
                    .await
                    .map(|issue| {
                        debug!(issue_id = %issue.id, title = %issue.title, "created issue");
                        report.created += 1;
                    }),
            };
            if let Err(e) = result {
                warn!(title = %draft.title, error = %format!("{e:#}"), "failed to sync ticket");
                report.failed += 1;
            }
        }

        if report.created > 0 {
            self.issues.invalidate().await;
        }
        info!(
            created = report.created,
            updated = report.updated,
            failed = report.failed,
            "ticket sync finished"
        );
        Ok(report)
    }

    async fn update(&self, issue: &Issue, draft: &TicketDraft) -> Result<()> {
        self.tracker
            .update_issue(&issue.id, draft.priority, &draft.description)
            .await
            .with_context(|| format!("failed to update issue {}", issue.id))?;
        let comment = format!(
            "Feedback volume update: {} mentions from {} users, score {:.1}, priority {}.",
            draft.mentions, draft.unique_users, draft.score, draft.priority
        );
        self.tracker
            .add_comment(&issue.id, &comment)
            .await
            .with_context(|| format!("failed to comment on issue {}", issue.id))
    }
}

async fn list_all_issues(tracker: &dyn IssueTracker) -> Result<Vec<Issue>> {
    let mut all = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = tracker.list_issues(cursor.as_deref()).await?;
        all.extend(page.issues);
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => return Ok(all),
        }
    }
}
