use anyhow::{anyhow, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::services;
use crate::tickets::{draft_tickets, TicketSync};
use crate::tracker::GraphQlTracker;

/// Aggregate insights, draft one ticket per ranked group, and push them to
/// the issue tracker.
pub async fn run_tickets_sync(config: &Config, cancel: &CancellationToken, dry_run: bool) -> Result<()> {
    let (store, services) = services::from_config(config).await?;
    let response = services.aggregator.aggregate(cancel).await?;
    let drafts = draft_tickets(&response, config.tickets.priority_policy);
    store.pool().close().await;

    if dry_run {
        println!(
            "tickets sync (dry-run, {} policy)",
            config.tickets.priority_policy.as_str()
        );
        for draft in &drafts {
            println!(
                "  [{}] {} (score {:.1})",
                draft.priority, draft.title, draft.score
            );
        }
        println!("  drafts: {}", drafts.len());
        return Ok(());
    }

    let team_id = config
        .tickets
        .team_id
        .clone()
        .ok_or_else(|| anyhow!("tickets.team_id is required to sync tickets"))?;
    let tracker = Arc::new(GraphQlTracker::new(&config.tickets)?);
    let sync = TicketSync::new(tracker, team_id, config.tickets.cache_ttl());
    let report = sync.sync(cancel, &drafts).await?;

    println!("tickets sync");
    println!("  drafts: {}", drafts.len());
    println!("  created: {}", report.created);
    println!("  updated: {}", report.updated);
    println!("  failed: {}", report.failed);
    Ok(())
}
