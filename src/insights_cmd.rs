use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use feedback_insights_core::models::TaxonomyScope;

use crate::config::Config;
use crate::services;

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Ranked insight groups per type and dimension, as JSON.
pub async fn run_insights_top(config: &Config, cancel: &CancellationToken) -> Result<()> {
    let (store, services) = services::from_config(config).await?;
    let response = services.aggregator.aggregate(cancel).await?;
    print_json(&response)?;
    store.pool().close().await;
    Ok(())
}

/// Most frequent feedback in a LOB scope, as JSON.
pub async fn run_insights_feedback(config: &Config, scope: TaxonomyScope) -> Result<()> {
    let (store, services) = services::from_config(config).await?;
    let response = services.aggregator.get_top_feedback(&scope).await?;
    print_json(&response)?;
    store.pool().close().await;
    Ok(())
}

/// Summarized insight report for a LOB scope, as JSON.
pub async fn run_insights_report(
    config: &Config,
    cancel: &CancellationToken,
    scope: TaxonomyScope,
) -> Result<()> {
    let (store, services) = services::from_config(config).await?;
    let report = services
        .aggregator
        .generate_report(cancel, &scope, Utc::now())
        .await?;
    print_json(&report)?;
    store.pool().close().await;
    Ok(())
}
