//! # Feedback Insights
//!
//! Classifies raw user feedback against a product taxonomy and aggregates
//! the results into ranked, summarized insights.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────────────┐   ┌────────────┐   ┌──────────┐
//! │ Feedback │──▶│ TaxonomyMatcher │──▶│ Classifier │──▶│  SQLite  │
//! └──────────┘   │ embed + k-NN    │   │ completion │   └────┬─────┘
//!                └─────────────────┘   └────────────┘        │
//!                                                            ▼
//!                ┌──────────────┐   ┌─────────────────────────────┐
//!                │ Ticket sync  │◀──│ InsightAggregator (LOB/Cat) │
//!                └──────────────┘   └─────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`embedding`] | Embedding client abstraction |
//! | [`completion`] | Completion client, retry and backoff |
//! | [`rate_limit`] | Shared cap on concurrent model calls |
//! | [`cache`] | Time-bounded value cache |
//! | [`matcher`] | Nearest taxonomy node with fallbacks |
//! | [`classifier`] | Insight-type labelling |
//! | [`pipeline`] | Batched, parallel classification |
//! | [`insights`] | Ranked aggregation, summaries, reports |
//! | [`tickets`] | Ticket drafting and issue-tracker sync |
//! | [`sqlite_store`] | SQLite storage |

pub mod cache;
pub mod classifier;
pub mod classify_cmd;
pub mod completion;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod import_cmd;
pub mod insights;
pub mod insights_cmd;
pub mod matcher;
pub mod migrate;
pub mod pipeline;
pub mod progress;
pub mod rate_limit;
pub mod services;
pub mod sqlite_store;
pub mod tickets;
pub mod tickets_cmd;
pub mod tracker;
