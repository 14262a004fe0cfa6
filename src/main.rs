//! # Feedback Insights CLI (`fbi`)
//!
//! ## Usage
//!
//! ```bash
//! fbi --config ./config/fbi.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `fbi init` | Create the SQLite database and run schema migrations |
//! | `fbi import feedback <file>` | Load feedback items from JSON lines |
//! | `fbi import taxonomy <file>` | Embed and load taxonomy nodes from JSON lines |
//! | `fbi classify pending` | Classify every unclassified feedback item |
//! | `fbi classify one <id>` | Classify or reclassify one item |
//! | `fbi insights top` | Ranked insight groups per type, by LOB and category |
//! | `fbi insights feedback --lob <lob>` | Most frequent feedback in a LOB |
//! | `fbi insights report --lob <lob>` | Summarized report for a LOB scope |
//! | `fbi tickets sync` | Push ranked groups to the issue tracker |
//!
//! Logs go to stderr; command output goes to stdout.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use feedback_insights::progress::ProgressMode;
use feedback_insights::{
    classify_cmd, config, db, import_cmd, insights_cmd, migrate, tickets_cmd,
};
use feedback_insights_core::models::TaxonomyScope;

/// Feedback Insights: classify user feedback against a product taxonomy
/// and turn it into ranked insights.
#[derive(Parser)]
#[command(name = "fbi", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/fbi.toml")]
    config: PathBuf,

    /// Log at debug level.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Load feedback or taxonomy records from a JSON-lines file.
    Import {
        #[command(subcommand)]
        what: ImportTarget,
    },

    /// Run taxonomy matching and insight-type classification.
    Classify {
        #[command(subcommand)]
        action: ClassifyAction,
    },

    /// Aggregate classified feedback.
    Insights {
        #[command(subcommand)]
        action: InsightsAction,
    },

    /// Issue-tracker ticket drafting and sync.
    Tickets {
        #[command(subcommand)]
        action: TicketsAction,
    },
}

#[derive(Subcommand)]
enum ImportTarget {
    Feedback { path: PathBuf },
    Taxonomy { path: PathBuf },
}

#[derive(Subcommand)]
enum ClassifyAction {
    /// Classify every item that has no classification yet.
    Pending {
        /// Show counts without classifying anything.
        #[arg(long)]
        dry_run: bool,

        /// Emit progress as JSON lines on stderr.
        #[arg(long)]
        json_progress: bool,
    },
    /// Classify one item, replacing any earlier classification.
    One { id: i64 },
}

#[derive(clap::Args)]
struct ScopeArgs {
    #[arg(long)]
    lob: String,
    #[arg(long)]
    category: Option<String>,
    #[arg(long)]
    folder: Option<String>,
}

impl From<ScopeArgs> for TaxonomyScope {
    fn from(args: ScopeArgs) -> Self {
        TaxonomyScope::new(args.lob, args.category, args.folder)
    }
}

#[derive(Subcommand)]
enum InsightsAction {
    /// Top groups per insight type, by LOB and by category.
    Top,
    /// Most frequent feedback texts per insight type.
    Feedback {
        #[command(flatten)]
        scope: ScopeArgs,
    },
    /// Batched summaries and metrics for one scope.
    Report {
        #[command(flatten)]
        scope: ScopeArgs,
    },
}

#[derive(Subcommand)]
enum TicketsAction {
    Sync {
        /// Print drafts without contacting the tracker.
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_directive = if cli.verbose {
        "feedback_insights=debug"
    } else {
        "feedback_insights=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cfg = config::load_config(&cli.config)?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing in-flight items");
            on_signal.cancel();
        }
    });

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg.db).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Import { what } => match what {
            ImportTarget::Feedback { path } => {
                import_cmd::run_import_feedback(&cfg, &path).await?;
            }
            ImportTarget::Taxonomy { path } => {
                import_cmd::run_import_taxonomy(&cfg, &path).await?;
            }
        },
        Commands::Classify { action } => match action {
            ClassifyAction::Pending {
                dry_run,
                json_progress,
            } => {
                let progress = if json_progress {
                    ProgressMode::Json
                } else {
                    ProgressMode::default_for_tty()
                };
                classify_cmd::run_classify_pending(&cfg, &cancel, dry_run, progress).await?;
            }
            ClassifyAction::One { id } => {
                classify_cmd::run_classify_one(&cfg, &cancel, id).await?;
            }
        },
        Commands::Insights { action } => match action {
            InsightsAction::Top => {
                insights_cmd::run_insights_top(&cfg, &cancel).await?;
            }
            InsightsAction::Feedback { scope } => {
                insights_cmd::run_insights_feedback(&cfg, scope.into()).await?;
            }
            InsightsAction::Report { scope } => {
                insights_cmd::run_insights_report(&cfg, &cancel, scope.into()).await?;
            }
        },
        Commands::Tickets { action } => match action {
            TicketsAction::Sync { dry_run } => {
                tickets_cmd::run_tickets_sync(&cfg, &cancel, dry_run).await?;
            }
        },
    }

    Ok(())
}
