//! # compras CLI
//!
//! The `compras` binary ingests procurement releases from the DGCP OCDS API
//! into a local SQLite database and queries them back out.
//!
//! ## Usage
//!
//! ```bash
//! compras --config ./config/compras.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `compras init` | Create the SQLite database and schema |
//! | `compras sync --from D --to D` | Ingest a date range, week by week |
//! | `compras recent` | Ingest the last few days |
//! | `compras fetch <ocid>` | Ingest a single release |
//! | `compras search` | Filtered, paginated search |
//! | `compras get <key>` | Print one stored release |
//! | `compras filters` | List distinct selector values |
//! | `compras stats` | Counts and breakdowns |
//! | `compras serve` | Start the HTTP API |
//!
//! ## Examples
//!
//! ```bash
//! compras init
//! compras sync --from 2024-01-01 --to 2024-03-31 --delay-ms 1500
//! compras search --keyword "agua potable" --region Santiago --active
//! compras serve
//! ```

use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use compras_core::store::SearchFilters;
use compras_sync::ingest::{self, IngestionRequest};
use compras_sync::progress::ProgressMode;
use compras_sync::{config, get, logging, migrate, search, server, stats};

/// compras: incremental OCDS procurement ingestion for the Dominican Republic.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/compras.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "compras",
    about = "compras: incremental OCDS procurement ingestion and search",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/compras.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the releases, parties and
    /// documents tables. Idempotent.
    Init,

    /// Ingest releases published in a date range.
    ///
    /// The range is processed in weekly windows with a delay between
    /// upstream requests. Ctrl-C stops cooperatively and still prints the
    /// summary.
    Sync {
        /// First day to ingest (YYYY-MM-DD).
        #[arg(long)]
        from: NaiveDate,

        /// Last day to ingest, inclusive (YYYY-MM-DD).
        #[arg(long)]
        to: NaiveDate,

        /// Releases per upstream page.
        #[arg(long)]
        batch_size: Option<u32>,

        /// Milliseconds between upstream requests.
        #[arg(long)]
        delay_ms: Option<u64>,

        /// Progress output on stderr: off, human, or json.
        /// Defaults to human when stderr is a terminal.
        #[arg(long)]
        progress: Option<ProgressMode>,
    },

    /// Ingest the last few days.
    Recent {
        /// Number of days back from today.
        #[arg(long, default_value_t = 7)]
        days: u32,

        #[arg(long)]
        progress: Option<ProgressMode>,
    },

    /// Fetch, normalize and store a single release by ocid.
    Fetch { ocid: String },

    /// Search stored releases.
    Search {
        /// Case-insensitive substring over title, description and buyer.
        #[arg(long)]
        keyword: Option<String>,

        /// Buyer name (repeatable).
        #[arg(long = "entity")]
        entities: Vec<String>,

        /// Buyer region (repeatable).
        #[arg(long = "region")]
        regions: Vec<String>,

        /// Main procurement category (repeatable).
        #[arg(long = "category")]
        categories: Vec<String>,

        /// Procurement method (repeatable).
        #[arg(long = "method")]
        methods: Vec<String>,

        /// Tender status (repeatable).
        #[arg(long = "status")]
        statuses: Vec<String>,

        #[arg(long)]
        min_budget: Option<f64>,

        #[arg(long)]
        max_budget: Option<f64>,

        /// Earliest date, inclusive (YYYY-MM-DD).
        #[arg(long)]
        since: Option<NaiveDate>,

        /// Latest date, inclusive (YYYY-MM-DD).
        #[arg(long)]
        until: Option<NaiveDate>,

        /// Only releases with status `active`.
        #[arg(long)]
        active: bool,

        /// Only releases with at least one document.
        #[arg(long)]
        with_documents: bool,

        #[arg(long, default_value_t = 1)]
        page: u32,

        #[arg(long, default_value_t = 20)]
        page_size: u32,

        /// Print the result page as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print one stored release by storage key (ocid, or `id:<id>`).
    Get { key: String },

    /// List distinct entities, regions, categories and methods.
    Filters {
        #[arg(long)]
        json: bool,
    },

    /// Show database statistics.
    Stats,

    /// Start the HTTP API on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init_logging(&cfg.logging)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Sync {
            from,
            to,
            batch_size,
            delay_ms,
            progress,
        } => {
            let request = IngestionRequest {
                start_date: from,
                end_date: to,
                batch_size,
                delay_between_requests: delay_ms,
            };
            let mode = progress.unwrap_or_else(ProgressMode::default_for_tty);
            ingest::run_sync(&cfg, request, mode).await?;
        }
        Commands::Recent { days, progress } => {
            let today = chrono::Utc::now().date_naive();
            let request = IngestionRequest::recent(days, today);
            let mode = progress.unwrap_or_else(ProgressMode::default_for_tty);
            ingest::run_sync(&cfg, request, mode).await?;
        }
        Commands::Fetch { ocid } => {
            ingest::run_fetch(&cfg, &ocid).await?;
        }
        Commands::Search {
            keyword,
            entities,
            regions,
            categories,
            methods,
            statuses,
            min_budget,
            max_budget,
            since,
            until,
            active,
            with_documents,
            page,
            page_size,
            json,
        } => {
            let filters = SearchFilters {
                keyword,
                entities,
                regions,
                categories,
                methods,
                statuses,
                min_budget,
                max_budget,
                start_date: since,
                end_date: until,
                is_active: active,
                has_documents: with_documents,
                page: Some(page),
                page_size: Some(page_size),
            };
            search::run_search(&cfg, &filters, json).await?;
        }
        Commands::Get { key } => {
            get::run_get(&cfg, &key).await?;
        }
        Commands::Filters { json } => {
            search::run_filters(&cfg, json).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
