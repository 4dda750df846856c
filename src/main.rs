//! # indexkit CLI
//!
//! ## Usage
//!
//! ```bash
//! indexkit --config ./config/indexkit.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `indexkit init` | Create the SQLite database and schema |
//! | `indexkit status [--index ID]` | Tracking counts per index and datasource |
//! | `indexkit track <index>` | Queue every item of the index's datasources |
//! | `indexkit index <index>` | Index pending items in batches |
//! | `indexkit reindex <index>` | Queue everything again, keep indexed data |
//! | `indexkit clear <index>` | Delete indexed data and queue everything |
//! | `indexkit search <index> [KEYS]` | Run a query |
//!
//! Logging goes to stderr and is controlled by `INDEXKIT_LOG`
//! (e.g. `INDEXKIT_LOG=indexkit_core=debug`), `-v` or `-q`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use indexkit::config;
use indexkit::index_cmd::{self, IndexOptions};
use indexkit::migrate;
use indexkit::progress::ProgressMode;
use indexkit::search::{self, SearchArgs};
use indexkit::status;

/// indexkit: change tracking, processor pipelines and queries over
/// pluggable search backends.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/indexkit.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "indexkit", version, about)]
struct Cli {
    /// Path to configuration file
    #[arg(long, global = true, default_value = "./config/indexkit.toml")]
    config: PathBuf,

    /// More log output (repeat for debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database (create tables)
    Init,

    /// Show tracking status of the configured indexes
    Status {
        /// Only this index
        #[arg(long)]
        index: Option<String>,
    },

    /// Queue every item of an index's datasources for indexing
    Track {
        index: String,

        /// Only this datasource
        #[arg(long)]
        datasource: Option<String>,

        /// Progress output: human, json, or off (default: human on a TTY)
        #[arg(long)]
        progress: Option<String>,
    },

    /// Index pending items
    Index {
        index: String,

        /// Items per batch step (default: indexing.batch_size)
        #[arg(long)]
        batch_size: Option<usize>,

        /// Index at most this many items (default: the index's cron_limit)
        #[arg(long, conflicts_with = "all")]
        limit: Option<usize>,

        /// Index everything pending
        #[arg(long)]
        all: bool,

        /// Only items of this datasource
        #[arg(long)]
        datasource: Option<String>,

        /// Progress output: human, json, or off (default: human on a TTY)
        #[arg(long)]
        progress: Option<String>,
    },

    /// Queue every item for reindexing, keeping the indexed data
    Reindex { index: String },

    /// Delete the indexed data and queue every item again
    Clear { index: String },

    /// Search an index
    Search {
        index: String,

        /// Search keys; omit for a filter-only query
        keys: Option<String>,

        /// How keys are parsed: terms, single or direct
        #[arg(long)]
        parse_mode: Option<String>,

        /// Conjunction of parsed terms: AND or OR
        #[arg(long)]
        conjunction: Option<String>,

        /// Fulltext field to search (repeatable)
        #[arg(long = "field")]
        fields: Vec<String>,

        /// Filter as FIELD<OP>VALUE, e.g. "views>=2" (repeatable)
        #[arg(long = "filter")]
        filters: Vec<String>,

        /// Sort as FIELD[:DESC] (repeatable)
        #[arg(long = "sort")]
        sorts: Vec<String>,

        #[arg(long)]
        offset: Option<usize>,

        #[arg(long, default_value = "10")]
        limit: usize,

        /// Restrict to languages (repeatable); language-neutral items always match
        #[arg(long = "language")]
        languages: Vec<String>,

        /// Account to check access grants for
        #[arg(long)]
        account: Option<String>,

        /// Grant held by --account (repeatable)
        #[arg(long = "grant")]
        grants: Vec<String>,

        /// Skip access checks
        #[arg(long)]
        bypass_access: bool,

        /// Print the result set as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing(verbose: u8, quiet: bool) {
    let default = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, _) => "debug",
    };
    let filter =
        EnvFilter::try_from_env("INDEXKIT_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn progress_mode(raw: Option<&str>) -> anyhow::Result<ProgressMode> {
    match raw {
        Some(raw) => ProgressMode::parse(raw),
        None => Ok(ProgressMode::default_for_tty()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Status { index } => {
            status::run_status(&cfg, index.as_deref()).await?;
        }
        Commands::Track {
            index,
            datasource,
            progress,
        } => {
            let progress = progress_mode(progress.as_deref())?;
            index_cmd::run_track(&cfg, &index, datasource.as_deref(), progress).await?;
        }
        Commands::Index {
            index,
            batch_size,
            limit,
            all,
            datasource,
            progress,
        } => {
            let limit = match (all, limit) {
                (true, _) => None,
                (false, Some(limit)) => Some(limit),
                (false, None) => Some(
                    cfg.index(&index)
                        .map(|i| i.settings.cron_limit)
                        .unwrap_or(cfg.indexing.batch_size),
                ),
            };
            let options = IndexOptions {
                batch_size: batch_size.unwrap_or(cfg.indexing.batch_size),
                limit,
                datasource: datasource.as_deref(),
                progress: progress_mode(progress.as_deref())?,
            };
            index_cmd::run_index(&cfg, &index, options).await?;
        }
        Commands::Reindex { index } => {
            index_cmd::run_reindex(&cfg, &index).await?;
        }
        Commands::Clear { index } => {
            index_cmd::run_clear(&cfg, &index).await?;
        }
        Commands::Search {
            index,
            keys,
            parse_mode,
            conjunction,
            fields,
            filters,
            sorts,
            offset,
            limit,
            languages,
            account,
            grants,
            bypass_access,
            json,
        } => {
            let args = SearchArgs {
                index,
                keys,
                parse_mode,
                conjunction,
                fields,
                filters,
                sorts,
                offset,
                limit,
                languages,
                account,
                grants,
                bypass_access,
                json,
            };
            search::run_search(&cfg, &args).await?;
        }
    }

    Ok(())
}
