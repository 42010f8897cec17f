//! sourceintel CLI entry point

use clap::{Parser, Subcommand};
use serde::Serialize;
use sourceintel::{
    commands::{
        cmd_add_source, cmd_crawl, cmd_detect, cmd_enrich, cmd_history, cmd_init, cmd_list_signals,
        cmd_list_sources, cmd_put, cmd_remove_source, cmd_resolve, cmd_review, cmd_runs,
        cmd_set_source_config, cmd_set_source_enabled, cmd_set_source_trust, cmd_show_listing,
        cmd_snapshot_history, cmd_status, print_ingest_stats, print_listing, print_put_outcome,
        print_resolve_report, print_runs, print_signals, print_snapshots, print_sources,
        print_status, print_transitions, PutOptions,
    },
    config::Config,
    error::{Error, Result},
    meta::{SignalFilter, SignalStatus, SignalType, SourceType},
    progress::LogWriterFactory,
    Pipeline,
};
use std::path::PathBuf;
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "sourceintel")]
#[command(version, about = "Listing snapshots, entity resolution and anomaly signals", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize configuration and database
    Init {
        /// Force overwrite existing config
        #[arg(long)]
        force: bool,
    },

    /// Manage listing sources
    Source {
        #[command(subcommand)]
        action: SourceAction,
    },

    /// Ingest a JSON Lines crawl feed for a source
    Crawl {
        /// Source ID or name
        source: String,

        /// Feed file, one crawl item per line
        file: PathBuf,

        /// Hide the progress bar
        #[arg(long)]
        no_progress: bool,
    },

    /// Store a single snapshot
    Put {
        /// Source ID or name
        source: String,

        /// Listing ID on the source
        external_id: String,

        /// Page URL the capture came from
        #[arg(long)]
        url: String,

        /// Raw HTML file
        #[arg(long)]
        html: Option<PathBuf>,

        /// Raw JSON file
        #[arg(long)]
        json_file: Option<PathBuf>,

        /// Attach to an open crawl run
        #[arg(long)]
        run: Option<String>,
    },

    /// Record image enrichment for a snapshot
    Enrich {
        snapshot_id: String,

        /// Record a failed enrichment with this message
        #[arg(long)]
        error: Option<String>,
    },

    /// Resolve a snapshot into an observed listing
    Resolve {
        snapshot_id: String,

        /// JSON file with extracted listing fields
        #[arg(long)]
        fields: Option<PathBuf>,
    },

    /// Show an observed listing
    Listing { listing_id: String },

    /// Capture history of one external listing
    Snapshots {
        /// Source ID or name
        source: String,
        external_id: String,
    },

    /// Re-run signal detection for a listing
    Detect { listing_id: String },

    /// List signals
    Signals {
        /// OPEN, UNDER_REVIEW, CONFIRMED or DISMISSED
        #[arg(long)]
        status: Option<String>,

        /// Signal type, e.g. DUPLICATE_LISTING
        #[arg(long = "type")]
        signal_type: Option<String>,

        /// Only signals raised against this listing
        #[arg(long)]
        listing: Option<String>,

        #[arg(short, long)]
        limit: Option<i64>,
    },

    /// Move a signal through review
    Review {
        signal_id: String,

        /// Target status
        status: String,

        /// Reviewer identity
        #[arg(long, env = "SOURCEINTEL_ACTOR")]
        actor: String,
    },

    /// Review history of a signal
    History { signal_id: String },

    /// Recent crawl runs of a source
    Runs {
        /// Source ID or name
        source: String,

        #[arg(short, long, default_value = "10")]
        limit: i64,
    },

    /// Show system status
    Status,
}

#[derive(Subcommand)]
enum SourceAction {
    /// Register a source
    Add {
        /// Unique source name
        name: String,

        /// portal, mls, brokerage, classifieds, aggregator or other
        #[arg(long = "type", default_value = "other")]
        source_type: String,

        /// Base URL of the source
        #[arg(long)]
        url: String,

        /// Trust score (0-100)
        #[arg(long, default_value = "50")]
        trust: i64,
    },

    /// List registered sources
    List,

    /// Enable a source
    Enable { source: String },

    /// Disable a source; new crawls and puts are refused
    Disable { source: String },

    /// Set a source's trust score
    Trust { source: String, score: i64 },

    /// Set or clear a source's crawler config JSON
    Config {
        source: String,

        /// JSON text; omit to clear
        value: Option<String>,
    },

    /// Remove a source with no snapshots
    Remove { source: String },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let json_layer = cli
        .log_json
        .then(|| fmt::layer().json().with_writer(LogWriterFactory::default()));
    let text_layer = (!cli.log_json).then(|| fmt::layer().with_writer(LogWriterFactory::default()));

    tracing_subscriber::registry()
        .with(json_layer)
        .with(text_layer)
        .with(filter)
        .init();

    // Init runs before any config exists
    if matches!(cli.command, Commands::Init { .. }) {
        return handle_init(cli).await;
    }

    let config = load_config(cli.config.as_deref())?;
    let pipeline = Pipeline::open(config.clone()).await?;
    if !pipeline.db.is_initialized().await? {
        return Err(Error::NotInitialized);
    }
    let db = &pipeline.db;
    let json = cli.json;

    match cli.command {
        Commands::Init { .. } => unreachable!(),

        Commands::Source { action } => handle_source(&pipeline, action, json).await?,

        Commands::Crawl {
            source,
            file,
            no_progress,
        } => {
            let show_progress = !no_progress && !json;
            let stats = cmd_crawl(&pipeline, &source, &file, show_progress).await?;
            emit(json, &stats, print_ingest_stats)?;
        }

        Commands::Put {
            source,
            external_id,
            url,
            html,
            json_file,
            run,
        } => {
            let options = PutOptions {
                source_key: &source,
                external_id: &external_id,
                source_url: &url,
                html_file: html.as_deref(),
                json_file: json_file.as_deref(),
                crawl_run_id: run,
            };
            let outcome = cmd_put(&pipeline, options).await?;
            emit(json, &outcome, print_put_outcome)?;
        }

        Commands::Enrich { snapshot_id, error } => {
            let snapshot = cmd_enrich(&pipeline, &snapshot_id, error.as_deref()).await?;
            emit(json, &snapshot, |s| print_snapshots(std::slice::from_ref(s)))?;
        }

        Commands::Resolve {
            snapshot_id,
            fields,
        } => {
            let report = cmd_resolve(&pipeline, &snapshot_id, fields.as_deref()).await?;
            emit(json, &report, print_resolve_report)?;
        }

        Commands::Listing { listing_id } => {
            let listing = cmd_show_listing(&pipeline, &listing_id).await?;
            emit(json, &listing, print_listing)?;
        }

        Commands::Snapshots {
            source,
            external_id,
        } => {
            let snapshots = cmd_snapshot_history(&pipeline, &source, &external_id).await?;
            emit(json, &snapshots, |s| print_snapshots(s))?;
        }

        Commands::Detect { listing_id } => {
            let signals = cmd_detect(&pipeline, &listing_id).await?;
            emit(json, &signals, |s| print_signals(s))?;
        }

        Commands::Signals {
            status,
            signal_type,
            listing,
            limit,
        } => {
            let filter = SignalFilter {
                status: status.as_deref().map(str::parse::<SignalStatus>).transpose()?,
                signal_type: signal_type
                    .as_deref()
                    .map(str::parse::<SignalType>)
                    .transpose()?,
                observed_listing_id: listing,
                limit,
            };
            let signals = cmd_list_signals(db, &filter).await?;
            emit(json, &signals, |s| print_signals(s))?;
        }

        Commands::Review {
            signal_id,
            status,
            actor,
        } => {
            let to: SignalStatus = status.parse()?;
            let signal = cmd_review(&pipeline, &signal_id, to, &actor).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&signal)?);
            } else {
                println!("✓ Signal {} is now {}", signal.id, signal.status);
            }
        }

        Commands::History { signal_id } => {
            let transitions = cmd_history(&pipeline, &signal_id).await?;
            emit(json, &transitions, |t| print_transitions(t))?;
        }

        Commands::Runs { source, limit } => {
            let runs = cmd_runs(&pipeline, &source, limit).await?;
            emit(json, &runs, |r| print_runs(r))?;
        }

        Commands::Status => {
            let status = cmd_status(&config, db).await?;
            emit(json, &status, print_status)?;
        }
    }

    Ok(())
}

/// Print as pretty JSON or through the human formatter
fn emit<T: Serialize + ?Sized>(json: bool, value: &T, print: impl FnOnce(&T)) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        print(value);
    }
    Ok(())
}

async fn handle_init(cli: Cli) -> Result<()> {
    let Commands::Init { force } = cli.command else {
        unreachable!()
    };

    // A --config path names either the config file or its directory
    let base_dir = cli.config.map(|path| {
        if path.extension().map_or(false, |e| e == "toml") {
            path.parent()
                .map(PathBuf::from)
                .unwrap_or_else(Config::default_base_dir)
        } else {
            path
        }
    });

    let report = cmd_init(base_dir, force).await?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("✓ sourceintel initialized successfully");
    println!("  Config: {}", report.config_path.display());
    println!("  Database: {}", report.db_path.display());
    println!("\nNext steps:");
    println!("  1. Register a source: sourceintel source add <name> --url <base-url>");
    println!("  2. Ingest a feed: sourceintel crawl <name> feed.jsonl");
    println!("  3. Review signals: sourceintel signals --status OPEN");

    Ok(())
}

async fn handle_source(pipeline: &Pipeline, action: SourceAction, json: bool) -> Result<()> {
    let db = &pipeline.db;

    let changed = match action {
        SourceAction::Add {
            name,
            source_type,
            url,
            trust,
        } => {
            let source_type: SourceType = source_type.parse()?;
            cmd_add_source(db, &name, source_type, &url, trust).await?
        }
        SourceAction::List => {
            let sources = cmd_list_sources(db).await?;
            return emit(json, &sources, |s| print_sources(s));
        }
        SourceAction::Enable { source } => cmd_set_source_enabled(db, &source, true).await?,
        SourceAction::Disable { source } => cmd_set_source_enabled(db, &source, false).await?,
        SourceAction::Trust { source, score } => cmd_set_source_trust(db, &source, score).await?,
        SourceAction::Config { source, value } => {
            cmd_set_source_config(db, &source, value).await?
        }
        SourceAction::Remove { source } => {
            let removed = cmd_remove_source(db, &source).await?;
            if !json {
                println!("✓ Removed source {} ({})", removed.name, removed.id);
                return Ok(());
            }
            removed
        }
    };

    emit(json, &changed, |s| {
        let state = if s.enabled { "enabled" } else { "disabled" };
        println!("✓ {} [{}] trust {} ({})", s.name, s.source_type, s.trust_score, state);
        println!("  ID: {}", s.id);
    })
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    let config_path = path
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_config_path);

    if !config_path.exists() {
        return Err(Error::NotInitialized);
    }

    Config::load(&config_path)
}
