//! Vendor sync command line
//!
//! # Usage
//!
//! ```bash
//! # Reconcile one vendor feed against the catalog
//! vendor_sync run --config vendors/acme.yaml
//!
//! # Compute decisions and audit them without writing vendor facts
//! vendor_sync run --config vendors/acme.yaml --dry-run --format json
//!
//! # Validate a vendor config (including secret env vars)
//! vendor_sync check-config --config vendors/acme.yaml
//!
//! # Remove every vendor fact for the vendor before a structural resync
//! vendor_sync reset --config vendors/acme.yaml --yes
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::watch;

use vendor_sync::checkpoint::{CheckpointStore, FileCheckpointStore};
use vendor_sync::engine::{RunReport, SyncEngine};
use vendor_sync::store::{DatabaseConfig, PgStore, VendorFactStore};
use vendor_sync::{logging, RunConfig};

#[derive(Parser)]
#[command(name = "vendor_sync")]
#[command(version)]
#[command(about = "Reconcile vendor price and inventory feeds against the product catalog")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format for the run summary
    #[arg(long, short = 'o', global = true, default_value = "text", value_enum)]
    format: OutputFormat,

    /// Increase log verbosity (-v debug, -vv trace); RUST_LOG wins when set
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Text,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one vendor sync until the feed is exhausted or interrupted
    Run {
        #[arg(short, long)]
        config: PathBuf,

        /// Decide and audit without writing vendor facts or checkpoints
        #[arg(long)]
        dry_run: bool,
    },

    /// Delete all vendor facts for the configured vendor
    Reset {
        #[arg(short, long)]
        config: PathBuf,

        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },

    /// Parse and validate a vendor config
    CheckConfig {
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let result = match cli.command {
        Commands::Run { config, dry_run } => cmd_run(&config, dry_run, cli.format).await,
        Commands::Reset { config, yes } => cmd_reset(&config, yes).await,
        Commands::CheckConfig { config } => cmd_check_config(&config),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            if cli.format == OutputFormat::Json {
                let body = serde_json::json!({ "error": format!("{e:#}") });
                println!("{body}");
            } else {
                eprintln!("error: {e:#}");
            }
            ExitCode::FAILURE
        }
    }
}

// =============================================================================
// COMMAND IMPLEMENTATIONS
// =============================================================================

async fn connect(config: &RunConfig) -> Result<PgStore> {
    let mut db = DatabaseConfig::default();
    if let Some(query) = &config.catalog_query {
        db.catalog_query = query.clone();
    }
    PgStore::connect(&db)
        .await
        .context("Failed to connect to the catalog database")
}

async fn cmd_run(path: &Path, dry_run: bool, format: OutputFormat) -> Result<u8> {
    let mut config = RunConfig::from_file(path)?;
    config.dry_run |= dry_run;

    let store = Arc::new(connect(&config).await?);
    let engine = SyncEngine::from_config(config, store.clone(), store)?;

    let (tx, shutdown) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping after the current record");
            let _ = tx.send(true);
        }
    });

    let report = engine.run(shutdown).await;
    print_report(&report, format)?;
    Ok(report.exit_code())
}

async fn cmd_reset(path: &Path, yes: bool) -> Result<u8> {
    let config = RunConfig::from_file(path)?;
    if !yes {
        eprintln!(
            "This deletes every vendor fact for '{}'. Re-run with --yes to confirm.",
            config.vendor_id
        );
        return Ok(1);
    }

    let store = connect(&config).await?;
    let removed = store
        .clear_vendor(&config.vendor_id)
        .await
        .with_context(|| format!("Failed to clear vendor facts for {}", config.vendor_id))?;

    if let Some(checkpoint) = &config.checkpoint.path {
        FileCheckpointStore::new(checkpoint)
            .clear()
            .await
            .context("Failed to remove checkpoint")?;
    }

    println!("Removed {} vendor facts for {}", removed, config.vendor_id);
    Ok(0)
}

fn cmd_check_config(path: &Path) -> Result<u8> {
    let config = RunConfig::from_file(path)?;
    let source = config.build_source()?;
    println!(
        "OK: vendor '{}' source '{}'",
        config.vendor_id,
        source.source_id()
    );
    Ok(0)
}

fn print_report(report: &RunReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let body = serde_json::json!({
                "state": report.state.to_string(),
                "summary": report.summary,
                "error": report.fatal.as_ref().map(|e| e.to_string()),
            });
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        OutputFormat::Text => {
            let s = &report.summary;
            let c = &s.counters;
            println!("Vendor {} ({}) run {}: {}", s.vendor_id, s.source_id, s.run_id, report.state);
            if let Some(page) = s.resumed_from_page {
                println!("  resumed from page {page}");
            }
            println!("  pages:      {} fetched, {} failed", c.pages_fetched, c.pages_failed);
            println!("  records:    {}", c.records_seen);
            println!("  created:    {}", c.created);
            println!("  updated:    {}", c.updated);
            println!(
                "  skipped:    {} ({} already correct, {} without cost)",
                c.skipped(),
                c.skipped_unchanged,
                c.skipped_no_cost
            );
            println!("  unmatched:  {}", c.unmatched);
            println!("  dropped:    {}", c.dropped);
            println!("  errors:     {}", c.errors);
            println!(
                "  duplicates: {} removed, {} repeated in feed",
                c.duplicates_removed, c.duplicates_in_feed
            );
            println!(
                "  catalog:    {} keys, {} collisions",
                s.catalog_entries, s.catalog_collisions
            );
            if let Some(e) = &report.fatal {
                println!("  fatal:      {e}");
            }
        }
    }
    Ok(())
}
