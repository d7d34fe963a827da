use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use tidemark::config::Config;
use tidemark::query::list_items;
use tidemark::sources::SourceRegistry;
use tidemark::storage::{Database, DatabaseError, QueryFilter};
use tidemark::sync::{CycleReport, CycleStatus, HighWaterMark, PersistOutcome, Synchronizer};
use tidemark::transport::Transport;

#[derive(Parser, Debug)]
#[command(
    name = "tidemark",
    version,
    about = "Local cache of remote integer-indexed collections"
)]
struct Args {
    /// Configuration file
    #[arg(long, value_name = "FILE", default_value = "tidemark.toml")]
    config: PathBuf,

    /// Database file (overrides the config file)
    #[arg(long, value_name = "FILE")]
    db: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one catch-up cycle (every source when no slug is given)
    Sync { source: Option<String> },

    /// Sync a source, then print a page of its cached items as JSON
    List {
        source: String,

        #[arg(long)]
        offset: Option<u32>,

        #[arg(long)]
        limit: Option<u32>,

        /// Only items dated in this year
        #[arg(long)]
        year: Option<i64>,

        /// Read the cache without syncing first
        #[arg(long)]
        no_sync: bool,
    },

    /// Show configured sources and their high-water marks
    Sources,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = Config::load_with_env(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;
    let registry = SourceRegistry::from_config(&config).context("Invalid source configuration")?;

    let db_path = args.db.as_deref().unwrap_or(&config.database);
    let db = match Database::open(db_path).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!("Error: {db_path} is locked by another process. Please try again.");
            std::process::exit(1);
        }
        Err(e) => return Err(anyhow::anyhow!("Failed to open database: {}", e)),
    };
    db.seed_sources(&registry.seeds())
        .await
        .context("Failed to seed sources")?;

    let transport = Transport::build(&config.user_agent, config.concurrency)
        .context("Failed to build HTTP client")?;
    let sync = Synchronizer::new(db.clone(), transport, Arc::new(registry));

    match args.command {
        Command::Sync { source: Some(slug) } => {
            let report = sync.update_cache(&slug).await?;
            print_report(&report);
        }
        Command::Sync { source: None } => {
            let mut failed = false;
            for (slug, result) in sync.update_all().await {
                match result {
                    Ok(report) => print_report(&report),
                    Err(e) => {
                        eprintln!("{slug}: {e}");
                        failed = true;
                    }
                }
            }
            if failed {
                std::process::exit(1);
            }
        }
        Command::List {
            source,
            offset,
            limit,
            year,
            no_sync,
        } => {
            let registered = sync.registry().get(&source)?;
            let filter = QueryFilter::new(offset, limit, year, registered.default_limit)?;
            let response = list_items(&sync, &source, &filter, !no_sync).await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&response).context("Failed to encode response")?
            );
        }
        Command::Sources => {
            for source in db.list_sources().await.context("Failed to list sources")? {
                let cached = db
                    .count_entries(source.id)
                    .await
                    .with_context(|| format!("Failed to count entries for {}", source.slug))?;
                println!(
                    "{:<12} {:<12} latest={:<8} cached={:<8} checked={}",
                    source.slug,
                    source.name,
                    source.latest_index,
                    cached,
                    source.check_at.as_deref().unwrap_or("never"),
                );
            }
        }
    }

    Ok(())
}

fn print_report(report: &CycleReport) {
    let status = match report.status {
        CycleStatus::UpToDate => "up to date".to_string(),
        CycleStatus::Completed => "synced".to_string(),
        CycleStatus::TimedOut(phase) => format!("timed out while {phase:?}"),
    };
    println!(
        "{}: {} (remote {}, {} new, latest {})",
        report.source,
        status,
        report.probe.remote_index(),
        report.inserted(),
        report.latest_index(),
    );

    for batch in &report.batches {
        if let PersistOutcome::Failed(reason) = &batch.persist {
            eprintln!("  batch of {} failed to persist: {reason}", batch.requested);
        }
    }
    if let HighWaterMark::UpdateFailed { reason, .. } = &report.high_water_mark {
        eprintln!("  latest index not advanced: {reason}");
    }
}
