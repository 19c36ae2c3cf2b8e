mod audit;
mod batch;
mod cursor;
mod encode;
mod error;
mod http;
mod link;
mod model;
mod observer;
mod parser;
mod pipeline;
mod schema;
mod settings;
mod source;
mod store;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};

use crate::error::StoreError;
use crate::link::QueryLinkBuilder;
use crate::observer::{ChannelObserver, ConsoleObserver, TaskObserver};
use crate::pipeline::{Clients, RunSummary};
use crate::settings::Settings;
use crate::source::gmail::GmailSource;
use crate::store::sheets::SheetsStore;
use crate::store::sqlite::SqliteStore;
use crate::store::TabularStore;

#[derive(Parser)]
#[command(
    name = "activity_sync",
    about = "Sync activity request emails into month-bucketed sheets"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch new request emails and write them to their month sheets
    Run {
        /// Search from this date instead of the sync log watermark (YYYY-MM-DD)
        #[arg(long)]
        since: Option<NaiveDate>,
        /// Write to the local SQLite store instead of Google Sheets
        #[arg(long)]
        local: bool,
        /// Print task events as JSON lines instead of a progress bar
        #[arg(long)]
        events: bool,
    },
    /// Write a held request using reviewer-supplied dates
    Reprocess {
        /// Message id from the held report
        id: String,
        #[arg(long)]
        start: NaiveDate,
        #[arg(long)]
        end: NaiveDate,
        #[arg(long)]
        local: bool,
    },
    /// List requests still held for review
    Held {
        #[arg(long)]
        local: bool,
    },
    /// Sync log and sheet statistics
    Stats {
        #[arg(long)]
        local: bool,
    },
    /// Dump everything extractable from a saved request email (HTML file)
    Inspect { path: PathBuf },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::load()?;

    let result = match cli.command {
        Commands::Run {
            since,
            local,
            events,
        } => {
            let store = open_store(&settings, local)?;
            let source = open_source(&settings)?;
            let links = QueryLinkBuilder::new(&settings.link_base_url);

            let summary = if events {
                let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
                let printer = tokio::spawn(async move {
                    while let Some(event) = rx.recv().await {
                        match serde_json::to_string(&event) {
                            Ok(line) => println!("{}", line),
                            Err(e) => tracing::warn!("Unprintable event: {}", e),
                        }
                    }
                });
                let observer = ChannelObserver::new(tx);
                let summary = sync(&settings, &source, store.as_ref(), &links, &observer, since).await;
                drop(observer);
                printer.await?;
                summary?
            } else {
                let observer = ConsoleObserver::new();
                let summary = sync(&settings, &source, store.as_ref(), &links, &observer, since).await;
                observer.finish();
                summary?
            };
            print_summary(&summary);
            Ok(())
        }
        Commands::Reprocess {
            id,
            start,
            end,
            local,
        } => {
            let store = open_store(&settings, local)?;
            let source = open_source(&settings)?;
            let links = QueryLinkBuilder::new(&settings.link_base_url);
            let observer = ConsoleObserver::new();
            let clients = Clients {
                source: &source,
                store: store.as_ref(),
                links: &links,
                observer: &observer,
            };
            pipeline::reprocess_held(&settings, clients, &id, start, end).await?;
            observer.finish();
            println!("{} written for {} to {}", id, start, end);
            Ok(())
        }
        Commands::Held { local } => {
            let store = open_store(&settings, local)?;
            let entries = read_log(store.as_ref(), &settings.doc_id).await?;
            match audit::held_report(&audit::still_held(&entries)) {
                Some(report) => println!("{}", report),
                None => println!("Nothing held for review."),
            }
            Ok(())
        }
        Commands::Stats { local } => {
            let store = open_store(&settings, local)?;
            let entries = read_log(store.as_ref(), &settings.doc_id).await?;
            let s = audit::stats(&entries);
            println!("Logged:    {}", s.success + s.manual + s.held + s.errors + s.skipped);
            println!("Success:   {} ({} with manual dates)", s.success + s.manual, s.manual);
            println!("Held:      {}", s.held);
            println!("Errors:    {}", s.errors);
            println!("Skipped:   {}", s.skipped);
            println!(
                "Watermark: {}",
                s.last_timestamp
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "-".into())
            );

            let structure = store.get_structure(&settings.doc_id).await?;
            let names: Vec<String> = structure
                .buckets
                .iter()
                .map(|b| b.name.clone())
                .filter(|n| n != audit::LOG_BUCKET)
                .collect();
            if !names.is_empty() {
                let counts = crate::store::row_counts(store.as_ref(), &settings.doc_id, &names).await?;
                println!("\n{:<24} | {:>5}", "Sheet", "Rows");
                println!("{}", "-".repeat(32));
                for name in &names {
                    let rows = counts.get(name).copied().unwrap_or(0).saturating_sub(1);
                    println!("{:<24} | {:>5}", truncate(name, 24), rows);
                }
            }
            Ok(())
        }
        Commands::Inspect { path } => {
            let html = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {:?}", path))?;
            let rich = parser::rich::extract_rich(&html);
            println!("{}", serde_json::to_string_pretty(&rich)?);
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

async fn sync(
    settings: &Settings,
    source: &GmailSource,
    store: &dyn TabularStore,
    links: &QueryLinkBuilder,
    observer: &dyn TaskObserver,
    since: Option<NaiveDate>,
) -> anyhow::Result<RunSummary> {
    let clients = Clients {
        source,
        store,
        links,
        observer,
    };
    Ok(pipeline::run(settings, clients, since).await?)
}

fn open_store(settings: &Settings, local: bool) -> anyhow::Result<Box<dyn TabularStore>> {
    if local {
        println!("Store: {:?}", settings.db_path);
        return Ok(Box::new(SqliteStore::open(&settings.db_path)?));
    }
    if settings.access_token.is_empty() {
        bail!("ACTSYNC_ACCESS_TOKEN is not set (or pass --local)");
    }
    Ok(Box::new(SheetsStore::new(&settings.access_token)))
}

fn open_source(settings: &Settings) -> anyhow::Result<GmailSource> {
    if settings.access_token.is_empty() {
        bail!("ACTSYNC_ACCESS_TOKEN is not set");
    }
    Ok(GmailSource::new(&settings.access_token))
}

async fn read_log(
    store: &dyn TabularStore,
    doc_id: &str,
) -> anyhow::Result<Vec<model::AuditLogEntry>> {
    match audit::read_entries(store, doc_id).await {
        Ok(entries) => Ok(entries),
        Err(StoreError::BucketNotFound(_)) => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

fn print_summary(s: &RunSummary) {
    println!(
        "Done: {} discovered in {} batch(es) ({} written, {} held, {} errors, {} skipped).",
        s.discovered, s.batches, s.done, s.held, s.errors, s.skipped
    );
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
