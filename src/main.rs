//! # news_ingest
//!
//! Pulls articles from news APIs, RSS/Atom feeds, PubMed, Google Scholar and
//! blogs (through LLM link discovery) and publishes them into a JSON content
//! store, skipping anything already published.
//!
//! ## Usage
//!
//! ```sh
//! news_ingest --config config.yaml --store store.json run tech
//! news_ingest unread
//! ```
//!
//! Exit code 0 on success, 1 when the source run or store operation fails.

use clap::Parser;
use news_ingest::cli::{Cli, Command};
use news_ingest::config::AppConfig;
use news_ingest::error::Result;
use news_ingest::http::ReqwestTransport;
use news_ingest::pipeline::{Pipeline, RunScope};
use news_ingest::store::{ContentStore, JsonFileStore, ReadStatus, StoredEntry};
use std::error::Error;
use std::process::ExitCode;
use tracing::{debug, error, info, instrument};
use tracing_subscriber::{fmt as tfmt, EnvFilter};

#[tokio::main]
async fn main() -> std::result::Result<ExitCode, Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("news_ingest starting up");

    let args = Cli::parse();
    debug!(config = %args.config.display(), store = %args.store.display(), command = ?args.command, "Parsed CLI arguments");

    let code = match &args.command {
        Command::Run { id } | Command::RunFeed { id } | Command::RunSearch { id } | Command::RunAi { id } => {
            let scope = args.command.source_run().map_or(RunScope::Any, |(_, scope)| scope);
            run_source(&args, id, scope).await?
        }
        Command::Sources => {
            let config = AppConfig::load(&args.config).await?;
            for source in &config.sources {
                println!(
                    "{}\t{}\t{}\tcategory={}\tmax_items={}",
                    source.id,
                    source.source.kind(),
                    source.content_type,
                    source.category_id,
                    source.max_items
                );
            }
            ExitCode::SUCCESS
        }
        Command::Unread => {
            let store = JsonFileStore::open(&args.store).await?;
            let unread = store.list(Some(ReadStatus::Unread)).await?;
            info!(count = unread.len(), "Listing unread entries");
            for entry in &unread {
                println!("{}", entry_line(entry));
            }
            ExitCode::SUCCESS
        }
        Command::MarkRead { entry_id } => mark(&args, *entry_id, ReadStatus::Read).await?,
        Command::MarkUnread { entry_id } => mark(&args, *entry_id, ReadStatus::Unread).await?,
    };

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        "Execution complete"
    );
    Ok(code)
}

/// Fetch and publish one source.
#[instrument(level = "info", skip(args))]
async fn run_source(args: &Cli, id: &str, scope: RunScope) -> Result<ExitCode> {
    let config = AppConfig::load(&args.config).await?;
    let http = ReqwestTransport::new()?;
    let store = JsonFileStore::open(&args.store).await?;

    let mut pipeline = Pipeline::new(&http, &config, &store);
    if let Some(timeout) = args.page_timeout() {
        pipeline = pipeline.with_page_timeout(timeout);
    }

    let report = pipeline.run(id, scope).await;

    if report.is_success() {
        println!("{report}");
    } else {
        eprintln!("{report}");
    }
    Ok(report.exit_code())
}

async fn mark(args: &Cli, entry_id: u64, status: ReadStatus) -> Result<ExitCode> {
    let store = JsonFileStore::open(&args.store).await?;
    match store.set_read_status(entry_id, status).await {
        Ok(entry) => {
            println!("{}", entry_line(&entry));
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            error!(entry_id, error = %e, "Failed to update read status");
            eprintln!("{e}");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn entry_line(entry: &StoredEntry) -> String {
    format!(
        "{}\t{}\t{}\t{}\t{}",
        entry.id,
        entry.created_at.to_rfc3339(),
        if entry.read_status == ReadStatus::Read { "read" } else { "unread" },
        entry.title,
        entry.source_link().unwrap_or_default()
    )
}
