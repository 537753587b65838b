//! Command-line interface definitions for `news_ingest`.
//!
//! Global options can also come from environment variables, so a scheduler
//! only has to pass the subcommand and the source id.

use crate::pipeline::RunScope;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// Ingest articles from configured sources into a deduplicated content store.
///
/// # Examples
///
/// ```sh
/// # Run whatever kind of source `tech` is
/// news_ingest --config ./config.yaml run tech
///
/// # Only accept search sources, with a shorter page timeout
/// news_ingest --timeout 10 run-search papers
///
/// # Read tracking
/// news_ingest unread
/// news_ingest mark-read 42
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to the YAML config file (settings and sources)
    #[arg(short, long, env = "NEWS_INGEST_CONFIG", default_value = "config.yaml", global = true)]
    pub config: PathBuf,

    /// Path to the JSON content store
    #[arg(short, long, env = "NEWS_INGEST_STORE", default_value = "store.json", global = true)]
    pub store: PathBuf,

    /// Timeout in seconds for feed and article page requests
    #[arg(short, long, env = "NEWS_INGEST_TIMEOUT", global = true)]
    pub timeout: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn page_timeout(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_secs)
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Fetch and publish one source of any kind
    Run { id: String },
    /// Fetch and publish an `rss` or `news_api` source
    RunFeed { id: String },
    /// Fetch and publish a `pubmed` or `scholar` source
    RunSearch { id: String },
    /// Fetch and publish a `blog` source through AI link discovery
    RunAi { id: String },
    /// List configured sources
    Sources,
    /// List unread entries in the content store
    Unread,
    /// Mark an entry as read
    MarkRead { entry_id: u64 },
    /// Mark an entry as unread
    MarkUnread { entry_id: u64 },
}

impl Command {
    /// Source id and accepted kinds of a `run*` subcommand.
    pub fn source_run(&self) -> Option<(&str, RunScope)> {
        match self {
            Command::Run { id } => Some((id, RunScope::Any)),
            Command::RunFeed { id } => Some((id, RunScope::Feed)),
            Command::RunSearch { id } => Some((id, RunScope::Search)),
            Command::RunAi { id } => Some((id, RunScope::AiDiscovery)),
            _ => None,
        }
    }
}
