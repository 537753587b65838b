//! Source fetchers that turn external content into [`Article`] records.
//!
//! Every fetcher follows the same two-phase pattern:
//!
//! 1. **Indexing**: find the items (feed entries, API hits, search ids, links
//!    picked by the language model)
//! 2. **Enrichment**: fetch each item's page through the [`ContentExtractor`]
//!    to backfill full text, one URL at a time
//!
//! # Supported Sources
//!
//! | Kind | Module | Method | Notes |
//! |------|--------|--------|-------|
//! | `rss` | [`rss`] | RSS 2.0 / RDF / Atom | Several feeds per source |
//! | `news_api` | [`newsapi`] | NewsAPI `everything` | Requires `news_api_key` |
//! | `pubmed` | [`pubmed`] | E-utilities esearch + efetch | Snowball over PMIDs |
//! | `scholar` | [`scholar`] | SerpAPI Google Scholar | Snowball over title words |
//! | `blog` | [`blog`] | LLM link discovery | Requires `ai_base_url` |
//!
//! Per-item failures are logged and degrade that item. Per-source failures
//! return an error to the pipeline.
//!
//! [`ContentExtractor`]: crate::extract::ContentExtractor

pub mod blog;
pub mod newsapi;
pub mod pubmed;
pub mod rss;
pub mod scholar;
pub mod search;

use crate::api::{ChatClient, LlmSettings};
use crate::config::ConfigProvider;
use crate::error::{IngestError, Result};
use crate::http::HttpTransport;
use crate::models::{Article, FetchRequest, SourceKind};
use async_trait::async_trait;
use std::time::Duration;

pub use blog::AiDiscoveryFetcher;
pub use newsapi::NewsApiFetcher;
pub use pubmed::PubMedFetcher;
pub use rss::FeedFetcher;
pub use scholar::ScholarFetcher;

/// Common capability of every source adapter.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Retrieve and normalize the articles described by `request`.
    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<Article>>;
}

/// One variant per source kind; the pipeline holds this and never a concrete fetcher.
pub enum SourceFetcher<'a, H, C> {
    Feed(FeedFetcher<'a, H>),
    NewsApi(NewsApiFetcher<'a, H, C>),
    PubMed(PubMedFetcher<'a, H, C>),
    Scholar(ScholarFetcher<'a, H, C>),
    AiDiscovery(AiDiscoveryFetcher<'a, H, ChatClient<'a, H>>),
}

impl<'a, H: HttpTransport, C: ConfigProvider> SourceFetcher<'a, H, C> {
    /// Build the fetcher for `kind`. `page_timeout` bounds feed and article requests.
    ///
    /// Only the AI discovery variant reads configuration here, because its
    /// client cannot be built without a base URL. Credentials of the other
    /// variants are checked when they fetch.
    pub fn for_kind(kind: SourceKind, http: &'a H, config: &'a C, page_timeout: Duration) -> Result<Self> {
        let fetcher = match kind {
            SourceKind::Rss => SourceFetcher::Feed(FeedFetcher::new(http).with_timeout(page_timeout)),
            SourceKind::NewsApi => {
                SourceFetcher::NewsApi(NewsApiFetcher::new(http, config).with_timeout(page_timeout))
            }
            SourceKind::Pubmed => SourceFetcher::PubMed(PubMedFetcher::new(http, config)),
            SourceKind::Scholar => {
                SourceFetcher::Scholar(ScholarFetcher::new(http, config).with_timeout(page_timeout))
            }
            SourceKind::Blog => {
                let settings = LlmSettings::from_config(config)?;
                let prompt = settings.prompt.clone();
                SourceFetcher::AiDiscovery(
                    AiDiscoveryFetcher::new(http, ChatClient::new(http, settings), prompt)
                        .with_timeout(page_timeout),
                )
            }
        };
        Ok(fetcher)
    }
}

#[async_trait]
impl<'a, H: HttpTransport, C: ConfigProvider> Fetcher for SourceFetcher<'a, H, C> {
    fn name(&self) -> &'static str {
        match self {
            SourceFetcher::Feed(f) => f.name(),
            SourceFetcher::NewsApi(f) => f.name(),
            SourceFetcher::PubMed(f) => f.name(),
            SourceFetcher::Scholar(f) => f.name(),
            SourceFetcher::AiDiscovery(f) => f.name(),
        }
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<Article>> {
        match self {
            SourceFetcher::Feed(f) => f.fetch(request).await,
            SourceFetcher::NewsApi(f) => f.fetch(request).await,
            SourceFetcher::PubMed(f) => f.fetch(request).await,
            SourceFetcher::Scholar(f) => f.fetch(request).await,
            SourceFetcher::AiDiscovery(f) => f.fetch(request).await,
        }
    }
}

/// Keep at most `max_items` entries; `0` keeps everything.
pub fn take_limit<T>(mut items: Vec<T>, max_items: usize) -> Vec<T> {
    if max_items > 0 {
        items.truncate(max_items);
    }
    items
}

/// Items still allowed after `collected` have been gathered, or `None` when the cap is reached.
///
/// Returns `Some(0)` for an unlimited cap so callers can pass it straight on.
pub(crate) fn remaining(max_items: usize, collected: usize) -> Option<usize> {
    match max_items {
        0 => Some(0),
        max if collected < max => Some(max - collected),
        _ => None,
    }
}

/// Error for a request handed to a fetcher of another kind.
pub(crate) fn kind_mismatch(fetcher: &str, request: &FetchRequest) -> IngestError {
    IngestError::Configuration(format!(
        "source {} is of kind {}, not handled by the {fetcher} fetcher",
        request.id,
        request.source.kind()
    ))
}
