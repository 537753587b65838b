//! Fetch-then-publish driver for one configured source.
//!
//! A run looks the source up by id, builds the matching [`SourceFetcher`],
//! fetches its articles and hands them to the [`Publisher`]. Whatever
//! happens, the caller gets a [`RunReport`]; errors never escape as `Err`.

use crate::config::{AppConfig, ConfigProvider};
use crate::error::{IngestError, Result};
use crate::fetchers::{Fetcher, SourceFetcher};
use crate::http::{HttpTransport, PAGE_TIMEOUT};
use crate::models::{PublishResult, SourceKind};
use crate::publish::Publisher;
use crate::store::ContentStore;
use itertools::Itertools;
use std::error::Error as StdError;
use std::fmt;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info, instrument};

/// Result of running one source.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Published(PublishResult),
    Failed {
        /// [`IngestError::kind`] of the error that ended the run.
        kind: &'static str,
        message: String,
        /// Cause chain, only in debug mode.
        trace: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub source_id: String,
    pub outcome: RunOutcome,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, RunOutcome::Published(_))
    }

    pub fn exit_code(&self) -> ExitCode {
        if self.is_success() {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        }
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            RunOutcome::Published(result) => write!(
                f,
                "{}: published {} new article(s) [{}]",
                self.source_id,
                result.count,
                result.created_ids.iter().join(", ")
            ),
            RunOutcome::Failed { message, trace, .. } => {
                write!(f, "{}: failed: {message}", self.source_id)?;
                if let Some(trace) = trace {
                    write!(f, "\n{trace}")?;
                }
                Ok(())
            }
        }
    }
}

/// Debug representation of `err` followed by its `source()` chain.
fn error_trace(err: &IngestError) -> String {
    let mut trace = format!("{err:?}");
    let mut cause = err.source();
    while let Some(inner) = cause {
        trace.push_str(&format!("\n  caused by: {inner}"));
        cause = inner.source();
    }
    trace
}

/// Source kinds a run accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunScope {
    Any,
    /// `rss` and `news_api`
    Feed,
    /// `pubmed` and `scholar`
    Search,
    /// `blog`
    AiDiscovery,
}

impl RunScope {
    fn allowed(self) -> Option<&'static [SourceKind]> {
        match self {
            RunScope::Any => None,
            RunScope::Feed => Some(&[SourceKind::Rss, SourceKind::NewsApi]),
            RunScope::Search => Some(&[SourceKind::Pubmed, SourceKind::Scholar]),
            RunScope::AiDiscovery => Some(&[SourceKind::Blog]),
        }
    }
}

/// Runs configured sources against a content store.
pub struct Pipeline<'a, H, S> {
    http: &'a H,
    config: &'a AppConfig,
    store: &'a S,
    page_timeout: Duration,
}

impl<'a, H: HttpTransport, S: ContentStore> Pipeline<'a, H, S> {
    pub fn new(http: &'a H, config: &'a AppConfig, store: &'a S) -> Self {
        Self {
            http,
            config,
            store,
            page_timeout: PAGE_TIMEOUT,
        }
    }

    /// Timeout of feed and article page requests. Search and LLM calls keep their own.
    pub fn with_page_timeout(mut self, timeout: Duration) -> Self {
        self.page_timeout = timeout;
        self
    }

    /// Run any source, whatever its kind.
    pub async fn run_source(&self, id: &str) -> RunReport {
        self.run(id, RunScope::Any).await
    }

    /// Run an `rss` or `news_api` source.
    pub async fn run_feed_source(&self, id: &str) -> RunReport {
        self.run(id, RunScope::Feed).await
    }

    /// Run a `pubmed` or `scholar` source.
    pub async fn run_search_source(&self, id: &str) -> RunReport {
        self.run(id, RunScope::Search).await
    }

    /// Run a `blog` source.
    pub async fn run_ai_discovery_source(&self, id: &str) -> RunReport {
        self.run(id, RunScope::AiDiscovery).await
    }

    /// Run `id`, failing with a configuration error when its kind is outside `scope`.
    #[instrument(level = "info", skip_all, fields(source = %id, ?scope))]
    pub async fn run(&self, id: &str, scope: RunScope) -> RunReport {
        let outcome = match self.fetch_and_publish(id, scope).await {
            Ok(result) => {
                info!(count = result.count, ids = ?result.created_ids, "Source run succeeded");
                RunOutcome::Published(result)
            }
            Err(e) => {
                error!(kind = e.kind(), error = %e, "Source run failed");
                RunOutcome::Failed {
                    kind: e.kind(),
                    message: e.to_string(),
                    trace: self.config.debug_mode().then(|| error_trace(&e)),
                }
            }
        };
        RunReport {
            source_id: id.to_string(),
            outcome,
        }
    }

    async fn fetch_and_publish(&self, id: &str, scope: RunScope) -> Result<PublishResult> {
        let request = self.config.source(id)?;
        let kind = request.source.kind();
        if let Some(allowed) = scope.allowed() {
            if !allowed.contains(&kind) {
                return Err(IngestError::Configuration(format!(
                    "source {id} is of kind {kind}, expected one of: {}",
                    allowed.iter().join(", ")
                )));
            }
        }

        let fetcher = SourceFetcher::for_kind(kind, self.http, self.config, self.page_timeout)?;
        info!(fetcher = fetcher.name(), %kind, "Fetching source");
        let articles = fetcher.fetch(request).await?;
        info!(count = articles.len(), "Fetched articles");

        Publisher::new(self.store).publish(&articles, &request.target()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::testing::FakeTransport;
    use crate::models::ContentType;
    use crate::store::MemoryStore;

    const CONFIG: &str = r#"
settings:
  debug: "true"
sources:
  - id: tech
    category_id: 3
    tag_ids: [7]
    source:
      kind: rss
      feed_urls: ["https://feeds.example.com/tech.xml"]
  - id: papers
    source:
      kind: pubmed
      query: "crispr"
  - id: blogs
    source:
      kind: blog
      seed_urls: ["https://blog.example.com/"]
"#;

    const FEED: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>Tech</title>
  <item><title>First post</title><link>https://news.example.com/1</link><description>One</description></item>
  <item><title>Second</title><link>https://news.example.com/2</link><description>Two</description></item>
</channel></rss>"#;

    fn http() -> FakeTransport {
        FakeTransport::new().route("https://feeds.example.com/tech.xml", 200, FEED)
    }

    #[tokio::test]
    async fn test_feed_source_publishes_then_dedups() {
        let config = AppConfig::from_yaml(CONFIG).unwrap();
        let http = http();
        let store = MemoryStore::new();
        let pipeline = Pipeline::new(&http, &config, &store);

        let report = pipeline.run_feed_source("tech").await;
        assert!(report.is_success(), "{report}");
        assert_eq!(
            report.outcome,
            RunOutcome::Published(PublishResult::from_ids(vec![1, 2]))
        );
        assert_eq!(report.to_string(), "tech: published 2 new article(s) [1, 2]");
        assert!(store.exists("https://news.example.com/1", ContentType::Post).await.unwrap());
        let entry = store.get(1).await.unwrap().unwrap();
        assert_eq!(entry.title, "First post");
        assert_eq!(entry.category_id, Some(3));

        let again = pipeline.run_source("tech").await;
        assert_eq!(again.outcome, RunOutcome::Published(PublishResult::default()));
    }

    #[tokio::test]
    async fn test_kind_mismatch_fails_before_network() {
        let config = AppConfig::from_yaml(CONFIG).unwrap();
        let http = http();
        let store = MemoryStore::new();
        let pipeline = Pipeline::new(&http, &config, &store);

        let report = pipeline.run_search_source("tech").await;
        assert!(!report.is_success());
        assert!(matches!(report.outcome, RunOutcome::Failed { kind: "configuration", .. }));
        assert!(http.requests().is_empty());
    }

    #[tokio::test]
    async fn test_missing_credential_reports_with_trace_in_debug_mode() {
        let config = AppConfig::from_yaml(CONFIG).unwrap();
        let http = http();
        let store = MemoryStore::new();
        let pipeline = Pipeline::new(&http, &config, &store);

        let report = pipeline.run_search_source("papers").await;
        match &report.outcome {
            RunOutcome::Failed { kind, message, trace } => {
                assert_eq!(*kind, "configuration");
                assert!(message.contains("PubMed API key"));
                assert!(trace.as_deref().unwrap().starts_with("Configuration("));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(report.to_string().starts_with("papers: failed: configuration error"));
    }

    #[tokio::test]
    async fn test_unknown_source_and_missing_llm_settings() {
        let config = AppConfig::from_yaml(CONFIG).unwrap();
        let http = http();
        let store = MemoryStore::new();
        let pipeline = Pipeline::new(&http, &config, &store);

        let unknown = pipeline.run_source("nope").await;
        assert!(matches!(unknown.outcome, RunOutcome::Failed { kind: "configuration", .. }));

        let blog = pipeline.run_ai_discovery_source("blogs").await;
        assert!(matches!(blog.outcome, RunOutcome::Failed { kind: "configuration", .. }));
        assert!(http.requests().is_empty());
    }

    #[tokio::test]
    async fn test_feed_failure_is_reported_without_trace_outside_debug() {
        let config = AppConfig::from_yaml(&CONFIG.replace("debug: \"true\"", "debug: \"false\"")).unwrap();
        let http = FakeTransport::new().route("https://feeds.example.com/tech.xml", 503, "down");
        let store = MemoryStore::new();
        let pipeline = Pipeline::new(&http, &config, &store);

        let report = pipeline.run_source("tech").await;
        assert!(matches!(
            report.outcome,
            RunOutcome::Failed { kind: "fetch", trace: None, .. }
        ));
        assert!(store.list(None).await.unwrap().is_empty());
    }
}
