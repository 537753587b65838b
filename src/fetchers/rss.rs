//! RSS 2.0, RSS 1.0 (RDF) and Atom feed reader.
//!
//! The feed is parsed into an [`XmlElement`] tree, each entry is normalized
//! into an [`Article`], and every entry with a usable link is enriched with
//! the page's main text through the [`ContentExtractor`].
//!
//! # Field preference
//!
//! | Field | RSS | Atom |
//! |-------|-----|------|
//! | content | `content:encoded`, `content`, `description` | `content`, `summary` |
//! | link | `link`, `url`, `guid` (if a URL), `enclosure@url` | `link@href` (alternate first), `id` (if a URL) |
//! | date | `pubDate`, `dc:date` | `published`, `updated` |

use super::{kind_mismatch, remaining, Fetcher};
use crate::error::{IngestError, Result};
use crate::extract::ContentExtractor;
use crate::http::{HttpTransport, PAGE_TIMEOUT};
use crate::models::{Article, FetchRequest, SourceParams, PLACEHOLDER_CONTENT};
use crate::utils::{is_absolute_url, normalize_date, truncate_for_log};
use crate::xml::XmlElement;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

const ACCEPT: &str =
    "application/rss+xml, application/atom+xml, application/xml;q=0.9, text/xml;q=0.8, */*;q=0.5";

/// Reads one feed URL into articles.
#[derive(Debug)]
pub struct FeedReader<'a, H> {
    http: &'a H,
    extractor: ContentExtractor<'a, H>,
    timeout: Duration,
}

impl<'a, H: HttpTransport> FeedReader<'a, H> {
    pub fn new(http: &'a H) -> Self {
        Self {
            http,
            extractor: ContentExtractor::new(http),
            timeout: PAGE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self.extractor = self.extractor.with_timeout(timeout);
        self
    }

    /// Fetch `feed_url` and return up to `max_items` articles (`0` = unlimited).
    ///
    /// # Errors
    ///
    /// [`IngestError::Fetch`] when the request fails or answers non-2xx,
    /// [`IngestError::Parse`] when the body is neither RSS nor Atom.
    #[instrument(level = "info", skip_all, fields(%feed_url, max_items))]
    pub async fn read(&self, feed_url: &str, max_items: usize) -> Result<Vec<Article>> {
        let response = self
            .http
            .get(feed_url, &[("Accept", ACCEPT)], self.timeout)
            .await?
            .error_for_status(feed_url)?;

        let content_type = response.header("content-type").unwrap_or_default();
        if !["rss", "atom", "xml"].into_iter().any(|t| content_type.contains(t)) {
            warn!(content_type, "Unexpected feed content type; parsing anyway");
        }

        let root = XmlElement::parse(&response.body).map_err(|e| {
            debug!(body = %truncate_for_log(&response.body, 200), "Feed body");
            IngestError::Parse(format!("{feed_url} is not a readable feed: {e}"))
        })?;
        let mut articles = feed_entries(&root)
            .map_err(|e| IngestError::Parse(format!("{feed_url}: {e}")))?;
        if max_items > 0 {
            articles.truncate(max_items);
        }
        info!(count = articles.len(), "Parsed feed entries");

        let articles: Vec<Article> = stream::iter(articles)
            .then(|article| async move {
                let Some(link) = article.link().map(str::to_string) else {
                    return article;
                };
                let extracted = self.extractor.fetch(&link).await;
                if extracted.content.is_empty() {
                    article
                } else {
                    article.with_full_content(extracted.content)
                }
            })
            .collect()
            .await;

        info!(
            count = articles.len(),
            with_full_text = articles.iter().filter(|a| a.full_content.is_some()).count(),
            "Read feed"
        );
        Ok(articles)
    }
}

/// Normalize every entry of a parsed feed document.
pub fn feed_entries(root: &XmlElement) -> Result<Vec<Article>> {
    match root.local_name() {
        "rss" => Ok(root
            .child("channel")
            .map(|channel| channel.children_named("item").map(rss_item).collect())
            .unwrap_or_default()),
        "RDF" => Ok(root.children_named("item").map(rss_item).collect()),
        "feed" => Ok(root.children_named("entry").map(atom_entry).collect()),
        other => Err(IngestError::Parse(format!(
            "document root <{other}> is neither RSS nor Atom"
        ))),
    }
}

fn rss_item(item: &XmlElement) -> Article {
    let title = item.text_at(&["title"]).unwrap_or_default();
    let content = ["content:encoded", "content", "description"]
        .into_iter()
        .find_map(|name| item.text_at(&[name]))
        .unwrap_or_else(|| PLACEHOLDER_CONTENT.to_string());

    let enclosure = item.child("enclosure");
    let link = item
        .text_at(&["link"])
        .into_iter()
        .chain(item.text_at(&["url"]))
        .chain(item.text_at(&["guid"]))
        .chain(enclosure.and_then(|e| e.attr("url")).map(str::to_string))
        .find(|candidate| is_absolute_url(candidate));

    let image_url = enclosure
        .filter(|e| e.attr("type").is_some_and(|t| t.starts_with("image/")))
        .and_then(|e| e.attr("url"))
        .or_else(|| item.child("media:content").and_then(|m| m.attr("url")))
        .or_else(|| item.child("media:thumbnail").and_then(|m| m.attr("url")))
        .map(str::to_string);

    let mut article = Article::new(&title, content);
    article.link = link.map(Into::into);
    article.publication_date = item
        .text_at(&["pubDate"])
        .or_else(|| item.text_at(&["dc:date"]))
        .map(|d| normalize_date(&d));
    article.image_url = image_url;
    article
}

fn atom_entry(entry: &XmlElement) -> Article {
    let title = entry.text_at(&["title"]).unwrap_or_default();
    let content = ["content", "summary"]
        .into_iter()
        .find_map(|name| entry.text_at(&[name]))
        .unwrap_or_else(|| PLACEHOLDER_CONTENT.to_string());

    let links: Vec<&XmlElement> = entry.children_named("link").collect();
    let alternate = links
        .iter()
        .find(|l| l.attr("rel").is_none_or(|rel| rel == "alternate"))
        .or(links.first())
        .and_then(|l| l.attr("href"))
        .map(str::to_string);
    let link = alternate
        .into_iter()
        .chain(entry.text_at(&["id"]))
        .find(|candidate| is_absolute_url(candidate));

    let mut article = Article::new(&title, content);
    article.link = link.map(Into::into);
    article.publication_date = entry
        .text_at(&["published"])
        .or_else(|| entry.text_at(&["updated"]))
        .map(|d| normalize_date(&d));
    article
}

/// Fetcher for `rss` sources: reads each configured feed in order.
#[derive(Debug)]
pub struct FeedFetcher<'a, H> {
    reader: FeedReader<'a, H>,
}

impl<'a, H: HttpTransport> FeedFetcher<'a, H> {
    pub fn new(http: &'a H) -> Self {
        Self {
            reader: FeedReader::new(http),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.reader = self.reader.with_timeout(timeout);
        self
    }
}

#[async_trait]
impl<'a, H: HttpTransport> Fetcher for FeedFetcher<'a, H> {
    fn name(&self) -> &'static str {
        "feed"
    }

    #[instrument(level = "info", skip_all, fields(source = %request.id))]
    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<Article>> {
        let SourceParams::Rss { feed_urls } = &request.source else {
            return Err(kind_mismatch(self.name(), request));
        };
        if feed_urls.is_empty() {
            return Err(IngestError::Configuration(format!(
                "source {} lists no feed URLs",
                request.id
            )));
        }

        let mut articles = Vec::new();
        let mut succeeded = 0usize;
        let mut last_error = None;
        for feed_url in feed_urls {
            let Some(budget) = remaining(request.max_items, articles.len()) else {
                break;
            };
            match self.reader.read(feed_url, budget).await {
                Ok(items) => {
                    succeeded += 1;
                    articles.extend(items);
                }
                Err(e) => {
                    warn!(%feed_url, error = %e, "Feed failed; skipping");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if succeeded == 0 => Err(e),
            _ => Ok(articles),
        }
    }
}
