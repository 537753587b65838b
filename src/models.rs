//! Data models shared by fetchers, the publisher and the content store.
//!
//! This module defines the core data structures used throughout the crate:
//! - [`Article`]: transient normalized record produced by a fetcher
//! - [`SourceLink`]: the article's source URL, as a bare string or a list
//! - [`FetchRequest`] / [`SourceParams`]: per-source configuration
//! - [`PublishTarget`] / [`PublishResult`]: publisher input and summary
//!
//! Articles live only for one pipeline run. Nothing here is persisted except
//! through the content store.

use crate::utils::{collapse_whitespace, strip_markup};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Title used when a source provides none.
pub const PLACEHOLDER_TITLE: &str = "No Title";

/// Content used by feed items that carry neither content nor description.
pub const PLACEHOLDER_CONTENT: &str = "No Content";

/// The source URL of an article.
///
/// Some sources hand the link over wrapped in a one-element list. Both forms
/// produce the same [`dedup_key`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SourceLink {
    Single(String),
    List(Vec<String>),
}

impl SourceLink {
    /// The link used for deduplication: the string itself, or the first list element.
    pub fn primary(&self) -> Option<&str> {
        match self {
            SourceLink::Single(link) => Some(link.as_str()),
            SourceLink::List(links) => links.first().map(String::as_str),
        }
        .filter(|link| !link.trim().is_empty())
    }
}

impl From<&str> for SourceLink {
    fn from(link: &str) -> Self {
        SourceLink::Single(link.to_string())
    }
}

impl From<String> for SourceLink {
    fn from(link: String) -> Self {
        SourceLink::Single(link)
    }
}

/// Serialize a link into the key recorded against stored entries.
///
/// The key is the JSON string encoding of the link, so it round-trips through
/// `serde_json::from_str::<String>`.
pub fn dedup_key(link: &str) -> String {
    serde_json::Value::String(link.to_string()).to_string()
}

/// A normalized article as produced by any fetcher.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Article {
    /// Plain-text title; never empty after [`Article::new`].
    pub title: String,
    /// Short content as provided by the source (snippet, abstract, feed body).
    pub content: String,
    /// Full text extracted from the article page, when available.
    pub full_content: Option<String>,
    /// Source-provided summary, placed before the body when publishing.
    pub description: Option<String>,
    /// Absolute URL of the article; the deduplication key.
    pub link: Option<SourceLink>,
    pub publication_date: Option<String>,
    pub image_url: Option<String>,
}

impl Article {
    /// Create an article with a normalized title.
    ///
    /// Markup is stripped from the title and whitespace collapsed; an empty
    /// result falls back to [`PLACEHOLDER_TITLE`].
    pub fn new(title: &str, content: impl Into<String>) -> Self {
        Self {
            title: normalize_title(title),
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn with_link(mut self, link: impl Into<SourceLink>) -> Self {
        self.link = Some(link.into());
        self
    }

    pub fn with_full_content(mut self, full_content: impl Into<String>) -> Self {
        self.full_content = Some(full_content.into());
        self
    }

    /// The primary link, if any.
    pub fn link(&self) -> Option<&str> {
        self.link.as_ref().and_then(SourceLink::primary)
    }
}

/// Strip markup from a title and fall back to the placeholder when nothing is left.
pub fn normalize_title(raw: &str) -> String {
    let title = collapse_whitespace(&strip_markup(raw));
    if title.is_empty() {
        PLACEHOLDER_TITLE.to_string()
    } else {
        title
    }
}

/// Content-store entry type. Only [`ContentType::Post`] carries a category and tags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    #[default]
    Post,
    Page,
}

impl ContentType {
    pub fn is_primary(self) -> bool {
        matches!(self, ContentType::Post)
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentType::Post => f.write_str("post"),
            ContentType::Page => f.write_str("page"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    Publish,
    #[default]
    Draft,
    Pending,
}

impl fmt::Display for PostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PostStatus::Publish => f.write_str("publish"),
            PostStatus::Draft => f.write_str("draft"),
            PostStatus::Pending => f.write_str("pending"),
        }
    }
}

/// Configuration of one source, as stored in the `sources` section of the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchRequest {
    /// Identifier used by the CLI to select the source.
    pub id: String,
    #[serde(default)]
    pub category_id: u64,
    #[serde(default)]
    pub tag_ids: Vec<u64>,
    #[serde(default)]
    pub content_type: ContentType,
    #[serde(default)]
    pub status: PostStatus,
    /// Cap on collected articles; `0` means unlimited.
    #[serde(default)]
    pub max_items: usize,
    pub source: SourceParams,
}

impl FetchRequest {
    pub fn target(&self) -> PublishTarget {
        PublishTarget {
            category_id: self.category_id,
            tag_ids: self.tag_ids.clone(),
            status: self.status,
            content_type: self.content_type,
        }
    }
}

/// Source-specific parameters, tagged by `kind` in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceParams {
    Rss {
        feed_urls: Vec<String>,
    },
    NewsApi {
        query: String,
        #[serde(default)]
        language: Option<String>,
        #[serde(default = "default_true")]
        fetch_full_text: bool,
        /// Additional query parameters passed through unchanged (`sortBy`, `from`, ...).
        #[serde(default)]
        extra: BTreeMap<String, String>,
    },
    Pubmed(PubMedParams),
    Scholar(ScholarParams),
    Blog {
        seed_urls: Vec<String>,
    },
}

impl SourceParams {
    pub fn kind(&self) -> SourceKind {
        match self {
            SourceParams::Rss { .. } => SourceKind::Rss,
            SourceParams::NewsApi { .. } => SourceKind::NewsApi,
            SourceParams::Pubmed(_) => SourceKind::Pubmed,
            SourceParams::Scholar(_) => SourceKind::Scholar,
            SourceParams::Blog { .. } => SourceKind::Blog,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Rss,
    NewsApi,
    Pubmed,
    Scholar,
    Blog,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SourceKind::Rss => "rss",
            SourceKind::NewsApi => "news_api",
            SourceKind::Pubmed => "pubmed",
            SourceKind::Scholar => "scholar",
            SourceKind::Blog => "blog",
        };
        f.write_str(name)
    }
}

fn default_true() -> bool {
    true
}

fn default_max_steps() -> usize {
    1
}

fn default_per_step() -> usize {
    10
}

/// Parameters for PubMed E-utilities searches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PubMedParams {
    pub query: String,
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    #[serde(default = "default_per_step")]
    pub per_step: usize,
    #[serde(default)]
    pub mindate: Option<String>,
    #[serde(default)]
    pub maxdate: Option<String>,
    /// Date field the range applies to (`pdat`, `edat`, `mdat`).
    #[serde(default)]
    pub datetype: Option<String>,
    #[serde(default)]
    pub publication_types: Vec<String>,
    /// Language codes, e.g. `eng`.
    #[serde(default)]
    pub languages: Vec<String>,
    /// Metadata fields rendered into the article body; empty means all.
    #[serde(default)]
    pub fields: Vec<PubMedField>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PubMedField {
    Authors,
    Journal,
    Grants,
    PublicationTypes,
    PublicationDate,
    References,
}

/// Parameters for Google Scholar searches through SerpAPI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScholarParams {
    pub query: String,
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    #[serde(default = "default_per_step")]
    pub per_step: usize,
    /// Earliest publication year.
    #[serde(default)]
    pub year_low: Option<String>,
    /// Latest publication year.
    #[serde(default)]
    pub year_high: Option<String>,
    #[serde(default = "default_true")]
    pub fetch_full_text: bool,
}

/// Where and how the publisher stores a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishTarget {
    pub category_id: u64,
    pub tag_ids: Vec<u64>,
    pub status: PostStatus,
    pub content_type: ContentType,
}

/// Summary returned by the publisher. `count == created_ids.len()` always holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishResult {
    pub count: usize,
    pub created_ids: Vec<u64>,
}

impl PublishResult {
    pub fn from_ids(created_ids: Vec<u64>) -> Self {
        Self {
            count: created_ids.len(),
            created_ids,
        }
    }
}
