//! Readability-style extraction of the main article text from arbitrary HTML.
//!
//! Paragraphs vote for their parent (full score) and grandparent (half
//! score); the best-scoring container after link-density and class/id
//! adjustments is taken as the article body. Boilerplate regions such as
//! navigation, headers, footers, sidebars and forms never vote.

use crate::error::Result;
use crate::http::{HttpTransport, PAGE_TIMEOUT};
use crate::models::PLACEHOLDER_TITLE;
use crate::utils::{collapse_whitespace, title_from_url};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, instrument, warn};

static TITLE: Lazy<Selector> = Lazy::new(|| Selector::parse("title").unwrap());
static H1: Lazy<Selector> = Lazy::new(|| Selector::parse("h1").unwrap());
static BODY: Lazy<Selector> = Lazy::new(|| Selector::parse("body").unwrap());
static PARAGRAPHS: Lazy<Selector> = Lazy::new(|| Selector::parse("p").unwrap());
static LINKS: Lazy<Selector> = Lazy::new(|| Selector::parse("a").unwrap());
static BLOCKS: Lazy<Selector> =
    Lazy::new(|| Selector::parse("p, pre, blockquote, h2, h3, h4, li").unwrap());

static UNLIKELY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)comment|sidebar|footer|masthead|menu|navbar|navigation|share|social|promo|related|advert|banner|cookie|breadcrumb|subscribe|newsletter|popup|sponsor",
    )
    .unwrap()
});
static LIKELY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)article|body|content|entry|main|post|story|text").unwrap());

const BOILERPLATE_TAGS: &[&str] = &[
    "script", "style", "noscript", "nav", "header", "footer", "aside", "form", "iframe", "svg",
    "button", "template", "select",
];
const BOILERPLATE_ROLES: &[&str] = &["navigation", "banner", "contentinfo", "complementary"];
const BLOCK_TAGS: &[&str] = &["p", "pre", "blockquote", "h2", "h3", "h4", "li"];

/// Paragraphs shorter than this (in chars) do not vote.
const MIN_PARAGRAPH_LEN: usize = 25;

/// Title and main text of a page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extracted {
    pub title: String,
    /// Paragraphs separated by blank lines. Empty means "no full text available".
    pub content: String,
}

impl Extracted {
    fn empty(source_url: &str) -> Self {
        Self {
            title: fallback_title(source_url),
            content: String::new(),
        }
    }
}

/// Extract a best-effort title and main body text from `html`.
pub fn extract(html: &str, source_url: &str) -> Extracted {
    let document = Html::parse_document(html);
    let title = extract_title(&document, source_url);
    let content = extract_content(&document);
    debug!(%source_url, title_len = title.len(), content_len = content.len(), "Extracted page");
    Extracted { title, content }
}

/// Fetches pages and runs [`extract`] on them.
#[derive(Debug)]
pub struct ContentExtractor<'a, H> {
    http: &'a H,
    timeout: Duration,
}

impl<'a, H: HttpTransport> ContentExtractor<'a, H> {
    pub fn new(http: &'a H) -> Self {
        Self {
            http,
            timeout: PAGE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Fetch and extract `url`, degrading to empty content on any failure.
    #[instrument(level = "info", skip_all, fields(%url))]
    pub async fn fetch(&self, url: &str) -> Extracted {
        match self.fetch_strict(url).await {
            Ok(extracted) => {
                if extracted.content.is_empty() {
                    warn!("Unable to extract content from the article");
                }
                extracted
            }
            Err(e) => {
                warn!(error = %e, "Article fetch failed; continuing without full text");
                Extracted::empty(url)
            }
        }
    }

    /// Fetch and extract `url`, propagating transport and status failures.
    pub async fn fetch_strict(&self, url: &str) -> Result<Extracted> {
        let response = self
            .http
            .get(url, &[], self.timeout)
            .await?
            .error_for_status(url)?;
        Ok(extract(&response.body, url))
    }
}

fn extract_title(document: &Html, source_url: &str) -> String {
    [&*TITLE, &*H1]
        .into_iter()
        .find_map(|selector| {
            document
                .select(selector)
                .map(element_text)
                .find(|t| !t.is_empty())
        })
        .unwrap_or_else(|| fallback_title(source_url))
}

fn fallback_title(source_url: &str) -> String {
    title_from_url(source_url).unwrap_or_else(|| PLACEHOLDER_TITLE.to_string())
}

fn extract_content(document: &Html) -> String {
    let Some(best) = best_candidate(document) else {
        return document
            .select(&BODY)
            .next()
            .map(visible_text)
            .unwrap_or_default();
    };

    let mut paragraphs = Vec::new();
    for block in best.select(&BLOCKS) {
        if nested_in_block(block, best) || in_boilerplate(block, Some(best)) {
            continue;
        }
        let text = element_text(block);
        if !text.is_empty() {
            paragraphs.push(text);
        }
    }

    if paragraphs.is_empty() {
        visible_text(best)
    } else {
        paragraphs.join("\n\n")
    }
}

fn best_candidate(document: &Html) -> Option<ElementRef<'_>> {
    let mut scores = BTreeMap::new();
    for paragraph in document.select(&PARAGRAPHS) {
        if in_boilerplate(paragraph, None) {
            continue;
        }
        let text = element_text(paragraph);
        let len = text.chars().count();
        if len < MIN_PARAGRAPH_LEN {
            continue;
        }
        let score = 1.0 + text.matches(',').count() as f64 + (len as f64 / 100.0).min(3.0);

        let mut ancestors = paragraph.ancestors().filter_map(ElementRef::wrap);
        if let Some(parent) = ancestors.next() {
            *scores.entry(parent.id()).or_insert(0.0) += score;
        }
        if let Some(grandparent) = ancestors.next() {
            *scores.entry(grandparent.id()).or_insert(0.0) += score / 2.0;
        }
    }

    scores
        .into_iter()
        .filter_map(|(id, score)| {
            let element = document.tree.get(id).and_then(ElementRef::wrap)?;
            let adjusted = (score + class_weight(element)) * (1.0 - link_density(element));
            Some((element, adjusted))
        })
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(element, _)| element)
}

fn class_weight(element: ElementRef<'_>) -> f64 {
    let value = element.value();
    let mut weight = match value.name() {
        "article" | "main" => 25.0,
        _ => 0.0,
    };
    for attr in [value.attr("class"), value.attr("id")].into_iter().flatten() {
        if LIKELY.is_match(attr) {
            weight += 25.0;
        }
        if UNLIKELY.is_match(attr) {
            weight -= 25.0;
        }
    }
    weight
}

fn link_density(element: ElementRef<'_>) -> f64 {
    let total = element_text(element).chars().count();
    if total == 0 {
        return 0.0;
    }
    let linked: usize = element
        .select(&LINKS)
        .map(|a| element_text(a).chars().count())
        .sum();
    (linked as f64 / total as f64).min(1.0)
}

fn is_boilerplate(element: ElementRef<'_>) -> bool {
    let value = element.value();
    if BOILERPLATE_TAGS.contains(&value.name()) {
        return true;
    }
    if value
        .attr("role")
        .is_some_and(|role| BOILERPLATE_ROLES.contains(&role))
    {
        return true;
    }
    [value.attr("class"), value.attr("id")]
        .into_iter()
        .flatten()
        .any(|attr| UNLIKELY.is_match(attr) && !LIKELY.is_match(attr))
}

/// True when `element` or an ancestor below `stop` is boilerplate.
fn in_boilerplate(element: ElementRef<'_>, stop: Option<ElementRef<'_>>) -> bool {
    if is_boilerplate(element) {
        return true;
    }
    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .take_while(|a| stop.is_none_or(|s| a.id() != s.id()))
        .any(is_boilerplate)
}

/// True when an ancestor of `element` below `stop` is itself a collected block.
fn nested_in_block(element: ElementRef<'_>, stop: ElementRef<'_>) -> bool {
    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .take_while(|a| a.id() != stop.id())
        .any(|a| BLOCK_TAGS.contains(&a.value().name()))
}

fn element_text(element: ElementRef<'_>) -> String {
    collapse_whitespace(&element.text().collect::<String>())
}

/// Text of `root` outside boilerplate elements, whitespace collapsed.
fn visible_text(root: ElementRef<'_>) -> String {
    let mut text = String::new();
    for node in root.descendants() {
        let Node::Text(t) = node.value() else {
            continue;
        };
        let hidden = node
            .ancestors()
            .filter_map(ElementRef::wrap)
            .take_while(|a| a.id() != root.id())
            .any(is_boilerplate);
        if !hidden {
            text.push_str(t);
            text.push(' ');
        }
    }
    collapse_whitespace(&text)
}
