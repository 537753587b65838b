//! Utility functions for text cleanup, URL validation and file system checks.
//!
//! This module provides helper functions used throughout the crate:
//! - Markup stripping and whitespace normalization
//! - Absolute URL validation
//! - String truncation for logging
//! - JSON error classification for LLM response truncation
//! - Date normalization for feed and API timestamps
//! - File system validation for the content store location

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Node};
use std::fs as stdfs;
use std::path::Path;
use tokio::fs;
use tracing::{info, instrument};
use url::Url;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n[ \t]*(\n[ \t]*)+").unwrap());

/// Truncate a string for logging purposes.
///
/// Long strings are cut at the last char boundary before `max` bytes and a
/// byte count indicator is appended.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// assert_eq!(truncate_for_log("a".repeat(500), 10), "aaaaaaaaaa…(+490 bytes)");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…(+{} bytes)", &s[..end], s.len() - end)
}

/// Detect if a serde_json error indicates truncated/incomplete JSON.
///
/// When the LLM response is cut off by its token limit the JSON fails with
/// an EOF error rather than a syntax error.
pub fn looks_truncated(e: &serde_json::Error) -> bool {
    use serde_json::error::Category;
    matches!(e.classify(), Category::Eof)
}

/// Remove markup from an HTML or text fragment and return the text nodes.
///
/// The fragment is parsed permissively; `<script>` and `<style>` contents are
/// dropped, entities are decoded and line breaks inside text are kept.
pub fn strip_markup(fragment: &str) -> String {
    if !fragment.contains('<') && !fragment.contains('&') {
        return fragment.to_string();
    }
    let html = Html::parse_fragment(fragment);
    let mut text = String::with_capacity(fragment.len());
    for node in html.root_element().descendants() {
        if let Node::Text(t) = node.value() {
            let inside_code = node
                .parent()
                .and_then(|p| p.value().as_element().map(|e| e.name()))
                .is_some_and(|name| matches!(name, "script" | "style" | "noscript"));
            if !inside_code {
                text.push_str(t);
            }
        }
    }
    text
}

/// Collapse every whitespace run into a single space and trim the ends.
pub fn collapse_whitespace(s: &str) -> String {
    WHITESPACE.replace_all(s.trim(), " ").into_owned()
}

/// Trim each line and squeeze runs of blank lines into one blank line.
pub fn tidy_paragraphs(s: &str) -> String {
    let trimmed = s
        .lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n");
    BLANK_LINES.replace_all(trimmed.trim(), "\n\n").into_owned()
}

/// Parse `candidate` as an absolute `http`/`https` URL.
pub fn parse_absolute_url(candidate: &str) -> Option<Url> {
    let url = Url::parse(candidate.trim()).ok()?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Some(url),
        _ => None,
    }
}

/// True when `candidate` is a syntactically valid absolute `http`/`https` URL.
pub fn is_absolute_url(candidate: &str) -> bool {
    parse_absolute_url(candidate).is_some()
}

/// The first `n` whitespace-separated words of `text`, joined by single spaces.
pub fn first_words(text: &str, n: usize) -> String {
    text.split_whitespace().take(n).collect::<Vec<_>>().join(" ")
}

/// Derive a human-readable title from the last path segment of a URL.
///
/// `https://blog.example.com/posts/rust-error-handling.html` becomes
/// `rust error handling`. Returns `None` when the URL has no usable segment.
pub fn title_from_url(source_url: &str) -> Option<String> {
    let url = Url::parse(source_url).ok()?;
    let segment = url
        .path_segments()?
        .filter(|s| !s.is_empty())
        .last()?
        .to_string();
    let decoded = urlencoding::decode(&segment)
        .map(|s| s.into_owned())
        .unwrap_or(segment);
    let stem = match decoded.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && ext.len() <= 5 => stem.to_string(),
        _ => decoded,
    };
    let title = collapse_whitespace(&stem.replace(['-', '_', '+'], " "));
    (!title.is_empty()).then_some(title)
}

/// Normalize a feed or API timestamp to RFC 3339.
///
/// RFC 2822 (`pubDate`) and RFC 3339 inputs are converted to UTC; anything
/// else is returned trimmed and unchanged.
pub fn normalize_date(raw: &str) -> String {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return dt.with_timezone(&Utc).to_rfc3339();
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return dt.with_timezone(&Utc).to_rfc3339();
    }
    raw.to_string()
}

/// Ensure a directory exists and is writable.
///
/// Creates the directory if needed, then writes and removes a scratch file.
///
/// # Errors
///
/// Returns an error if the directory cannot be created or is not writable.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn ensure_writable_dir(path: &Path) -> std::io::Result<()> {
    fs::create_dir_all(path).await?;
    let scratch_path = path.join("..__write_check__");
    stdfs::File::create(&scratch_path)?;
    let _ = stdfs::remove_file(&scratch_path);
    info!("Store directory is writable");
    Ok(())
}
