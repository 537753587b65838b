//! AI-assisted link discovery for arbitrary blog and news front pages.
//!
//! # Flow
//!
//! 1. fetch the seed page
//! 2. summarize its anchors as `<a href="...">text</a>` lines
//! 3. ask the model for a JSON array of article URLs, repairing and retrying
//! 4. keep absolute URLs only
//! 5. extract every discovered page
//!
//! The steps are chained: any failure aborts the seed. There is no partial
//! result for a seed.
//!
//! # Retry state machine
//!
//! ```text
//! attempt 1..=MAX_ATTEMPTS:
//!   pending --complete--> response
//!   response --parse--> valid                  => done
//!   response --parse fails--> repair --> valid => done
//!                                    --> invalid --backoff--> next attempt
//! after MAX_ATTEMPTS                            => InvalidAiResponse
//! ```

use super::{kind_mismatch, remaining, Fetcher};
use crate::api::{backoff_delay, ChatCompletion, ChatMessage};
use crate::error::{IngestError, Result};
use crate::extract::ContentExtractor;
use crate::http::{HttpTransport, PAGE_TIMEOUT};
use crate::json_repair::repair;
use crate::models::{Article, FetchRequest, SourceParams};
use crate::utils::{collapse_whitespace, looks_truncated, parse_absolute_url, truncate_for_log};
use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use itertools::Itertools;
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Upper bound on model calls per seed.
pub const MAX_ATTEMPTS: usize = 5;
/// Anchors sent to the model per seed.
pub const MAX_ANCHORS: usize = 400;
/// Characters of anchor text kept per anchor.
pub const MAX_ANCHOR_TEXT: usize = 120;

pub const SYSTEM_INSTRUCTION: &str = "You extract only news headers urls from the given html";
pub const RETRY_INSTRUCTION: &str =
    "Your previous response was not valid JSON. Return only a bare JSON array of URL strings.";

static ANCHORS: Lazy<Selector> = Lazy::new(|| Selector::parse("body a[href]").unwrap());

/// Fetcher for `blog` sources.
#[derive(Debug)]
pub struct AiDiscoveryFetcher<'a, H, L> {
    http: &'a H,
    llm: L,
    prompt: String,
    extractor: ContentExtractor<'a, H>,
    timeout: Duration,
    retry_base_delay: Duration,
}

impl<'a, H: HttpTransport, L: ChatCompletion> AiDiscoveryFetcher<'a, H, L> {
    pub fn new(http: &'a H, llm: L, prompt: impl Into<String>) -> Self {
        Self {
            http,
            llm,
            prompt: prompt.into(),
            extractor: ContentExtractor::new(http),
            timeout: PAGE_TIMEOUT,
            retry_base_delay: Duration::from_secs(1),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self.extractor = self.extractor.with_timeout(timeout);
        self
    }

    /// Base of the exponential backoff between model attempts; zero disables waiting.
    pub fn with_retry_delay(mut self, base: Duration) -> Self {
        self.retry_base_delay = base;
        self
    }

    /// Discover and extract up to `max_articles` articles linked from `seed_url` (`0` = unlimited).
    #[instrument(level = "info", skip_all, fields(%seed_url, max_articles))]
    pub async fn discover(&self, seed_url: &str, max_articles: usize) -> Result<Vec<Article>> {
        let base = parse_absolute_url(seed_url).ok_or_else(|| {
            IngestError::Configuration(format!("seed URL {seed_url} is not an absolute http(s) URL"))
        })?;
        let page = self
            .http
            .get(seed_url, &[], self.timeout)
            .await?
            .error_for_status(seed_url)?;

        let summary = link_summary(&page.body, &base);
        if summary.is_empty() {
            return Err(IngestError::NoLinksFound(seed_url.to_string()));
        }
        info!(anchors = summary.len(), "Collected anchors for the model");

        let proposed = self.ask_for_links(&summary.join("\n")).await?;
        let mut links: Vec<String> = proposed
            .iter()
            .filter_map(|candidate| parse_absolute_url(candidate))
            .map(|url| url.to_string())
            .unique()
            .collect();
        if links.is_empty() {
            warn!(proposed = proposed.len(), "Model proposed no usable URLs");
            return Err(IngestError::NoLinksFound(seed_url.to_string()));
        }
        if max_articles > 0 {
            links.truncate(max_articles);
        }
        info!(count = links.len(), "Model selected article links");

        let extractor = &self.extractor;
        let articles: Vec<Article> = stream::iter(links)
            .map(Ok::<String, IngestError>)
            .and_then(|url| async move {
                let extracted = extractor.fetch_strict(&url).await?;
                debug!(%url, content_len = extracted.content.len(), "Extracted discovered article");
                Ok(Article::new(&extracted.title, extracted.content).with_link(url))
            })
            .try_collect()
            .await?;
        info!(count = articles.len(), "Discovered articles extracted");
        Ok(articles)
    }

    /// Run the bounded retry loop and return the model's array of strings.
    #[instrument(level = "info", skip_all)]
    async fn ask_for_links(&self, summary: &str) -> Result<Vec<String>> {
        let user = ChatMessage::user(format!("{} >>> {}", self.prompt, summary));
        let retry_system = format!("{SYSTEM_INSTRUCTION}. {RETRY_INSTRUCTION}");
        let mut last_reason = String::new();

        for attempt in 1..=MAX_ATTEMPTS {
            if attempt > 1 {
                let delay = backoff_delay(attempt - 1, self.retry_base_delay);
                if !delay.is_zero() {
                    debug!(attempt, delay_ms = delay.as_millis() as u64, "Backing off before retry");
                    tokio::time::sleep(delay).await;
                }
            }
            let system = if attempt == 1 {
                ChatMessage::system(SYSTEM_INSTRUCTION)
            } else {
                ChatMessage::system(retry_system.as_str())
            };

            let raw = match self.llm.complete(&[system, user.clone()]).await {
                Ok(raw) => raw,
                Err(e @ IngestError::Configuration(_)) => return Err(e),
                Err(e) => {
                    warn!(attempt, error = %e, "Model call failed");
                    last_reason = e.to_string();
                    continue;
                }
            };

            match parse_link_array(&raw) {
                Ok(links) => {
                    info!(attempt, count = links.len(), "Model returned a link array");
                    return Ok(links);
                }
                Err(e) => {
                    warn!(
                        attempt,
                        error = %e,
                        response = %truncate_for_log(&raw, 300),
                        "Model response is not a JSON array of strings"
                    );
                    last_reason = e.to_string();
                }
            }
        }

        Err(IngestError::InvalidAiResponse {
            attempts: MAX_ATTEMPTS,
            reason: last_reason,
        })
    }
}

#[async_trait]
impl<'a, H: HttpTransport, L: ChatCompletion> Fetcher for AiDiscoveryFetcher<'a, H, L> {
    fn name(&self) -> &'static str {
        "ai_discovery"
    }

    #[instrument(level = "info", skip_all, fields(source = %request.id))]
    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<Article>> {
        let SourceParams::Blog { seed_urls } = &request.source else {
            return Err(kind_mismatch(self.name(), request));
        };
        if seed_urls.is_empty() {
            return Err(IngestError::Configuration(format!(
                "source {} lists no seed URLs",
                request.id
            )));
        }

        let mut articles = Vec::new();
        let mut succeeded = 0usize;
        let mut last_error = None;
        for seed_url in seed_urls {
            let Some(budget) = remaining(request.max_items, articles.len()) else {
                break;
            };
            match self.discover(seed_url, budget).await {
                Ok(found) => {
                    succeeded += 1;
                    articles.extend(found);
                }
                Err(e) => {
                    warn!(%seed_url, error = %e, "Seed failed; skipping");
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

/// `<a href="...">text</a>` lines for the anchors of `html`, resolved against `base`.
///
/// Fragment-only, `javascript:`, `mailto:` and `tel:` anchors are dropped,
/// duplicate targets are kept once and the list is capped at [`MAX_ANCHORS`].
pub fn link_summary(html: &str, base: &url::Url) -> Vec<String> {
    let document = Html::parse_document(html);
    document
        .select(&ANCHORS)
        .filter_map(|anchor| {
            let href = anchor.value().attr("href")?.trim();
            if href.is_empty() || href.starts_with('#') {
                return None;
            }
            let mut url = base.join(href).ok()?;
            if !matches!(url.scheme(), "http" | "https") {
                return None;
            }
            url.set_fragment(None);
            let text: String = collapse_whitespace(&anchor.text().collect::<String>())
                .chars()
                .take(MAX_ANCHOR_TEXT)
                .collect();
            Some((url.to_string(), text))
        })
        .unique_by(|(url, _)| url.clone())
        .take(MAX_ANCHORS)
        .map(|(url, text)| format!("<a href=\"{url}\">{text}</a>"))
        .collect()
}

/// Parse a model response as a JSON array of strings, repairing it first when needed.
pub fn parse_link_array(raw: &str) -> Result<Vec<String>> {
    let value: Value = match serde_json::from_str(raw.trim()) {
        Ok(value) => value,
        Err(e) => {
            if looks_truncated(&e) {
                debug!("Model response looks truncated");
            }
            serde_json::from_str(&repair(raw)?)?
        }
    };
    let Value::Array(items) = value else {
        return Err(IngestError::Parse("expected a JSON array".to_string()));
    };
    items
        .into_iter()
        .map(|item| match item {
            Value::String(s) => Ok(s),
            other => Err(IngestError::Parse(format!(
                "expected an array of strings, found element {other}"
            ))),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::testing::FakeTransport;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Returns scripted answers in order and records every conversation.
    struct ScriptedLlm {
        answers: Mutex<VecDeque<Result<String>>>,
        calls: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedLlm {
        fn new(answers: Vec<Result<String>>) -> Self {
            Self {
                answers: Mutex::new(answers.into()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn always(answer: &str) -> Self {
            Self::new((0..10).map(|_| Ok(answer.to_string())).collect())
        }

        fn calls(&self) -> Vec<Vec<ChatMessage>> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl<'s> ChatCompletion for &'s ScriptedLlm {
        async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
            self.calls.lock().unwrap().push(messages.to_vec());
            self.answers
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(IngestError::Fetch("script exhausted".to_string())))
        }
    }

    const SEED: &str = "https://blog.example.com/";

    const FRONT_PAGE: &str = r##"<html><head><script>var tracking = 1;</script></head><body>
      <nav><a href="/">Home</a><a href="#top">Top</a><a href="javascript:void(0)">Menu</a></nav>
      <a href="/posts/one">  First
         post </a>
      <a href="https://blog.example.com/posts/two#comments">Second post</a>
      <a href="/posts/two">Second post again</a>
      <a href="mailto:editor@example.com">Contact</a>
    </body></html>"##;

    const POST: &str = r#"<html><head><title>A post</title></head><body><article>
      <p>This post explains something at length, with several clauses and words.</p>
    </article></body></html>"#;

    fn http() -> FakeTransport {
        FakeTransport::new()
            .route(SEED, 200, FRONT_PAGE)
            .route("https://blog.example.com/posts/", 200, POST)
    }

    fn fetcher<'a>(http: &'a FakeTransport, llm: &'a ScriptedLlm) -> AiDiscoveryFetcher<'a, FakeTransport, &'a ScriptedLlm> {
        AiDiscoveryFetcher::new(http, llm, "Return article URLs.").with_retry_delay(Duration::ZERO)
    }

    #[test]
    fn test_link_summary() {
        let base = url::Url::parse(SEED).unwrap();
        let summary = link_summary(FRONT_PAGE, &base);
        assert_eq!(
            summary,
            vec![
                r#"<a href="https://blog.example.com/">Home</a>"#,
                r#"<a href="https://blog.example.com/posts/one">First post</a>"#,
                r#"<a href="https://blog.example.com/posts/two">Second post</a>"#,
            ]
        );
    }

    #[test]
    fn test_link_summary_caps_anchor_text() {
        let long = "word ".repeat(100);
        let html = format!("<body><a href='/a'>{long}</a></body>");
        let base = url::Url::parse(SEED).unwrap();
        let summary = link_summary(&html, &base);
        let text = summary[0]
            .trim_start_matches(r#"<a href="https://blog.example.com/a">"#)
            .trim_end_matches("</a>");
        assert_eq!(text.chars().count(), MAX_ANCHOR_TEXT);
    }

    #[test]
    fn test_parse_link_array() {
        assert_eq!(
            parse_link_array("```json\n[\"https://a/1\", \"https://a/2\",\n```").unwrap(),
            vec!["https://a/1", "https://a/2"]
        );
        assert!(parse_link_array(r#"{"urls": ["https://a/1"]}"#).is_err());
        assert!(parse_link_array(r#"["https://a/1", 7]"#).is_err());
        assert!(parse_link_array("no idea").is_err());
    }

    #[tokio::test]
    async fn test_discover_happy_path() {
        let http = http();
        let llm = ScriptedLlm::new(vec![Ok(
            "```json\n[\"https://blog.example.com/posts/one\", \"/posts/relative\", \"https://blog.example.com/posts/two\"]\n```"
                .to_string(),
        )]);
        let articles = fetcher(&http, &llm).discover(SEED, 0).await.unwrap();

        assert_eq!(articles.len(), 2);
        assert_eq!(articles[0].title, "A post");
        assert_eq!(articles[0].link(), Some("https://blog.example.com/posts/one"));
        assert!(articles[0].content.contains("explains something at length"));

        let calls = llm.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0][0].content, SYSTEM_INSTRUCTION);
        let user = &calls[0][1].content;
        assert!(user.starts_with("Return article URLs. >>> "));
        assert!(user.contains(r#"<a href="https://blog.example.com/posts/one">First post</a>"#));
        assert!(!user.contains("tracking"));
    }

    #[tokio::test]
    async fn test_retry_bound_is_five_calls() {
        let http = http();
        let llm = ScriptedLlm::always("I'm sorry, I can't help with that.");
        let err = fetcher(&http, &llm).discover(SEED, 0).await.unwrap_err();

        assert!(matches!(err, IngestError::InvalidAiResponse { attempts: 5, .. }));
        assert_eq!(llm.calls().len(), MAX_ATTEMPTS);
    }

    #[tokio::test]
    async fn test_retry_uses_amended_instruction() {
        let http = http();
        let llm = ScriptedLlm::new(vec![
            Err(IngestError::Fetch("HTTP 502".to_string())),
            Ok("Sure! Here you go".to_string()),
            Ok(r#"["https://blog.example.com/posts/one"]"#.to_string()),
        ]);
        let articles = fetcher(&http, &llm).discover(SEED, 0).await.unwrap();

        assert_eq!(articles.len(), 1);
        let calls = llm.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0][0].content, SYSTEM_INSTRUCTION);
        assert!(calls[2][0].content.contains(RETRY_INSTRUCTION));
    }

    #[tokio::test]
    async fn test_no_usable_links() {
        let http = http();
        let llm = ScriptedLlm::new(vec![Ok(r#"["/relative", "mailto:x@example.com"]"#.to_string())]);
        let err = fetcher(&http, &llm).discover(SEED, 0).await.unwrap_err();
        assert!(matches!(err, IngestError::NoLinksFound(_)));
    }

    #[tokio::test]
    async fn test_max_articles_caps_extraction() {
        let http = http();
        let llm = ScriptedLlm::new(vec![Ok(
            r#"["https://blog.example.com/posts/one", "https://blog.example.com/posts/two"]"#.to_string(),
        )]);
        let articles = fetcher(&http, &llm).discover(SEED, 1).await.unwrap();
        assert_eq!(articles.len(), 1);
        assert_eq!(http.count_requests("https://blog.example.com/posts/"), 1);
    }

    #[tokio::test]
    async fn test_chained_failures_abort_the_seed() {
        let http = FakeTransport::new().route(SEED, 503, "");
        let llm = ScriptedLlm::always("[]");
        let err = fetcher(&http, &llm).discover(SEED, 0).await.unwrap_err();
        assert!(matches!(err, IngestError::Fetch(_)));
        assert!(llm.calls().is_empty());

        let http = http_with_broken_post();
        let llm = ScriptedLlm::always(r#"["https://blog.example.com/posts/one", "https://blog.example.com/broken"]"#);
        let err = fetcher(&http, &llm).discover(SEED, 0).await.unwrap_err();
        assert!(matches!(err, IngestError::Fetch(_)));
    }

    fn http_with_broken_post() -> FakeTransport {
        http().route("https://blog.example.com/broken", 500, "")
    }

    #[tokio::test]
    async fn test_fetcher_isolates_failing_seeds() {
        let http = http().route("https://down.example.com/", 503, "");
        let llm = ScriptedLlm::always(r#"["https://blog.example.com/posts/one"]"#);
        let request = FetchRequest {
            id: "blogs".to_string(),
            category_id: 0,
            tag_ids: vec![],
            content_type: Default::default(),
            status: Default::default(),
            max_items: 0,
            source: SourceParams::Blog {
                seed_urls: vec!["https://down.example.com/".to_string(), SEED.to_string()],
            },
        };
        let articles = fetcher(&http, &llm).fetch(&request).await.unwrap();
        assert_eq!(articles.len(), 1);
    }
}
