//! NewsAPI (`/v2/everything`) fetcher.
//!
//! One search call per run. Each hit can be enriched with the page's full
//! text; a failed extraction leaves `full_content` empty and the hit is kept.

use super::{kind_mismatch, take_limit, Fetcher};
use crate::config::{ConfigProvider, NEWS_API_KEY};
use crate::error::{IngestError, Result};
use crate::extract::ContentExtractor;
use crate::http::{HttpTransport, API_TIMEOUT};
use crate::models::{Article, FetchRequest, SourceParams};
use crate::utils::{is_absolute_url, normalize_date, truncate_for_log};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{info, instrument, warn};
use url::Url;

pub const NEWS_API_URL: &str = "https://newsapi.org/v2/everything";

/// Largest page the API serves.
const MAX_PAGE_SIZE: usize = 100;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewsApiResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    articles: Vec<NewsApiArticle>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewsApiArticle {
    title: Option<String>,
    description: Option<String>,
    content: Option<String>,
    url: Option<String>,
    url_to_image: Option<String>,
    published_at: Option<String>,
}

impl From<NewsApiArticle> for Article {
    fn from(hit: NewsApiArticle) -> Self {
        let mut article = Article::new(
            hit.title.as_deref().unwrap_or_default(),
            hit.content.unwrap_or_default(),
        );
        article.description = hit.description.filter(|d| !d.trim().is_empty());
        article.link = hit.url.filter(|u| is_absolute_url(u)).map(Into::into);
        article.publication_date = hit.published_at.map(|d| normalize_date(&d));
        article.image_url = hit.url_to_image.filter(|u| is_absolute_url(u));
        article
    }
}

/// Query of one NewsAPI run.
#[derive(Debug, Clone)]
pub struct NewsQuery<'q> {
    pub query: &'q str,
    pub language: Option<&'q str>,
    /// Passed through unchanged (`sortBy`, `from`, `domains`, ...).
    pub extra: &'q BTreeMap<String, String>,
    pub max_items: usize,
}

/// Fetcher for `news_api` sources.
#[derive(Debug)]
pub struct NewsApiFetcher<'a, H, C> {
    http: &'a H,
    config: &'a C,
    extractor: ContentExtractor<'a, H>,
    endpoint: String,
}

impl<'a, H: HttpTransport, C: ConfigProvider> NewsApiFetcher<'a, H, C> {
    pub fn new(http: &'a H, config: &'a C) -> Self {
        Self {
            http,
            config,
            extractor: ContentExtractor::new(http),
            endpoint: NEWS_API_URL.to_string(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.extractor = self.extractor.with_timeout(timeout);
        self
    }

    /// Run the search and optionally backfill full text.
    ///
    /// # Errors
    ///
    /// [`IngestError::Configuration`] without an API key, [`IngestError::Fetch`]
    /// on transport failure, non-2xx status or an API `error` status.
    #[instrument(level = "info", skip_all, fields(query = %news.query, fetch_full_text))]
    pub async fn search(&self, news: &NewsQuery<'_>, fetch_full_text: bool) -> Result<Vec<Article>> {
        let api_key = self.config.require(NEWS_API_KEY)?;

        let page_size = match news.max_items {
            0 => MAX_PAGE_SIZE,
            n => n.min(MAX_PAGE_SIZE),
        }
        .to_string();
        let mut params: Vec<(&str, &str)> = vec![("q", news.query), ("pageSize", page_size.as_str())];
        if let Some(language) = news.language {
            params.push(("language", language));
        }
        params.extend(news.extra.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        let url = Url::parse_with_params(&self.endpoint, &params)
            .map_err(|e| IngestError::Configuration(format!("bad NewsAPI URL: {e}")))?;

        let response = self
            .http
            .get(url.as_str(), &[("X-Api-Key", api_key.as_str())], API_TIMEOUT)
            .await?;
        let parsed: Option<NewsApiResponse> = serde_json::from_str(&response.body).ok();
        if !response.is_success() || parsed.as_ref().is_some_and(|p| p.status == "error") {
            let message = parsed
                .and_then(|p| p.message)
                .unwrap_or_else(|| truncate_for_log(&response.body, 200));
            warn!(status = response.status, %message, "NewsAPI request failed");
            return Err(IngestError::Fetch(format!(
                "NewsAPI answered HTTP {}: {message}",
                response.status
            )));
        }
        let parsed = parsed.ok_or_else(|| {
            IngestError::Fetch("NewsAPI returned a body that is not a NewsAPI response".to_string())
        })?;

        let articles: Vec<Article> = take_limit(
            parsed.articles.into_iter().map(Article::from).collect(),
            news.max_items,
        );
        info!(count = articles.len(), "NewsAPI returned articles");
        if !fetch_full_text {
            return Ok(articles);
        }

        let articles = stream::iter(articles)
            .then(|mut article| async move {
                if let Some(link) = article.link().map(str::to_string) {
                    article.full_content = Some(self.extractor.fetch(&link).await.content);
                }
                article
            })
            .collect()
            .await;
        Ok(articles)
    }
}

#[async_trait]
impl<'a, H: HttpTransport, C: ConfigProvider> Fetcher for NewsApiFetcher<'a, H, C> {
    fn name(&self) -> &'static str {
        "news_api"
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<Article>> {
        let SourceParams::NewsApi {
            query,
            language,
            fetch_full_text,
            extra,
        } = &request.source
        else {
            return Err(kind_mismatch(self.name(), request));
        };
        let news = NewsQuery {
            query,
            language: language.as_deref(),
            extra,
            max_items: request.max_items,
        };
        self.search(&news, *fetch_full_text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::testing::FakeTransport;
    use std::collections::HashMap;

    const RESPONSE: &str = r#"{
      "status": "ok",
      "totalResults": 3,
      "articles": [
        {"source": {"id": null, "name": "Example"}, "title": "Rust 2024 <b>released</b>",
         "description": "The edition ships.", "url": "https://news.example.com/rust-2024",
         "urlToImage": "https://cdn.example.com/rust.png", "publishedAt": "2025-02-20T10:00:00Z",
         "content": "Rust 2024 is out [+1200 chars]"},
        {"title": null, "description": null, "url": "not a url", "content": null},
        {"title": "Third", "url": "https://news.example.com/third", "content": "Third content"}
      ]
    }"#;

    const PAGE: &str = r#"<html><body><article>
      <p>The full story of the new edition, told at considerable length here.</p>
    </article></body></html>"#;

    fn config() -> HashMap<String, String> {
        HashMap::from([(NEWS_API_KEY.to_string(), "n3ws".to_string())])
    }

    fn request(fetch_full_text: bool, max_items: usize) -> FetchRequest {
        FetchRequest {
            id: "news".to_string(),
            category_id: 0,
            tag_ids: vec![],
            content_type: Default::default(),
            status: Default::default(),
            max_items,
            source: SourceParams::NewsApi {
                query: "rust lang".to_string(),
                language: Some("en".to_string()),
                fetch_full_text,
                extra: BTreeMap::from([("sortBy".to_string(), "publishedAt".to_string())]),
            },
        }
    }

    #[tokio::test]
    async fn test_maps_hits_and_sends_key_header() {
        let http = FakeTransport::new().route(NEWS_API_URL, 200, RESPONSE);
        let config = config();
        let fetcher = NewsApiFetcher::new(&http, &config);
        let articles = fetcher.fetch(&request(false, 0)).await.unwrap();

        assert_eq!(articles.len(), 3);
        let first = &articles[0];
        assert_eq!(first.title, "Rust 2024 released");
        assert_eq!(first.description.as_deref(), Some("The edition ships."));
        assert_eq!(first.link(), Some("https://news.example.com/rust-2024"));
        assert_eq!(first.image_url.as_deref(), Some("https://cdn.example.com/rust.png"));
        assert_eq!(first.publication_date.as_deref(), Some("2025-02-20T10:00:00+00:00"));
        assert_eq!(articles[1].title, crate::models::PLACEHOLDER_TITLE);
        assert_eq!(articles[1].link, None);

        let sent = &http.requests()[0];
        assert!(sent.headers.iter().any(|(k, v)| k == "X-Api-Key" && v == "n3ws"));
        let url = Url::parse(&sent.url).unwrap();
        let pairs: HashMap<String, String> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs["q"], "rust lang");
        assert_eq!(pairs["language"], "en");
        assert_eq!(pairs["sortBy"], "publishedAt");
        assert_eq!(pairs["pageSize"], "100");
    }

    #[tokio::test]
    async fn test_full_text_enrichment_degrades_per_item() {
        let http = FakeTransport::new()
            .route(NEWS_API_URL, 200, RESPONSE)
            .route("https://news.example.com/rust-2024", 200, PAGE)
            .route_error("https://news.example.com/third", "timed out");
        let config = config();
        let fetcher = NewsApiFetcher::new(&http, &config);
        let articles = fetcher.fetch(&request(true, 0)).await.unwrap();

        assert!(articles[0]
            .full_content
            .as_deref()
            .unwrap()
            .contains("full story of the new edition"));
        assert_eq!(articles[1].full_content, None);
        assert_eq!(articles[2].full_content.as_deref(), Some(""));
    }

    #[tokio::test]
    async fn test_max_items_caps_results() {
        let http = FakeTransport::new().route(NEWS_API_URL, 200, RESPONSE);
        let config = config();
        let fetcher = NewsApiFetcher::new(&http, &config);
        let articles = fetcher.fetch(&request(false, 2)).await.unwrap();
        assert_eq!(articles.len(), 2);
        let url = Url::parse(&http.requests()[0].url).unwrap();
        assert!(url.query_pairs().any(|(k, v)| k == "pageSize" && v == "2"));
    }

    #[tokio::test]
    async fn test_api_errors_are_fetch_errors() {
        let http = FakeTransport::new().route(
            NEWS_API_URL,
            401,
            r#"{"status":"error","code":"apiKeyInvalid","message":"Your API key is invalid."}"#,
        );
        let config = config();
        let fetcher = NewsApiFetcher::new(&http, &config);
        let err = fetcher.fetch(&request(false, 0)).await.unwrap_err();
        assert!(matches!(err, IngestError::Fetch(ref m) if m.contains("Your API key is invalid.")));
    }

    #[tokio::test]
    async fn test_missing_key_is_configuration_error() {
        let http = FakeTransport::new();
        let config: HashMap<String, String> = HashMap::new();
        let fetcher = NewsApiFetcher::new(&http, &config);
        assert!(matches!(
            fetcher.fetch(&request(false, 0)).await,
            Err(IngestError::Configuration(_))
        ));
        assert!(http.requests().is_empty());
    }
}
