//! Google Scholar fetcher through SerpAPI.
//!
//! The next snowball query is the first three words of the first raw
//! result's title, even when that result itself is skipped as incomplete. After the traversal each result link is passed through the
//! [`ContentExtractor`]; non-empty text becomes the article's full content.

use super::search::{snowball, SearchPage, SearchProvider};
use super::{kind_mismatch, take_limit, Fetcher};
use crate::config::{ConfigProvider, SCHOLAR_API_KEY};
use crate::error::{IngestError, Result};
use crate::extract::ContentExtractor;
use crate::http::{HttpTransport, API_TIMEOUT};
use crate::models::{Article, FetchRequest, ScholarParams, SourceParams};
use crate::utils::{first_words, is_absolute_url, truncate_for_log};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use url::Url;

pub const SERPAPI_URL: &str = "https://serpapi.com/search.json";

/// Words of the first title used as the next query.
const NEXT_QUERY_WORDS: usize = 3;

/// Fetcher for `scholar` sources.
#[derive(Debug)]
pub struct ScholarFetcher<'a, H, C> {
    http: &'a H,
    config: &'a C,
    extractor: ContentExtractor<'a, H>,
}

impl<'a, H: HttpTransport, C: ConfigProvider> ScholarFetcher<'a, H, C> {
    pub fn new(http: &'a H, config: &'a C) -> Self {
        Self {
            http,
            config,
            extractor: ContentExtractor::new(http),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.extractor = self.extractor.with_timeout(timeout);
        self
    }
}

#[async_trait]
impl<'a, H: HttpTransport, C: ConfigProvider> Fetcher for ScholarFetcher<'a, H, C> {
    fn name(&self) -> &'static str {
        "scholar"
    }

    #[instrument(level = "info", skip_all, fields(source = %request.id))]
    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<Article>> {
        let SourceParams::Scholar(params) = &request.source else {
            return Err(kind_mismatch(self.name(), request));
        };
        let api_key = self.config.require(SCHOLAR_API_KEY)?;

        let provider = ScholarSearch {
            http: self.http,
            api_key,
            params,
        };
        let articles = take_limit(
            snowball(&provider, &params.query, params.max_steps, params.per_step).await?,
            request.max_items,
        );
        if !params.fetch_full_text {
            return Ok(articles);
        }

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
            "Scholar results enriched"
        );
        Ok(articles)
    }
}

/// One Scholar search configuration, used as a snowball provider.
pub struct ScholarSearch<'a, H> {
    pub http: &'a H,
    pub api_key: String,
    pub params: &'a ScholarParams,
}

#[async_trait]
impl<'a, H: HttpTransport> SearchProvider for ScholarSearch<'a, H> {
    fn name(&self) -> &'static str {
        "scholar"
    }

    #[instrument(level = "info", skip_all, fields(%query))]
    async fn search_step(&self, query: &str, per_step: usize) -> Result<SearchPage> {
        let num = per_step.to_string();
        let mut params: Vec<(&str, &str)> = vec![
            ("engine", "google_scholar"),
            ("q", query),
            ("api_key", self.api_key.as_str()),
            ("num", num.as_str()),
        ];
        if let Some(low) = self.params.year_low.as_deref() {
            params.push(("as_ylo", low));
        }
        if let Some(high) = self.params.year_high.as_deref() {
            params.push(("as_yhi", high));
        }
        let url = Url::parse_with_params(SERPAPI_URL, &params)
            .map_err(|e| IngestError::Configuration(format!("bad SerpAPI URL: {e}")))?;

        let response = self.http.get(url.as_str(), &[], API_TIMEOUT).await?;
        let body: Option<Value> = serde_json::from_str(&response.body).ok();
        if let Some(error) = body.as_ref().and_then(|b| b["error"].as_str()) {
            return Err(IngestError::Fetch(format!("Scholar search failed: {error}")));
        }
        if !response.is_success() {
            return Err(IngestError::Fetch(format!(
                "SerpAPI answered HTTP {}: {}",
                response.status,
                truncate_for_log(&response.body, 200)
            )));
        }
        let body = body.ok_or_else(|| IngestError::Fetch("SerpAPI returned invalid JSON".to_string()))?;

        let hits = body["organic_results"].as_array().map_or(0, Vec::len);
        let articles = parse_results(&body);
        let next_query = body["organic_results"][0]["title"]
            .as_str()
            .map(|title| first_words(title, NEXT_QUERY_WORDS))
            .filter(|q| !q.is_empty());
        debug!(hits, count = articles.len(), ?next_query, "Scholar page parsed");
        Ok(SearchPage {
            hits,
            articles,
            next_query,
        })
    }
}

/// Turn `organic_results` into articles, skipping entries without title, snippet or link.
pub fn parse_results(body: &Value) -> Vec<Article> {
    let Some(results) = body["organic_results"].as_array() else {
        return Vec::new();
    };
    results
        .iter()
        .filter_map(|result| {
            let field = |name: &str| {
                result[name]
                    .as_str()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
            };
            match (field("title"), field("snippet"), field("link")) {
                (Some(title), Some(snippet), Some(link)) if is_absolute_url(link) => {
                    let mut article = Article::new(title, snippet).with_link(link);
                    article.description = result["publication_info"]["summary"]
                        .as_str()
                        .map(str::to_string);
                    Some(article)
                }
                _ => {
                    warn!(position = %result["position"], "Scholar result without title, snippet or link skipped");
                    None
                }
            }
        })
        .collect()
}
