//! Multi-step "snowball" traversal over a paginated search API.
//!
//! Each step issues one search with the current query. The provider derives
//! the next query from the step's results; the traversal stops after
//! `max_steps` calls, on a search that matched nothing, or when no next query
//! can be derived. A page whose hits all failed to normalize still counts as
//! a match, so the traversal goes on.

use crate::error::{IngestError, Result};
use crate::models::Article;
use async_trait::async_trait;
use std::collections::HashSet;
use tracing::{info, instrument};

/// Results of one search call.
#[derive(Debug, Clone, Default)]
pub struct SearchPage {
    /// Hits the search itself returned, before any detail fetch.
    pub hits: usize,
    pub articles: Vec<Article>,
    /// Query for the next step, derived from this page.
    pub next_query: Option<String>,
}

/// One search backend (PubMed, Scholar).
#[async_trait]
pub trait SearchProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Run one search call returning at most `per_step` hits.
    async fn search_step(&self, query: &str, per_step: usize) -> Result<SearchPage>;
}

/// Walk up to `max_steps` pages starting at `query`.
///
/// Articles already collected in an earlier step (same link) are not added
/// twice.
///
/// # Errors
///
/// Errors from a step abort the traversal. [`IngestError::NoResults`] when
/// nothing was collected at all.
#[instrument(level = "info", skip_all, fields(provider = provider.name(), %query, max_steps, per_step))]
pub async fn snowball<P: SearchProvider>(
    provider: &P,
    query: &str,
    max_steps: usize,
    per_step: usize,
) -> Result<Vec<Article>> {
    let mut collected: Vec<Article> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut current = query.to_string();

    for step in 0..max_steps {
        let page = provider.search_step(&current, per_step).await?;
        if page.hits == 0 {
            info!(step, query = %current, "Empty page; stopping traversal");
            break;
        }
        let before = collected.len();
        for article in page.articles {
            let fresh = match article.link() {
                Some(link) => seen.insert(link.to_string()),
                None => true,
            };
            if fresh {
                collected.push(article);
            }
        }
        info!(step, hits = page.hits, added = collected.len() - before, total = collected.len(), "Search step done");

        match page.next_query {
            Some(next) if !next.trim().is_empty() => current = next,
            _ => break,
        }
    }

    if collected.is_empty() {
        return Err(IngestError::NoResults(query.to_string()));
    }
    Ok(collected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Serves scripted pages and records every query it receives.
    struct ScriptedProvider {
        pages: Mutex<Vec<SearchPage>>,
        queries: Mutex<Vec<String>>,
    }

    impl ScriptedProvider {
        fn new(pages: Vec<SearchPage>) -> Self {
            Self {
                pages: Mutex::new(pages),
                queries: Mutex::new(Vec::new()),
            }
        }

        fn queries(&self) -> Vec<String> {
            self.queries.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SearchProvider for ScriptedProvider {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn search_step(&self, query: &str, _per_step: usize) -> Result<SearchPage> {
            self.queries.lock().unwrap().push(query.to_string());
            let mut pages = self.pages.lock().unwrap();
            if pages.is_empty() {
                Ok(SearchPage::default())
            } else {
                Ok(pages.remove(0))
            }
        }
    }

    fn page(links: &[&str], next: &str) -> SearchPage {
        SearchPage {
            hits: links.len(),
            articles: links
                .iter()
                .map(|l| Article::new(l, "c").with_link(*l))
                .collect(),
            next_query: Some(next.to_string()),
        }
    }

    #[tokio::test]
    async fn test_stops_after_max_steps() {
        let provider = ScriptedProvider::new(vec![
            page(&["https://x/1"], "q2"),
            page(&["https://x/2"], "q3"),
            page(&["https://x/3"], "q4"),
            page(&["https://x/4"], "q5"),
        ]);
        let articles = snowball(&provider, "q1", 3, 10).await.unwrap();
        assert_eq!(articles.len(), 3);
        assert_eq!(provider.queries(), vec!["q1", "q2", "q3"]);
    }

    #[tokio::test]
    async fn test_empty_page_stops_early() {
        let provider = ScriptedProvider::new(vec![page(&["https://x/1"], "q2")]);
        let articles = snowball(&provider, "q1", 5, 10).await.unwrap();
        assert_eq!(articles.len(), 1);
        assert_eq!(provider.queries().len(), 2);
    }

    #[tokio::test]
    async fn test_page_of_unusable_hits_keeps_traversing() {
        let provider = ScriptedProvider::new(vec![
            SearchPage {
                hits: 2,
                articles: vec![],
                next_query: Some("q2".to_string()),
            },
            page(&["https://x/2"], "q3"),
        ]);
        let articles = snowball(&provider, "q1", 2, 10).await.unwrap();
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].link(), Some("https://x/2"));
        assert_eq!(provider.queries(), vec!["q1", "q2"]);
    }

    #[tokio::test]
    async fn test_nothing_collected_is_no_results() {
        let provider = ScriptedProvider::new(vec![]);
        let err = snowball(&provider, "nothing", 4, 10).await.unwrap_err();
        assert!(matches!(err, IngestError::NoResults(ref q) if q == "nothing"));
        assert_eq!(provider.queries().len(), 1);
    }

    #[tokio::test]
    async fn test_repeated_links_are_collected_once() {
        let provider = ScriptedProvider::new(vec![
            page(&["https://x/1", "https://x/2"], "q2"),
            page(&["https://x/2", "https://x/3"], "q3"),
        ]);
        let articles = snowball(&provider, "q1", 2, 10).await.unwrap();
        let links: Vec<_> = articles.iter().filter_map(|a| a.link()).collect();
        assert_eq!(links, vec!["https://x/1", "https://x/2", "https://x/3"]);
    }
}
