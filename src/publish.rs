//! The sink of every pipeline run.
//!
//! [`Publisher::publish`] walks a batch of articles in order, skips the ones
//! whose source link is already stored (or repeated earlier in the batch),
//! composes a plain-text body for the rest and hands them to the store in a
//! single [`ContentStore::create_many`] call.

use crate::error::Result;
use crate::models::{dedup_key, Article, PublishResult, PublishTarget};
use crate::store::{ContentStore, NewEntry, IMAGE_URL_META, PUBLICATION_DATE_META, SOURCE_LINK_META};
use crate::utils::{strip_markup, tidy_paragraphs, truncate_for_log};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info, instrument, warn};

/// Separates the description, full text, short content and source marker.
pub const CONTENT_DIVIDER: &str = "\n\n";

/// Build the stored body of `article`.
///
/// Order: description, then full text and short content (full text first,
/// either one alone when the other is empty), then a `{"source": link}`
/// marker. Markup is stripped from the result.
pub fn compose_body(article: &Article) -> String {
    let mut parts: Vec<String> = Vec::with_capacity(4);

    if let Some(description) = article.description.as_deref().filter(|d| !d.trim().is_empty()) {
        parts.push(description.to_string());
    }

    let full = article.full_content.as_deref().unwrap_or_default().trim();
    let short = article.content.trim();
    match (full.is_empty(), short.is_empty()) {
        (false, false) if full != short => parts.push(format!("{full}{CONTENT_DIVIDER}{short}")),
        (false, _) => parts.push(full.to_string()),
        (true, false) => parts.push(short.to_string()),
        (true, true) => {}
    }

    let body = tidy_paragraphs(&strip_markup(&parts.join(CONTENT_DIVIDER)));
    match article.link() {
        Some(link) => {
            let marker = serde_json::json!({ "source": link }).to_string();
            if body.is_empty() {
                marker
            } else {
                format!("{body}{CONTENT_DIVIDER}{marker}")
            }
        }
        None => body,
    }
}

/// Side fields recorded with the entry, each value JSON-encoded.
fn entry_metadata(article: &Article) -> BTreeMap<String, String> {
    let mut metadata = BTreeMap::new();
    if let Some(link) = article.link() {
        metadata.insert(SOURCE_LINK_META.to_string(), dedup_key(link));
    }
    if let Some(date) = article.publication_date.as_deref() {
        metadata.insert(PUBLICATION_DATE_META.to_string(), dedup_key(date));
    }
    if let Some(image) = article.image_url.as_deref() {
        metadata.insert(IMAGE_URL_META.to_string(), dedup_key(image));
    }
    metadata
}

/// Stores articles into a [`ContentStore`], skipping duplicates.
#[derive(Debug)]
pub struct Publisher<'a, S> {
    store: &'a S,
}

impl<'a, S: ContentStore> Publisher<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Publish `articles` in order.
    ///
    /// Category and tags are only attached when the target content type is
    /// the primary one. An entry the store fails to create is logged and
    /// skipped; a failing `exists` check aborts the batch, since publishing
    /// blind could duplicate entries.
    #[instrument(level = "info", skip_all, fields(articles = articles.len(), content_type = %target.content_type, status = %target.status))]
    pub async fn publish(&self, articles: &[Article], target: &PublishTarget) -> Result<PublishResult> {
        let primary = target.content_type.is_primary();
        let mut pending: Vec<(&str, NewEntry)> = Vec::new();
        let mut batch_links: HashSet<&str> = HashSet::new();
        let mut skipped = 0usize;

        for article in articles {
            if let Some(link) = article.link() {
                if !batch_links.insert(link) {
                    debug!(%link, "Repeated within the batch, skipping");
                    skipped += 1;
                    continue;
                }
                if self.store.exists(link, target.content_type).await? {
                    debug!(%link, "Already published, skipping");
                    skipped += 1;
                    continue;
                }
            } else {
                warn!(title = %truncate_for_log(&article.title, 80), "Article has no link and cannot be deduplicated");
            }

            let entry = NewEntry {
                title: article.title.clone(),
                body: compose_body(article),
                status: target.status,
                content_type: target.content_type,
                category_id: (primary && target.category_id != 0).then_some(target.category_id),
                tag_ids: if primary { target.tag_ids.clone() } else { Vec::new() },
                metadata: entry_metadata(article),
            };
            pending.push((article.title.as_str(), entry));
        }

        let (titles, entries): (Vec<&str>, Vec<NewEntry>) = pending.into_iter().unzip();
        let results = self.store.create_many(entries).await;
        let mut created_ids = Vec::with_capacity(results.len());
        for (title, result) in titles.into_iter().zip(results) {
            match result {
                Ok(id) => {
                    debug!(id, title = %truncate_for_log(title, 80), "Created entry");
                    created_ids.push(id);
                }
                Err(e) => {
                    warn!(title = %truncate_for_log(title, 80), error = %e, "Failed to store article, skipping");
                }
            }
        }

        let result = PublishResult::from_ids(created_ids);
        info!(created = result.count, skipped, "Publish complete");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContentType, PostStatus, SourceLink};
    use crate::error::IngestError;
    use crate::store::{MemoryStore, ReadStatus, StoredEntry};
    use async_trait::async_trait;

    /// Memory store that refuses to create entries with one given title.
    struct RejectingStore {
        inner: MemoryStore,
        reject_title: &'static str,
    }

    #[async_trait]
    impl ContentStore for RejectingStore {
        async fn exists(&self, source_link: &str, content_type: ContentType) -> Result<bool> {
            self.inner.exists(source_link, content_type).await
        }

        async fn create(&self, entry: NewEntry) -> Result<u64> {
            if entry.title == self.reject_title {
                return Err(IngestError::Store("disk full".to_string()));
            }
            self.inner.create(entry).await
        }

        async fn set_read_status(&self, id: u64, status: ReadStatus) -> Result<StoredEntry> {
            self.inner.set_read_status(id, status).await
        }

        async fn get(&self, id: u64) -> Result<Option<StoredEntry>> {
            self.inner.get(id).await
        }

        async fn list(&self, status: Option<ReadStatus>) -> Result<Vec<StoredEntry>> {
            self.inner.list(status).await
        }
    }

    fn target(content_type: ContentType) -> PublishTarget {
        PublishTarget {
            category_id: 5,
            tag_ids: vec![1, 2],
            status: PostStatus::Draft,
            content_type,
        }
    }

    #[tokio::test]
    async fn test_publish_single_article_into_empty_store() {
        let store = MemoryStore::new();
        let publisher = Publisher::new(&store);
        let articles = vec![Article::new("T", "C").with_link("https://x/1")];

        let result = publisher.publish(&articles, &target(ContentType::Post)).await.unwrap();
        assert_eq!(result.count, 1);
        assert_eq!(result.created_ids.len(), 1);
        assert!(store.exists("https://x/1", ContentType::Post).await.unwrap());

        let entry = store.get(result.created_ids[0]).await.unwrap().unwrap();
        assert_eq!(entry.title, "T");
        assert_eq!(entry.category_id, Some(5));
        assert_eq!(entry.tag_ids, vec![1, 2]);
        assert_eq!(entry.status, PostStatus::Draft);
        assert_eq!(entry.read_status, ReadStatus::Unread);
        assert_eq!(entry.body, "C\n\n{\"source\":\"https://x/1\"}");
    }

    #[tokio::test]
    async fn test_publish_is_idempotent() {
        let store = MemoryStore::new();
        let publisher = Publisher::new(&store);
        let articles = vec![
            Article::new("A", "a").with_link("https://x/1"),
            Article::new("B", "b").with_link("https://x/2"),
        ];

        let first = publisher.publish(&articles, &target(ContentType::Post)).await.unwrap();
        assert_eq!(first.count, 2);
        let second = publisher.publish(&articles, &target(ContentType::Post)).await.unwrap();
        assert_eq!(second, PublishResult::default());
    }

    #[tokio::test]
    async fn test_wrapped_link_dedups_against_bare_link() {
        let store = MemoryStore::new();
        let publisher = Publisher::new(&store);
        let bare = vec![Article::new("A", "a").with_link("https://x/1")];
        let wrapped = vec![Article::new("A", "a").with_link(SourceLink::List(vec!["https://x/1".to_string()]))];

        assert_eq!(publisher.publish(&bare, &target(ContentType::Post)).await.unwrap().count, 1);
        assert_eq!(publisher.publish(&wrapped, &target(ContentType::Post)).await.unwrap().count, 0);
    }

    #[tokio::test]
    async fn test_order_kept_around_skips() {
        let store = MemoryStore::new();
        let publisher = Publisher::new(&store);
        publisher
            .publish(&[Article::new("B", "b").with_link("https://x/2")], &target(ContentType::Post))
            .await
            .unwrap();

        let batch = vec![
            Article::new("A", "a").with_link("https://x/1"),
            Article::new("B", "b").with_link("https://x/2"),
            Article::new("C", "c").with_link("https://x/3"),
        ];
        let result = publisher.publish(&batch, &target(ContentType::Post)).await.unwrap();
        assert_eq!(result.count, 2);
        let titles: Vec<String> = futures::future::join_all(
            result.created_ids.iter().map(|id| store.get(*id)),
        )
        .await
        .into_iter()
        .map(|e| e.unwrap().unwrap().title)
        .collect();
        assert_eq!(titles, vec!["A", "C"]);
    }

    #[tokio::test]
    async fn test_repeated_link_in_one_batch_created_once() {
        let store = MemoryStore::new();
        let publisher = Publisher::new(&store);
        let batch = vec![
            Article::new("A", "a").with_link("https://x/1"),
            Article::new("A again", "a").with_link("https://x/1"),
            Article::new("B", "b").with_link("https://x/2"),
        ];

        let result = publisher.publish(&batch, &target(ContentType::Post)).await.unwrap();
        assert_eq!(result.count, 2);
        let titles: Vec<String> = store
            .list(None)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.title)
            .collect();
        assert_eq!(titles, vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_failed_create_skips_only_that_article() {
        let store = RejectingStore {
            inner: MemoryStore::new(),
            reject_title: "B",
        };
        let publisher = Publisher::new(&store);
        let batch = vec![
            Article::new("A", "a").with_link("https://x/1"),
            Article::new("B", "b").with_link("https://x/2"),
            Article::new("C", "c").with_link("https://x/3"),
        ];

        let result = publisher.publish(&batch, &target(ContentType::Post)).await.unwrap();
        assert_eq!(result.count, 2);
        assert!(store.exists("https://x/1", ContentType::Post).await.unwrap());
        assert!(!store.exists("https://x/2", ContentType::Post).await.unwrap());
        assert!(store.exists("https://x/3", ContentType::Post).await.unwrap());
    }

    #[tokio::test]
    async fn test_pages_get_no_category_or_tags() {
        let store = MemoryStore::new();
        let publisher = Publisher::new(&store);
        let result = publisher
            .publish(&[Article::new("P", "p").with_link("https://x/p")], &target(ContentType::Page))
            .await
            .unwrap();
        let entry = store.get(result.created_ids[0]).await.unwrap().unwrap();
        assert_eq!(entry.category_id, None);
        assert!(entry.tag_ids.is_empty());
        assert!(!store.exists("https://x/p", ContentType::Post).await.unwrap());
    }

    #[test]
    fn test_compose_body_content_fallback() {
        let empty_full = Article::new("T", "C").with_full_content("");
        let body = compose_body(&empty_full);
        assert_eq!(body, "C");

        let both = Article::new("T", "C").with_full_content("F");
        assert_eq!(compose_body(&both), "F\n\nC");
    }

    #[test]
    fn test_compose_body_description_and_markup() {
        let mut article = Article::new("T", "<p>Short <b>text</b></p>")
            .with_full_content("<div>Long text</div>")
            .with_link("https://x/1");
        article.description = Some("Summary".to_string());

        let body = compose_body(&article);
        assert!(body.starts_with("Summary\n\nLong text\n\nShort text"));
        assert!(body.ends_with("{\"source\":\"https://x/1\"}"));
        assert!(!body.contains('<'));
    }

    #[test]
    fn test_metadata_side_fields() {
        let mut article = Article::new("T", "C").with_link("https://x/1");
        article.publication_date = Some("2025-01-02T00:00:00+00:00".to_string());
        let metadata = entry_metadata(&article);
        assert_eq!(metadata[SOURCE_LINK_META], "\"https://x/1\"");
        assert_eq!(metadata[PUBLICATION_DATE_META], "\"2025-01-02T00:00:00+00:00\"");
        assert!(!metadata.contains_key(IMAGE_URL_META));
    }
}
