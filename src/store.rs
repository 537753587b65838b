//! Content store: where published articles end up.
//!
//! The pipeline only ever checks whether a source link was stored before,
//! creates entries, and flips their read status. Two implementations:
//!
//! - [`MemoryStore`]: in-process, for tests and dry runs
//! - [`JsonFileStore`]: a single JSON document on disk, rewritten after each
//!   mutation and once per [`ContentStore::create_many`] batch

use crate::error::{IngestError, Result};
use crate::models::{dedup_key, ContentType, PostStatus};
use crate::utils::ensure_writable_dir;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};

/// Metadata key holding the dedup key of the article's source link.
pub const SOURCE_LINK_META: &str = "source_link";
pub const PUBLICATION_DATE_META: &str = "publication_date";
pub const IMAGE_URL_META: &str = "image_url";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadStatus {
    #[default]
    Unread,
    Read,
}

/// An entry to be created.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEntry {
    pub title: String,
    pub body: String,
    pub status: PostStatus,
    pub content_type: ContentType,
    /// Only set for primary entries.
    pub category_id: Option<u64>,
    pub tag_ids: Vec<u64>,
    pub metadata: BTreeMap<String, String>,
}

/// A stored entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEntry {
    pub id: u64,
    pub title: String,
    pub body: String,
    pub status: PostStatus,
    pub content_type: ContentType,
    #[serde(default)]
    pub category_id: Option<u64>,
    #[serde(default)]
    pub tag_ids: Vec<u64>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub read_status: ReadStatus,
    /// When the entry was last marked read.
    #[serde(default)]
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl StoredEntry {
    /// The link the entry was published from, decoded from its metadata.
    pub fn source_link(&self) -> Option<String> {
        self.metadata
            .get(SOURCE_LINK_META)
            .and_then(|key| serde_json::from_str::<String>(key).ok())
    }
}

/// Read/append access to published content.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Whether an entry of `content_type` was created from `source_link`.
    async fn exists(&self, source_link: &str, content_type: ContentType) -> Result<bool>;

    /// Store a new entry, initially unread, and return its id.
    async fn create(&self, entry: NewEntry) -> Result<u64>;

    /// Store several entries. One result per entry, in input order.
    async fn create_many(&self, entries: Vec<NewEntry>) -> Vec<Result<u64>> {
        let mut results = Vec::with_capacity(entries.len());
        for entry in entries {
            results.push(self.create(entry).await);
        }
        results
    }

    async fn set_read_status(&self, id: u64, status: ReadStatus) -> Result<StoredEntry>;

    async fn get(&self, id: u64) -> Result<Option<StoredEntry>>;

    /// Entries in creation order, optionally only those with `status`.
    async fn list(&self, status: Option<ReadStatus>) -> Result<Vec<StoredEntry>>;
}

/// The state both stores share; the file store serializes it as is.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreState {
    #[serde(default)]
    next_id: u64,
    #[serde(default)]
    entries: Vec<StoredEntry>,
}

impl StoreState {
    fn exists(&self, source_link: &str, content_type: ContentType) -> bool {
        let key = dedup_key(source_link);
        self.entries.iter().any(|e| {
            e.content_type == content_type
                && e.metadata.get(SOURCE_LINK_META).is_some_and(|k| *k == key)
        })
    }

    fn insert(&mut self, entry: NewEntry) -> u64 {
        self.next_id = self
            .next_id
            .max(self.entries.iter().map(|e| e.id).max().unwrap_or(0))
            + 1;
        let id = self.next_id;
        self.entries.push(StoredEntry {
            id,
            title: entry.title,
            body: entry.body,
            status: entry.status,
            content_type: entry.content_type,
            category_id: entry.category_id,
            tag_ids: entry.tag_ids,
            metadata: entry.metadata,
            read_status: ReadStatus::Unread,
            read_at: None,
            created_at: Utc::now(),
        });
        id
    }

    fn set_read_status(&mut self, id: u64, status: ReadStatus) -> Result<StoredEntry> {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| IngestError::Store(format!("no entry with id {id}")))?;
        entry.read_status = status;
        entry.read_at = match status {
            ReadStatus::Read => Some(Utc::now()),
            ReadStatus::Unread => None,
        };
        Ok(entry.clone())
    }

    fn get(&self, id: u64) -> Option<StoredEntry> {
        self.entries.iter().find(|e| e.id == id).cloned()
    }

    fn list(&self, status: Option<ReadStatus>) -> Vec<StoredEntry> {
        self.entries
            .iter()
            .filter(|e| status.is_none_or(|s| e.read_status == s))
            .cloned()
            .collect()
    }
}

/// In-process store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn exists(&self, source_link: &str, content_type: ContentType) -> Result<bool> {
        Ok(self.state.read().await.exists(source_link, content_type))
    }

    async fn create(&self, entry: NewEntry) -> Result<u64> {
        Ok(self.state.write().await.insert(entry))
    }

    async fn set_read_status(&self, id: u64, status: ReadStatus) -> Result<StoredEntry> {
        self.state.write().await.set_read_status(id, status)
    }

    async fn get(&self, id: u64) -> Result<Option<StoredEntry>> {
        Ok(self.state.read().await.get(id))
    }

    async fn list(&self, status: Option<ReadStatus>) -> Result<Vec<StoredEntry>> {
        Ok(self.state.read().await.list(status))
    }
}

/// Store persisted as one JSON document.
///
/// The document is rewritten through a temporary file and a rename after
/// every mutation, so a crash leaves either the old or the new state.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    state: RwLock<StoreState>,
}

impl JsonFileStore {
    /// Open `path`, creating the parent directory if needed. A missing file is an empty store.
    #[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            ensure_writable_dir(parent).await?;
        }
        let state = match fs::read_to_string(&path).await {
            Ok(raw) => serde_json::from_str(&raw).map_err(|e| {
                IngestError::Store(format!("{} is not a valid store file: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreState::default(),
            Err(e) => return Err(e.into()),
        };
        info!(entries = state.entries.len(), "Opened content store");
        Ok(Self {
            path,
            state: RwLock::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, state: &StoreState) -> Result<()> {
        let json = serde_json::to_string_pretty(state)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).await?;
        fs::rename(&tmp, &self.path).await?;
        debug!(entries = state.entries.len(), "Persisted content store");
        Ok(())
    }
}

#[async_trait]
impl ContentStore for JsonFileStore {
    async fn exists(&self, source_link: &str, content_type: ContentType) -> Result<bool> {
        Ok(self.state.read().await.exists(source_link, content_type))
    }

    async fn create(&self, entry: NewEntry) -> Result<u64> {
        let mut state = self.state.write().await;
        let mut next = state.clone();
        let id = next.insert(entry);
        self.persist(&next).await?;
        *state = next;
        Ok(id)
    }

    /// The whole batch is written with a single persist; if that fails no entry is kept.
    async fn create_many(&self, entries: Vec<NewEntry>) -> Vec<Result<u64>> {
        if entries.is_empty() {
            return Vec::new();
        }
        let mut state = self.state.write().await;
        let mut next = state.clone();
        let ids: Vec<u64> = entries.into_iter().map(|entry| next.insert(entry)).collect();
        match self.persist(&next).await {
            Ok(()) => {
                *state = next;
                ids.into_iter().map(Ok).collect()
            }
            Err(e) => {
                let reason = e.to_string();
                ids.iter()
                    .map(|_| Err(IngestError::Store(format!("batch not persisted: {reason}"))))
                    .collect()
            }
        }
    }

    async fn set_read_status(&self, id: u64, status: ReadStatus) -> Result<StoredEntry> {
        let mut state = self.state.write().await;
        let mut next = state.clone();
        let entry = next.set_read_status(id, status)?;
        self.persist(&next).await?;
        *state = next;
        Ok(entry)
    }

    async fn get(&self, id: u64) -> Result<Option<StoredEntry>> {
        Ok(self.state.read().await.get(id))
    }

    async fn list(&self, status: Option<ReadStatus>) -> Result<Vec<StoredEntry>> {
        Ok(self.state.read().await.list(status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(link: &str, content_type: ContentType) -> NewEntry {
        NewEntry {
            title: "T".to_string(),
            body: "B".to_string(),
            status: PostStatus::Draft,
            content_type,
            category_id: Some(5),
            tag_ids: vec![1, 2],
            metadata: BTreeMap::from([(SOURCE_LINK_META.to_string(), dedup_key(link))]),
        }
    }

    #[tokio::test]
    async fn test_memory_store_exists_by_link_and_type() {
        let store = MemoryStore::new();
        assert!(!store.exists("https://x/1", ContentType::Post).await.unwrap());

        let id = store.create(entry("https://x/1", ContentType::Post)).await.unwrap();
        assert_eq!(id, 1);
        assert!(store.exists("https://x/1", ContentType::Post).await.unwrap());
        assert!(!store.exists("https://x/1", ContentType::Page).await.unwrap());
        assert!(!store.exists("https://x/2", ContentType::Post).await.unwrap());

        let stored = store.get(id).await.unwrap().unwrap();
        assert_eq!(stored.read_status, ReadStatus::Unread);
        assert_eq!(stored.source_link().as_deref(), Some("https://x/1"));
    }

    #[tokio::test]
    async fn test_read_tracking() {
        let store = MemoryStore::new();
        let a = store.create(entry("https://x/1", ContentType::Post)).await.unwrap();
        let b = store.create(entry("https://x/2", ContentType::Post)).await.unwrap();

        let marked = store.set_read_status(a, ReadStatus::Read).await.unwrap();
        assert_eq!(marked.read_status, ReadStatus::Read);
        assert!(marked.read_at.is_some());

        let unread = store.list(Some(ReadStatus::Unread)).await.unwrap();
        assert_eq!(unread.iter().map(|e| e.id).collect::<Vec<_>>(), vec![b]);
        assert_eq!(store.list(None).await.unwrap().len(), 2);

        let back = store.set_read_status(a, ReadStatus::Unread).await.unwrap();
        assert_eq!(back.read_at, None);
        assert!(matches!(
            store.set_read_status(99, ReadStatus::Read).await,
            Err(IngestError::Store(_))
        ));
    }

    #[tokio::test]
    async fn test_json_file_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.json");

        let store = JsonFileStore::open(&path).await.unwrap();
        let id = store.create(entry("https://x/1", ContentType::Post)).await.unwrap();
        store.set_read_status(id, ReadStatus::Read).await.unwrap();
        drop(store);

        let reopened = JsonFileStore::open(&path).await.unwrap();
        assert!(reopened.exists("https://x/1", ContentType::Post).await.unwrap());
        let stored = reopened.get(id).await.unwrap().unwrap();
        assert_eq!(stored.read_status, ReadStatus::Read);
        assert_eq!(stored.tag_ids, vec![1, 2]);

        let next = reopened.create(entry("https://x/2", ContentType::Page)).await.unwrap();
        assert_eq!(next, id + 1);
    }

    #[tokio::test]
    async fn test_json_file_store_batch_create() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        let store = JsonFileStore::open(&path).await.unwrap();
        let first = store.create(entry("https://x/0", ContentType::Post)).await.unwrap();
        let results = store
            .create_many(vec![
                entry("https://x/1", ContentType::Post),
                entry("https://x/2", ContentType::Post),
            ])
            .await;
        let ids: Vec<u64> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(ids, vec![first + 1, first + 2]);
        assert!(store.create_many(Vec::new()).await.is_empty());
        drop(store);

        let reopened = JsonFileStore::open(&path).await.unwrap();
        assert_eq!(reopened.list(None).await.unwrap().len(), 3);
        assert!(reopened.exists("https://x/2", ContentType::Post).await.unwrap());
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_failed_batch_keeps_previous_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let store = JsonFileStore::open(&path).await.unwrap();
        store.create(entry("https://x/0", ContentType::Post)).await.unwrap();

        tokio::fs::remove_dir_all(dir.path()).await.unwrap();
        let results = store
            .create_many(vec![entry("https://x/1", ContentType::Post)])
            .await;
        assert!(matches!(results.as_slice(), [Err(IngestError::Store(_))]));
        assert!(!store.exists("https://x/1", ContentType::Post).await.unwrap());
        assert_eq!(store.list(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_json_file_store_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        tokio::fs::write(&path, "not json").await.unwrap();
        assert!(matches!(
            JsonFileStore::open(&path).await,
            Err(IngestError::Store(_))
        ));
    }
}
