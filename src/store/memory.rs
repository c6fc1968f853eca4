//! In-memory [`ChunkStore`] implementation for testing and the CLI.
//!
//! Collections live in a `HashMap` behind `std::sync::RwLock`. Search is a
//! brute-force keyword match: a chunk scores the fraction of query terms
//! found in its content.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::chunk::document_id_for_url;
use crate::error::{Error, Result};
use crate::models::{Chunk, Document, SearchHit};

use super::{ChunkStore, CollectionLayout};

struct StoredCollection {
    layout: CollectionLayout,
    /// Insertion order, overwritten in place on re-index.
    rows: Vec<Chunk>,
}

/// In-memory store for tests and local runs.
pub struct InMemoryChunkStore {
    collections: RwLock<HashMap<String, StoredCollection>>,
}

impl InMemoryChunkStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
        }
    }

    /// Create (or reset) a collection with the given layout.
    pub fn create_collection(&self, name: &str, layout: CollectionLayout) -> Result<()> {
        self.write()?.insert(
            name.to_string(),
            StoredCollection {
                layout,
                rows: Vec::new(),
            },
        );
        Ok(())
    }

    /// Store a whole document as one row of a flat collection.
    pub fn insert_flat(&self, collection: &str, doc: &Document) -> Result<()> {
        let row = Chunk {
            document_id: document_id_for_url(&doc.url),
            chunk_index: 0,
            total_chunks: 1,
            title: doc.title.clone(),
            content: doc.body.clone(),
            url: doc.url.clone(),
            source_name: doc.source_name.clone(),
            category: doc.category.clone(),
            published_at: doc.published_at,
            fetched_at: doc.fetched_at,
            excerpt: doc.excerpt.clone(),
            scope: doc.scope.clone(),
        };
        let mut guard = self.write()?;
        let stored = get_mut(&mut guard, collection)?;
        stored.rows.push(row);
        Ok(())
    }

    /// Number of rows in a collection.
    pub fn len(&self, collection: &str) -> Result<usize> {
        let guard = self.read()?;
        Ok(get(&guard, collection)?.rows.len())
    }

    pub fn is_empty(&self, collection: &str) -> Result<bool> {
        self.len(collection).map(|n| n == 0)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, StoredCollection>>> {
        self.collections
            .read()
            .map_err(|_| Error::StorageUnavailable("in-memory store lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, StoredCollection>>> {
        self.collections
            .write()
            .map_err(|_| Error::StorageUnavailable("in-memory store lock poisoned".into()))
    }
}

impl Default for InMemoryChunkStore {
    fn default() -> Self {
        Self::new()
    }
}

fn get<'a>(
    collections: &'a HashMap<String, StoredCollection>,
    name: &str,
) -> Result<&'a StoredCollection> {
    collections
        .get(name)
        .ok_or_else(|| Error::StorageUnavailable(format!("collection '{}' does not exist", name)))
}

fn get_mut<'a>(
    collections: &'a mut HashMap<String, StoredCollection>,
    name: &str,
) -> Result<&'a mut StoredCollection> {
    collections
        .get_mut(name)
        .ok_or_else(|| Error::StorageUnavailable(format!("collection '{}' does not exist", name)))
}

/// Fraction of `terms` contained in `text`, in `[0, 1]`.
fn term_score(terms: &[String], text: &str) -> f64 {
    if terms.is_empty() {
        return 0.0;
    }
    let text_lower = text.to_lowercase();
    let matches = terms.iter().filter(|t| text_lower.contains(t.as_str())).count();
    matches as f64 / terms.len() as f64
}

#[async_trait]
impl ChunkStore for InMemoryChunkStore {
    async fn index(&self, collection: &str, chunk: &Chunk) -> Result<()> {
        let mut guard = self.write()?;
        let stored = get_mut(&mut guard, collection)?;
        let key = chunk.object_id();
        match stored.rows.iter_mut().find(|row| row.object_id() == key) {
            Some(existing) => *existing = chunk.clone(),
            None => stored.rows.push(chunk.clone()),
        }
        Ok(())
    }

    async fn search(&self, collection: &str, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let terms: Vec<String> = query
            .to_lowercase()
            .split_whitespace()
            .map(str::to_string)
            .collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let guard = self.read()?;
        let stored = get(&guard, collection)?;
        let mut hits: Vec<SearchHit> = stored
            .rows
            .iter()
            .filter_map(|row| {
                let score = term_score(&terms, &row.content);
                (score > 0.0).then(|| SearchHit {
                    chunk: row.clone(),
                    relevance_score: score,
                })
            })
            .collect();

        // Stable sort keeps insertion order among equal scores.
        hits.sort_by(|a, b| {
            b.relevance_score
                .partial_cmp(&a.relevance_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn fetch_by_document_id(
        &self,
        collection: &str,
        document_id: &str,
    ) -> Result<Vec<Chunk>> {
        let guard = self.read()?;
        let stored = get(&guard, collection)?;
        Ok(stored
            .rows
            .iter()
            .filter(|row| row.document_id == document_id)
            .cloned()
            .collect())
    }

    async fn describe_schema(&self, collection: &str) -> Result<BTreeSet<String>> {
        let guard = self.read()?;
        let stored = get(&guard, collection)?;
        Ok(stored
            .layout
            .fields()
            .iter()
            .map(|f| f.to_string())
            .collect())
    }

    async fn delete_by_document_id(&self, collection: &str, document_id: &str) -> Result<usize> {
        let mut guard = self.write()?;
        let stored = get_mut(&mut guard, collection)?;
        let before = stored.rows.len();
        stored.rows.retain(|row| row.document_id != document_id);
        Ok(before - stored.rows.len())
    }

    async fn existing_urls(&self, collection: &str, scope: &str) -> Result<HashSet<String>> {
        let guard = self.read()?;
        let stored = get(&guard, collection)?;
        Ok(stored
            .rows
            .iter()
            .filter(|row| row.scope == scope)
            .map(|row| row.url.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(document_id: &str, index: usize, total: usize, content: &str) -> Chunk {
        Chunk {
            document_id: document_id.to_string(),
            chunk_index: index,
            total_chunks: total,
            title: format!("Title {}", document_id),
            content: content.to_string(),
            url: format!("https://example.com/{}", document_id),
            source_name: "src".to_string(),
            category: "news".to_string(),
            published_at: None,
            fetched_at: None,
            excerpt: None,
            scope: "task".to_string(),
        }
    }

    fn store() -> InMemoryChunkStore {
        let store = InMemoryChunkStore::new();
        store
            .create_collection("news", CollectionLayout::Chunked)
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_index_overwrites_same_position() {
        let store = store();
        store.index("news", &chunk("d1", 0, 1, "old")).await.unwrap();
        store.index("news", &chunk("d1", 0, 1, "new")).await.unwrap();
        assert_eq!(store.len("news").unwrap(), 1);
        let fetched = store.fetch_by_document_id("news", "d1").await.unwrap();
        assert_eq!(fetched[0].content, "new");
    }

    #[tokio::test]
    async fn test_search_scores_term_fraction() {
        let store = store();
        store
            .index("news", &chunk("d1", 0, 1, "rust async runtime"))
            .await
            .unwrap();
        store
            .index("news", &chunk("d2", 0, 1, "rust borrow checker"))
            .await
            .unwrap();
        store
            .index("news", &chunk("d3", 0, 1, "python"))
            .await
            .unwrap();

        let hits = store.search("news", "Rust ASYNC", 10).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.document_id, "d1");
        assert!((hits[0].relevance_score - 1.0).abs() < 1e-9);
        assert!((hits[1].relevance_score - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_search_respects_limit_and_empty_query() {
        let store = store();
        for i in 0..5 {
            store
                .index("news", &chunk(&format!("d{}", i), 0, 1, "shared term"))
                .await
                .unwrap();
        }
        assert_eq!(store.search("news", "shared", 3).await.unwrap().len(), 3);
        assert!(store.search("news", "   ", 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_and_delete_by_document_id() {
        let store = store();
        for i in 0..3 {
            store.index("news", &chunk("d1", i, 3, "part")).await.unwrap();
        }
        store.index("news", &chunk("d2", 0, 1, "other")).await.unwrap();

        assert_eq!(store.fetch_by_document_id("news", "d1").await.unwrap().len(), 3);
        assert_eq!(store.delete_by_document_id("news", "d1").await.unwrap(), 3);
        assert!(store.fetch_by_document_id("news", "d1").await.unwrap().is_empty());
        assert_eq!(store.len("news").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_existing_urls_by_scope() {
        let store = store();
        store.index("news", &chunk("d1", 0, 1, "a")).await.unwrap();
        let mut other = chunk("d2", 0, 1, "b");
        other.scope = "other".to_string();
        store.index("news", &other).await.unwrap();

        let urls = store.existing_urls("news", "task").await.unwrap();
        assert_eq!(urls.len(), 1);
        assert!(urls.contains("https://example.com/d1"));
    }

    #[tokio::test]
    async fn test_describe_schema_matches_layout() {
        let store = store();
        store
            .create_collection("articles", CollectionLayout::Flat)
            .unwrap();
        let chunked = store.describe_schema("news").await.unwrap();
        let flat = store.describe_schema("articles").await.unwrap();
        assert_eq!(CollectionLayout::from_fields(&chunked), CollectionLayout::Chunked);
        assert_eq!(CollectionLayout::from_fields(&flat), CollectionLayout::Flat);
    }

    #[tokio::test]
    async fn test_unknown_collection_is_unavailable() {
        let store = store();
        let result = store.search("missing", "x", 1).await;
        assert!(matches!(result, Err(Error::StorageUnavailable(_))));
    }
}
