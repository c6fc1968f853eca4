//! Chunk storage abstraction.
//!
//! The [`ChunkStore`] trait is the boundary to whatever vector or keyword
//! store actually holds the chunks. The merger and ingestion pipeline only
//! talk to this trait, so backends are pluggable (the bundled
//! [`memory::InMemoryChunkStore`] is used by tests and the CLI).
//!
//! Implementations must be `Send + Sync`; concurrent read calls are issued
//! during retrieval.

pub mod memory;
pub mod retry;

use std::collections::{BTreeSet, HashSet};

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Chunk, SearchHit};

pub const DOCUMENT_ID_FIELD: &str = "document_id";
pub const CHUNK_INDEX_FIELD: &str = "chunk_index";

/// Fields of a collection that stores chunks.
pub const CHUNKED_FIELDS: [&str; 12] = [
    DOCUMENT_ID_FIELD,
    CHUNK_INDEX_FIELD,
    "total_chunks",
    "title",
    "content",
    "url",
    "source_name",
    "category",
    "published_at",
    "fetched_at",
    "excerpt",
    "scope",
];

/// Fields of a collection that stores whole documents.
pub const FLAT_FIELDS: [&str; 8] = [
    "title",
    "content",
    "url",
    "source_name",
    "category",
    "published_at",
    "excerpt",
    "scope",
];

/// How a collection stores its documents, resolved once per search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionLayout {
    /// One row per chunk, carrying `document_id` and `chunk_index`.
    Chunked,
    /// One row per whole document.
    Flat,
}

impl CollectionLayout {
    pub fn from_fields(fields: &BTreeSet<String>) -> Self {
        if fields.contains(DOCUMENT_ID_FIELD) && fields.contains(CHUNK_INDEX_FIELD) {
            CollectionLayout::Chunked
        } else {
            CollectionLayout::Flat
        }
    }

    pub fn fields(self) -> &'static [&'static str] {
        match self {
            CollectionLayout::Chunked => &CHUNKED_FIELDS,
            CollectionLayout::Flat => &FLAT_FIELDS,
        }
    }
}

/// Inspect a collection's declared fields and pick its layout.
pub async fn probe_layout<S: ChunkStore + ?Sized>(
    store: &S,
    collection: &str,
) -> Result<CollectionLayout> {
    let fields = store.describe_schema(collection).await?;
    Ok(CollectionLayout::from_fields(&fields))
}

/// Abstract chunk store.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`index`](ChunkStore::index) | Insert or overwrite one chunk |
/// | [`search`](ChunkStore::search) | Ranked free-text search over chunks |
/// | [`fetch_by_document_id`](ChunkStore::fetch_by_document_id) | All chunks of one document |
/// | [`describe_schema`](ChunkStore::describe_schema) | Declared field names |
/// | [`delete_by_document_id`](ChunkStore::delete_by_document_id) | Drop a document's chunks |
/// | [`existing_urls`](ChunkStore::existing_urls) | URLs already stored for a scope |
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Insert a chunk, overwriting any chunk with the same
    /// `document_id` + `chunk_index`.
    async fn index(&self, collection: &str, chunk: &Chunk) -> Result<()>;

    /// Ranked search, best hit first, at most `limit` hits.
    async fn search(&self, collection: &str, query: &str, limit: usize) -> Result<Vec<SearchHit>>;

    /// Every stored chunk of one document, in no particular order.
    async fn fetch_by_document_id(&self, collection: &str, document_id: &str)
        -> Result<Vec<Chunk>>;

    /// Names of the fields the collection declares.
    async fn describe_schema(&self, collection: &str) -> Result<BTreeSet<String>>;

    /// Remove every chunk of one document, returning how many were removed.
    async fn delete_by_document_id(&self, collection: &str, document_id: &str) -> Result<usize>;

    /// URLs of documents already stored under `scope`.
    async fn existing_urls(&self, collection: &str, scope: &str) -> Result<HashSet<String>>;
}
