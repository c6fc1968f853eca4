//! Core data models used throughout the chunking and retrieval pipeline.
//!
//! A [`Document`] is split into [`Chunk`]s, chunks are indexed in a
//! [`ChunkStore`](crate::store::ChunkStore), searches return [`SearchHit`]s,
//! and the merger turns those back into [`MergedDocument`]s.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Namespace for deterministic chunk object IDs.
const CHUNK_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2b9e_4d3a_4e0f_9a51_7c8d_2e64_b013);

/// A complete source text with metadata, prior to chunking.
///
/// The document ID is not part of the input; it is derived from `url`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub title: String,
    #[serde(default)]
    pub body: String,
    pub url: String,
    #[serde(default)]
    pub source_name: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub fetched_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub excerpt: Option<String>,
    /// Task/collection scoping label.
    #[serde(default)]
    pub scope: String,
}

/// A token-bounded fragment of a [`Document`] plus a copy of its metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub document_id: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub title: String,
    /// Metadata header, optional part marker, then the body slice.
    pub content: String,
    pub url: String,
    pub source_name: String,
    pub category: String,
    pub published_at: Option<DateTime<Utc>>,
    pub fetched_at: Option<DateTime<Utc>>,
    pub excerpt: Option<String>,
    pub scope: String,
}

impl Chunk {
    /// Deterministic storage key for this chunk.
    ///
    /// Re-chunking the same URL yields the same keys, so indexing again
    /// overwrites instead of duplicating.
    pub fn object_id(&self) -> Uuid {
        let name = format!("{}:{}", self.document_id, self.chunk_index);
        Uuid::new_v5(&CHUNK_NAMESPACE, name.as_bytes())
    }
}

/// A chunk returned by a ranked store search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub chunk: Chunk,
    /// Opaque relevance, higher is better.
    pub relevance_score: f64,
}

/// A full document reconstructed from all of its chunks at query time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergedDocument {
    pub document_id: String,
    pub title: String,
    pub content: String,
    pub url: String,
    pub source_name: String,
    pub category: String,
    pub published_at: Option<DateTime<Utc>>,
    pub excerpt: Option<String>,
    pub scope: String,
    /// Best relevance among the chunks that matched the query.
    pub score: f64,
    pub chunk_count: usize,
}

impl MergedDocument {
    /// Build a merged document from the first chunk's metadata.
    pub fn from_first_chunk(first: &Chunk, content: String, score: f64, chunk_count: usize) -> Self {
        Self {
            document_id: first.document_id.clone(),
            title: first.title.clone(),
            content,
            url: first.url.clone(),
            source_name: first.source_name.clone(),
            category: first.category.clone(),
            published_at: first.published_at,
            excerpt: first.excerpt.clone(),
            scope: first.scope.clone(),
            score,
            chunk_count,
        }
    }
}
