//! Ingestion: chunk documents and index them into a [`ChunkStore`].
//!
//! Per document: skip it if its URL is already stored for the same scope
//! (optional), chunk it, clear any chunks left from a previous ingestion of
//! the same URL, then index each chunk. Bad documents and failed chunk
//! writes are counted in the [`IndexReport`] and logged; they do not abort
//! the batch. Documents left with only some of their chunks are listed in
//! [`IndexReport::incomplete`].

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::chunk::Chunker;
use crate::error::{Error, Result};
use crate::models::Document;
use crate::store::ChunkStore;

#[derive(Debug, Clone, Copy)]
pub struct IngestOptions {
    pub max_tokens: usize,
    /// Skip documents whose URL is already stored under the same scope.
    pub skip_existing: bool,
}

/// Counts from one ingestion batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    pub documents: usize,
    pub skipped_existing: usize,
    pub rejected: usize,
    pub chunks: usize,
    pub indexed: usize,
    pub failed: usize,
    /// Documents whose previous chunks were cleared but whose new chunks
    /// were not all written. Re-ingest these.
    pub incomplete: Vec<String>,
}

/// Chunk and index a batch of documents.
///
/// # Errors
///
/// Returns [`Error::Configuration`] when `max_tokens` is too small for a
/// document's metadata header; such a budget is wrong for the whole batch.
/// Invalid documents and store write failures are reported, not returned.
pub async fn index_documents<S: ChunkStore + ?Sized>(
    store: &S,
    collection: &str,
    chunker: &Chunker,
    documents: &[Document],
    options: &IngestOptions,
) -> Result<IndexReport> {
    let mut report = IndexReport {
        documents: documents.len(),
        ..IndexReport::default()
    };

    let existing = if options.skip_existing {
        existing_urls_by_scope(store, collection, documents).await
    } else {
        HashMap::new()
    };

    for doc in documents {
        if existing
            .get(doc.scope.as_str())
            .is_some_and(|urls| urls.contains(&doc.url))
        {
            debug!(url = %doc.url, scope = %doc.scope, "already stored, skipping");
            report.skipped_existing += 1;
            continue;
        }

        let chunks = match chunker.chunk(doc, options.max_tokens) {
            Ok(chunks) => chunks,
            Err(e @ Error::Configuration(_)) => return Err(e),
            Err(e) => {
                warn!(url = %doc.url, "document rejected: {}", e);
                report.rejected += 1;
                continue;
            }
        };

        let Some(document_id) = chunks.first().map(|c| c.document_id.clone()) else {
            continue;
        };

        match store.delete_by_document_id(collection, &document_id).await {
            Ok(0) => {}
            Ok(removed) => debug!(document_id = %document_id, removed, "cleared previous chunks"),
            Err(e) => warn!(
                document_id = %document_id,
                "could not clear previous chunks, stale parts may remain: {}",
                e
            ),
        }

        report.chunks += chunks.len();
        let mut written = 0;
        for chunk in &chunks {
            match store.index(collection, chunk).await {
                Ok(()) => written += 1,
                Err(e) => {
                    warn!(
                        document_id = %chunk.document_id,
                        chunk_index = chunk.chunk_index,
                        "failed to index chunk: {}",
                        e
                    );
                    report.failed += 1;
                }
            }
        }
        report.indexed += written;
        if written < chunks.len() {
            warn!(
                document_id = %document_id,
                written,
                total = chunks.len(),
                "document left partially indexed"
            );
            report.incomplete.push(document_id);
        }
    }

    info!(
        collection,
        documents = report.documents,
        skipped = report.skipped_existing,
        rejected = report.rejected,
        indexed = report.indexed,
        failed = report.failed,
        incomplete = report.incomplete.len(),
        "ingestion complete"
    );

    Ok(report)
}

/// Stored URLs for each scope present in the batch.
///
/// A scope whose lookup fails is left out, so its documents are re-indexed.
async fn existing_urls_by_scope<S: ChunkStore + ?Sized>(
    store: &S,
    collection: &str,
    documents: &[Document],
) -> HashMap<String, HashSet<String>> {
    let scopes: HashSet<&str> = documents.iter().map(|d| d.scope.as_str()).collect();
    let mut existing = HashMap::new();
    for scope in scopes {
        match store.existing_urls(collection, scope).await {
            Ok(urls) => {
                existing.insert(scope.to_string(), urls);
            }
            Err(e) => warn!(scope, "could not list stored urls, not deduplicating: {}", e),
        }
    }
    existing
}
