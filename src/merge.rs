//! Retrieval-time reassembly of chunked documents.
//!
//! A query usually matches only one or two chunks of a long document. The
//! [`RetrievalMerger`] turns those partial hits back into complete documents:
//!
//! 1. Probe the collection layout. Flat collections (no `document_id` /
//!    `chunk_index` fields) are searched directly and each hit becomes one
//!    [`MergedDocument`].
//! 2. Search for `limit × fan_out_factor` chunks.
//! 3. Group hits by document, keeping each document's best score.
//! 4. Keep the `limit` best documents (ties in first-seen order).
//! 5. Fetch every chunk of each kept document, at most `fetch_concurrency`
//!    at a time, each under `fetch_timeout`. A failed, empty, or timed-out
//!    fetch drops that document and is recorded as [`PartialRecall`].
//! 6. Sort chunks by index, collapse duplicates, and reassemble: the first
//!    chunk verbatim (it carries the header), then the body after each later
//!    chunk's part marker, joined by blank lines.
//! 7. Return documents by score, best first.
//!
//! Only the initial search can fail the call. Cancellation during step 5
//! returns the documents assembled so far with `cancelled = true`.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::chunk::document_id_for_url;
use crate::error::{Error, Result};
use crate::models::{Chunk, MergedDocument, SearchHit};
use crate::store::{probe_layout, ChunkStore, CollectionLayout};

/// Retrieval tuning parameters, decoupled from application config.
#[derive(Debug, Clone)]
pub struct SearchParams {
    /// Chunks requested per wanted document.
    pub fan_out_factor: usize,
    /// Concurrent `fetch_by_document_id` calls.
    pub fetch_concurrency: usize,
    /// Deadline for each per-document fetch.
    pub fetch_timeout: Duration,
    /// Deadline for the whole search, if any.
    pub search_timeout: Option<Duration>,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            fan_out_factor: 5,
            fetch_concurrency: 4,
            fetch_timeout: Duration::from_secs(5),
            search_timeout: None,
        }
    }
}

/// Why a selected document was not (fully) recovered.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecallIssue {
    /// The fetch returned an error; the document was skipped.
    FetchFailed { error: String },
    /// The fetch exceeded its deadline; the document was skipped.
    TimedOut,
    /// The store returned no chunks for an ID it had just matched.
    NoChunks,
    /// Indices were not `0..total_chunks`; the document was still returned.
    NonContiguous {
        total_chunks: usize,
        indices: Vec<usize>,
    },
}

impl RecallIssue {
    /// Whether the document was left out of the results.
    pub fn is_skipped(&self) -> bool {
        !matches!(self, RecallIssue::NonContiguous { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartialRecall {
    pub document_id: String,
    pub issue: RecallIssue,
}

/// Everything a search produced, including non-fatal problems.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchOutcome {
    #[serde(skip)]
    pub layout: Option<CollectionLayout>,
    pub documents: Vec<MergedDocument>,
    pub partial_recall: Vec<PartialRecall>,
    /// Cancellation fired while documents were being fetched.
    pub cancelled: bool,
    /// Scored chunks returned by the fan-out search.
    pub hits: usize,
}

/// Groups search hits back into whole documents.
pub struct RetrievalMerger<'a, S: ChunkStore + ?Sized> {
    store: &'a S,
    params: SearchParams,
}

impl<'a, S: ChunkStore + ?Sized> RetrievalMerger<'a, S> {
    pub fn new(store: &'a S, params: SearchParams) -> Self {
        Self { store, params }
    }

    pub fn params(&self) -> &SearchParams {
        &self.params
    }

    /// Up to `limit` reassembled documents matching `query`, best first.
    ///
    /// # Errors
    ///
    /// Fails only when the schema probe or the initial fan-out search cannot
    /// be performed, when `limit` is zero, or when `search_timeout` elapses
    /// before the initial search returns.
    pub async fn search(
        &self,
        collection: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<MergedDocument>> {
        self.search_detailed(collection, query, limit)
            .await
            .map(|outcome| outcome.documents)
    }

    /// Like [`search`](Self::search), also reporting partial recall.
    pub async fn search_detailed(
        &self,
        collection: &str,
        query: &str,
        limit: usize,
    ) -> Result<SearchOutcome> {
        let deadline = self.params.search_timeout;
        let cancel = async move {
            match deadline {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending::<()>().await,
            }
        };
        self.search_until(collection, query, limit, cancel).await
    }

    /// Search, stopping early when `cancel` resolves.
    ///
    /// If `cancel` resolves before the initial search returns the call fails
    /// with [`Error::Cancelled`]. If it resolves while documents are being
    /// fetched, the documents already reassembled are returned and
    /// `cancelled` is set.
    pub async fn search_until<C>(
        &self,
        collection: &str,
        query: &str,
        limit: usize,
        cancel: C,
    ) -> Result<SearchOutcome>
    where
        C: Future<Output = ()>,
    {
        if limit == 0 {
            return Err(Error::InvalidQuery("limit must be >= 1".into()));
        }
        if query.trim().is_empty() {
            return Ok(SearchOutcome::default());
        }

        tokio::pin!(cancel);

        let layout = tokio::select! {
            layout = probe_layout(self.store, collection) => layout?,
            _ = cancel.as_mut() => return Err(Error::Cancelled),
        };

        match layout {
            CollectionLayout::Flat => {
                debug!(collection, "collection stores whole documents");
                let (documents, hits) = tokio::select! {
                    found = self.search_flat(collection, query, limit) => found?,
                    _ = cancel.as_mut() => return Err(Error::Cancelled),
                };
                Ok(SearchOutcome {
                    layout: Some(layout),
                    documents,
                    hits,
                    ..SearchOutcome::default()
                })
            }
            CollectionLayout::Chunked => {
                self.search_chunked(collection, query, limit, cancel.as_mut())
                    .await
            }
        }
    }

    async fn search_flat(
        &self,
        collection: &str,
        query: &str,
        limit: usize,
    ) -> Result<(Vec<MergedDocument>, usize)> {
        let hits = self.store.search(collection, query, limit).await?;
        let hit_count = hits.len();
        let mut documents: Vec<MergedDocument> = hits
            .into_iter()
            .map(|hit| {
                let mut row = hit.chunk;
                let content = std::mem::take(&mut row.content);
                let mut doc = MergedDocument::from_first_chunk(&row, content, hit.relevance_score, 1);
                if doc.document_id.is_empty() {
                    doc.document_id = document_id_for_url(&doc.url);
                }
                doc
            })
            .collect();
        sort_by_score(&mut documents);
        documents.truncate(limit);
        Ok((documents, hit_count))
    }

    async fn search_chunked<C>(
        &self,
        collection: &str,
        query: &str,
        limit: usize,
        mut cancel: Pin<&mut C>,
    ) -> Result<SearchOutcome>
    where
        C: Future<Output = ()>,
    {
        let fan_out = limit.saturating_mul(self.params.fan_out_factor.max(1));
        let hits = tokio::select! {
            hits = self.store.search(collection, query, fan_out) => hits?,
            _ = cancel.as_mut() => return Err(Error::Cancelled),
        };

        let selected = select_documents(group_hits(&hits), limit);
        debug!(
            collection,
            hits = hits.len(),
            documents = selected.len(),
            fan_out,
            "grouped chunk hits"
        );

        let mut outcome = SearchOutcome {
            layout: Some(CollectionLayout::Chunked),
            hits: hits.len(),
            ..SearchOutcome::default()
        };

        let store = self.store;
        let fetch_timeout = self.params.fetch_timeout;
        let mut fetches = stream::iter(selected.into_iter().enumerate())
            .map(|(rank, group)| async move {
                let fetched = tokio::time::timeout(
                    fetch_timeout,
                    store.fetch_by_document_id(collection, &group.document_id),
                )
                .await;
                (rank, group, fetched)
            })
            .buffer_unordered(self.params.fetch_concurrency.max(1));

        let mut assembled: Vec<(usize, MergedDocument)> = Vec::new();

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.as_mut() => {
                    warn!(
                        collection,
                        assembled = assembled.len(),
                        "search cancelled while fetching documents, returning partial results"
                    );
                    outcome.cancelled = true;
                    break;
                }
                next = fetches.next() => next,
            };
            let Some((rank, group, fetched)) = next else {
                break;
            };

            let chunks = match fetched {
                Err(_) => {
                    warn!(
                        document_id = %group.document_id,
                        "fetch timed out after {:?}, skipping document",
                        fetch_timeout
                    );
                    outcome.record(&group.document_id, RecallIssue::TimedOut);
                    continue;
                }
                Ok(Err(e)) => {
                    warn!(document_id = %group.document_id, "fetch failed, skipping document: {}", e);
                    outcome.record(
                        &group.document_id,
                        RecallIssue::FetchFailed {
                            error: e.to_string(),
                        },
                    );
                    continue;
                }
                Ok(Ok(chunks)) if chunks.is_empty() => {
                    warn!(document_id = %group.document_id, "no chunks stored for matched document, skipping");
                    outcome.record(&group.document_id, RecallIssue::NoChunks);
                    continue;
                }
                Ok(Ok(chunks)) => chunks,
            };

            let (ordered, gap) = order_chunks(chunks);
            if let Some(issue) = gap {
                warn!(
                    document_id = %group.document_id,
                    "chunk indices are not contiguous, reassembling best-effort: {:?}",
                    issue
                );
                outcome.record(&group.document_id, issue);
            }

            if let Some(first) = ordered.first() {
                let content = reassemble(&ordered);
                let doc =
                    MergedDocument::from_first_chunk(first, content, group.best_score, ordered.len());
                assembled.push((rank, doc));
            }
        }

        assembled.sort_by(|(rank_a, a), (rank_b, b)| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(rank_a.cmp(rank_b))
        });
        outcome.documents = assembled.into_iter().map(|(_, doc)| doc).collect();

        if outcome.partial_recall.iter().any(|p| p.issue.is_skipped()) {
            warn!(
                collection,
                skipped = outcome
                    .partial_recall
                    .iter()
                    .filter(|p| p.issue.is_skipped())
                    .count(),
                returned = outcome.documents.len(),
                "partial recall: some matched documents could not be reassembled"
            );
        }
        info!(
            collection,
            hits = outcome.hits,
            documents = outcome.documents.len(),
            "merged chunk hits into documents"
        );

        Ok(outcome)
    }
}

impl SearchOutcome {
    fn record(&mut self, document_id: &str, issue: RecallIssue) {
        self.partial_recall.push(PartialRecall {
            document_id: document_id.to_string(),
            issue,
        });
    }
}

/// Per-document aggregate of search hits.
#[derive(Debug, Clone, PartialEq)]
struct DocumentGroup {
    document_id: String,
    best_score: f64,
    hits: usize,
}

/// Group hits by document in first-seen order, keeping the max score.
fn group_hits(hits: &[SearchHit]) -> Vec<DocumentGroup> {
    let mut groups: Vec<DocumentGroup> = Vec::new();
    let mut positions: HashMap<&str, usize> = HashMap::new();

    for hit in hits {
        let id = hit.chunk.document_id.as_str();
        if id.is_empty() {
            debug!(url = %hit.chunk.url, "hit without document_id ignored");
            continue;
        }
        match positions.get(id) {
            Some(&pos) => {
                let group = &mut groups[pos];
                group.hits += 1;
                if hit.relevance_score > group.best_score {
                    group.best_score = hit.relevance_score;
                }
            }
            None => {
                positions.insert(id, groups.len());
                groups.push(DocumentGroup {
                    document_id: id.to_string(),
                    best_score: hit.relevance_score,
                    hits: 1,
                });
            }
        }
    }

    groups
}

/// Best `limit` groups by score; the stable sort keeps first-seen order on ties.
fn select_documents(mut groups: Vec<DocumentGroup>, limit: usize) -> Vec<DocumentGroup> {
    groups.sort_by(|a, b| {
        b.best_score
            .partial_cmp(&a.best_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    groups.truncate(limit);
    groups
}

fn sort_by_score(documents: &mut [MergedDocument]) {
    documents.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

/// Sort by index and drop duplicate indices; report gaps.
fn order_chunks(mut chunks: Vec<Chunk>) -> (Vec<Chunk>, Option<RecallIssue>) {
    chunks.sort_by_key(|c| c.chunk_index);
    chunks.dedup_by_key(|c| c.chunk_index);

    let total_chunks = chunks.first().map(|c| c.total_chunks).unwrap_or(0);
    let contiguous = chunks.len() == total_chunks
        && chunks.iter().enumerate().all(|(i, c)| c.chunk_index == i);

    let issue = (!contiguous).then(|| RecallIssue::NonContiguous {
        total_chunks,
        indices: chunks.iter().map(|c| c.chunk_index).collect(),
    });
    (chunks, issue)
}

/// Byte range of the first `[Part i/N]` line in `content`.
pub fn find_part_marker(content: &str) -> Option<(usize, usize)> {
    let mut line_start = 0;
    for line in content.split_inclusive('\n') {
        let text = line.trim_end();
        if is_part_marker(text) {
            return Some((line_start, line_start + text.len()));
        }
        line_start += line.len();
    }
    None
}

fn is_part_marker(line: &str) -> bool {
    line.strip_prefix("[Part ")
        .and_then(|rest| rest.strip_suffix(']'))
        .and_then(|rest| rest.split_once('/'))
        .map(|(part, total)| is_digits(part) && is_digits(total))
        .unwrap_or(false)
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Body text following a chunk's part marker, if it has one.
pub fn body_after_marker(content: &str) -> Option<&str> {
    find_part_marker(content).map(|(_, end)| content[end..].trim())
}

/// Join index-ordered chunks into one text with the header exactly once.
pub fn reassemble(chunks: &[Chunk]) -> String {
    let mut iter = chunks.iter();
    let Some(first) = iter.next() else {
        return String::new();
    };

    let mut parts: Vec<&str> = vec![first.content.as_str()];
    for chunk in iter {
        match body_after_marker(&chunk.content) {
            Some(body) => parts.push(body),
            None => {
                warn!(
                    document_id = %chunk.document_id,
                    chunk_index = chunk.chunk_index,
                    "chunk has no part marker, keeping its full content"
                );
                parts.push(chunk.content.trim());
            }
        }
    }
    parts.join("\n\n")
}
