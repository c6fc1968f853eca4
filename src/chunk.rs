//! Token-bounded document chunker.
//!
//! Splits a [`Document`] into [`Chunk`]s whose content (metadata header,
//! part marker, and body slice) stays within a `max_tokens` budget as
//! measured by an injected [`TokenCounter`].
//!
//! # Algorithm
//!
//! 1. Derive the document ID from the URL (truncated SHA-256, 16 hex chars).
//! 2. Build the metadata header and compute the body budget:
//!    `available = max_tokens - prefix_tokens - safety_margin`, where the
//!    prefix is everything put in front of the body (`header + "\n"`).
//! 3. If the whole body fits, emit one chunk (`header + "\n" + body`).
//! 4. Otherwise reserve the multi-part prefix (`header + "\n[Part N/N]\n\n"`)
//!    instead, split on blank-line paragraph boundaries, and greedily pack
//!    paragraphs while `used + paragraph + separator <= available`.
//! 5. A paragraph that alone exceeds the budget is split into sentences
//!    (`. ! ? 。！？`) and packed the same way.
//! 6. A sentence that alone exceeds the budget is hard-sliced by character
//!    windows, which guarantees termination for any input.
//! 7. Each part `i` of `N` becomes `header + "\n[Part i/N]\n\n" + part`.
//!
//! Empty bodies produce a single chunk with an empty body.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use context_recall::chunk::Chunker;
//! use context_recall::models::Document;
//! use context_recall::tokens::CharCounter;
//!
//! let chunker = Chunker::new(Arc::new(CharCounter));
//! let doc = Document {
//!     title: "Hello".into(),
//!     body: "Hello world.\n\nSecond paragraph.".into(),
//!     url: "https://example.com/hello".into(),
//!     source_name: "example".into(),
//!     category: "news".into(),
//!     published_at: None,
//!     fetched_at: None,
//!     excerpt: None,
//!     scope: "demo".into(),
//! };
//! let chunks = chunker.chunk(&doc, 6000).unwrap();
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].total_chunks, 1);
//! ```

use std::sync::Arc;

use rayon::prelude::*;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::config::ChunkingConfig;
use crate::error::{Error, Result};
use crate::models::{Chunk, Document};
use crate::tokens::{counter_from_config, TokenCounter};

/// Default reserve for estimation error and part-marker overhead.
pub const DEFAULT_SAFETY_MARGIN: usize = 50;

const PARAGRAPH_SEPARATOR: &str = "\n\n";

/// Bound on re-splitting while the part count settles.
const MAX_PART_COUNT_ROUNDS: usize = 8;

const SENTENCE_TERMINATORS: [char; 6] = ['.', '!', '?', '。', '！', '？'];

/// Stable document ID: the first 8 bytes of SHA-256(url) as hex.
pub fn document_id_for_url(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    hex::encode(&digest[..8])
}

/// Metadata header repeated at the top of every chunk.
pub fn metadata_header(doc: &Document) -> String {
    let mut header = format!(
        "# {}\n\n**Source**: {} | **Category**: {}\n",
        doc.title, doc.source_name, doc.category
    );
    if let Some(published) = doc.published_at {
        header.push_str(&format!("**Published**: {}\n", published.to_rfc3339()));
    }
    header.push_str(&format!("**URL**: {}\n", doc.url));
    header
}

/// In-band position marker, 1-based.
pub fn part_marker(part: usize, total: usize) -> String {
    format!("[Part {}/{}]", part, total)
}

/// Text in front of the body of a single-chunk document.
fn single_prefix(header: &str) -> String {
    format!("{}\n", header)
}

/// Text in front of the body of part `part` of `total`.
fn part_prefix(header: &str, part: usize, total: usize) -> String {
    format!("{}\n{}\n\n", header, part_marker(part, total))
}

/// Summary of a chunking batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ChunkingStats {
    pub documents: usize,
    pub chunks: usize,
    pub multi_part_documents: usize,
}

impl ChunkingStats {
    pub fn from_batches(batches: &[Vec<Chunk>]) -> Self {
        Self {
            documents: batches.len(),
            chunks: batches.iter().map(Vec::len).sum(),
            multi_part_documents: batches.iter().filter(|b| b.len() > 1).count(),
        }
    }

    /// Average chunks per document; `0.0` for an empty batch.
    pub fn average_chunks_per_document(&self) -> f64 {
        if self.documents == 0 {
            return 0.0;
        }
        self.chunks as f64 / self.documents as f64
    }
}

/// Splits documents into token-bounded chunks.
#[derive(Clone)]
pub struct Chunker {
    counter: Arc<dyn TokenCounter>,
    safety_margin: usize,
}

impl Chunker {
    pub fn new(counter: Arc<dyn TokenCounter>) -> Self {
        Self {
            counter,
            safety_margin: DEFAULT_SAFETY_MARGIN,
        }
    }

    pub fn with_safety_margin(mut self, safety_margin: usize) -> Self {
        self.safety_margin = safety_margin;
        self
    }

    pub fn from_config(config: &ChunkingConfig) -> Self {
        Self::new(counter_from_config(config)).with_safety_margin(config.safety_margin)
    }

    pub fn counter(&self) -> &dyn TokenCounter {
        self.counter.as_ref()
    }

    /// Split one document into chunks of at most `max_tokens`.
    ///
    /// # Errors
    ///
    /// - [`Error::Validation`] if the document has no URL.
    /// - [`Error::Configuration`] if `max_tokens` cannot hold the header,
    ///   the part marker (when the body needs splitting) and the safety margin.
    pub fn chunk(&self, doc: &Document, max_tokens: usize) -> Result<Vec<Chunk>> {
        if doc.url.trim().is_empty() {
            return Err(Error::Validation(format!(
                "document '{}' has no url",
                doc.title
            )));
        }

        let document_id = document_id_for_url(&doc.url);
        let header = metadata_header(doc);
        let prefix_tokens = self.counter.count(&single_prefix(&header));
        let available = self.available_tokens(prefix_tokens, max_tokens)?;
        let body_tokens = self.counter.count(&doc.body);

        debug!(
            document_id = %document_id,
            prefix_tokens,
            body_tokens,
            available,
            "chunking document"
        );

        if body_tokens <= available {
            let content = format!("{}{}", single_prefix(&header), doc.body);
            return Ok(vec![make_chunk(doc, &document_id, 0, 1, content)]);
        }

        let (parts, available) = self.split_into_parts(&header, &doc.body, max_tokens)?;
        if parts.is_empty() {
            // Body was nothing but whitespace.
            return Ok(vec![make_chunk(doc, &document_id, 0, 1, single_prefix(&header))]);
        }

        let total = parts.len();
        info!(
            document_id = %document_id,
            body_tokens,
            available,
            parts = total,
            "split document into parts"
        );

        Ok(parts
            .into_iter()
            .enumerate()
            .map(|(index, body)| {
                let content = format!("{}{}", part_prefix(&header, index + 1, total), body);
                make_chunk(doc, &document_id, index, total, content)
            })
            .collect())
    }

    /// Chunk a batch of documents, preserving input order.
    ///
    /// An empty batch yields an empty list.
    pub fn chunk_many(&self, documents: &[Document], max_tokens: usize) -> Result<Vec<Chunk>> {
        self.chunk_many_with_stats(documents, max_tokens)
            .map(|(chunks, _)| chunks)
    }

    /// Like [`chunk_many`](Self::chunk_many), also returning batch statistics.
    pub fn chunk_many_with_stats(
        &self,
        documents: &[Document],
        max_tokens: usize,
    ) -> Result<(Vec<Chunk>, ChunkingStats)> {
        let batches: Vec<Vec<Chunk>> = documents
            .par_iter()
            .map(|doc| self.chunk(doc, max_tokens))
            .collect::<Result<_>>()?;

        let stats = ChunkingStats::from_batches(&batches);
        info!(
            documents = stats.documents,
            chunks = stats.chunks,
            multi_part = stats.multi_part_documents,
            "chunking complete (avg {:.1} chunks/document)",
            stats.average_chunks_per_document()
        );

        Ok((batches.into_iter().flatten().collect(), stats))
    }

    fn available_tokens(&self, prefix_tokens: usize, max_tokens: usize) -> Result<usize> {
        max_tokens
            .checked_sub(prefix_tokens)
            .and_then(|rest| rest.checked_sub(self.safety_margin))
            .filter(|available| *available > 0)
            .ok_or_else(|| {
                Error::Configuration(format!(
                    "max_tokens {} cannot fit a {}-token header and part marker plus a {}-token safety margin",
                    max_tokens, prefix_tokens, self.safety_margin
                ))
            })
    }

    /// Split `body` with the part-marker prefix reserved in the budget.
    ///
    /// The marker width depends on the part count, so the budget is shrunk
    /// until the widest marker (`[Part N/N]`) fits what was reserved.
    fn split_into_parts(
        &self,
        header: &str,
        body: &str,
        max_tokens: usize,
    ) -> Result<(Vec<String>, usize)> {
        let mut reserved = self.counter.count(&part_prefix(header, 1, 1));
        for _ in 0..MAX_PART_COUNT_ROUNDS {
            let available = self.available_tokens(reserved, max_tokens)?;
            let parts = self.split_body(body, available);
            let total = parts.len().max(1);
            let needed = self.counter.count(&part_prefix(header, total, total));
            if needed <= reserved {
                return Ok((parts, available));
            }
            reserved = needed;
        }
        Err(Error::Configuration(format!(
            "max_tokens {} leaves no stable room for part markers",
            max_tokens
        )))
    }

    fn split_body(&self, body: &str, available: usize) -> Vec<String> {
        let mut parts = Vec::new();
        let mut buf = PartBuffer::new(PARAGRAPH_SEPARATOR, self.counter.count(PARAGRAPH_SEPARATOR));

        for para in split_paragraphs(body) {
            let para = para.as_str();
            let tokens = self.counter.count(para);
            if buf.fits(tokens, available) {
                buf.push(para, tokens);
                continue;
            }

            buf.flush_into(&mut parts);

            if tokens > available {
                warn!(tokens, available, "paragraph exceeds budget, splitting by sentence");
                self.split_paragraph(para, available, &mut parts);
            } else {
                buf.push(para, tokens);
            }
        }

        buf.flush_into(&mut parts);
        parts
    }

    fn split_paragraph(&self, para: &str, available: usize, parts: &mut Vec<String>) {
        let mut buf = PartBuffer::new("", 0);

        for sentence in split_sentences(para) {
            let tokens = self.counter.count(sentence);
            if buf.fits(tokens, available) {
                buf.push(sentence, tokens);
                continue;
            }

            buf.flush_into(parts);

            if tokens > available {
                warn!(tokens, available, "sentence exceeds budget, slicing by characters");
                self.hard_slice(sentence, available, parts);
            } else {
                buf.push(sentence, tokens);
            }
        }

        buf.flush_into(parts);
    }

    /// Cut `text` into windows of at most `available` characters, shrinking a
    /// window while the counter still reports it over budget.
    fn hard_slice(&self, text: &str, available: usize, parts: &mut Vec<String>) {
        let mut rest = text;
        while !rest.is_empty() {
            let mut width = available;
            let piece = loop {
                let candidate = &rest[..char_boundary_after(rest, width)];
                let tokens = self.counter.count(candidate);
                if tokens <= available || width <= 1 {
                    break candidate;
                }
                width = (width * available / tokens).clamp(1, width - 1);
            };

            let trimmed = piece.trim();
            if !trimmed.is_empty() {
                parts.push(trimmed.to_string());
            }
            rest = &rest[piece.len()..];
        }
    }
}

/// Running buffer of pieces joined by a separator.
struct PartBuffer<'a> {
    separator: &'a str,
    overhead: usize,
    text: String,
    tokens: usize,
}

impl<'a> PartBuffer<'a> {
    fn new(separator: &'a str, overhead: usize) -> Self {
        Self {
            separator,
            overhead,
            text: String::new(),
            tokens: 0,
        }
    }

    fn fits(&self, tokens: usize, budget: usize) -> bool {
        self.tokens + tokens + self.overhead <= budget
    }

    fn push(&mut self, piece: &str, tokens: usize) {
        if !self.text.is_empty() {
            self.text.push_str(self.separator);
        }
        self.text.push_str(piece);
        self.tokens += tokens + self.overhead;
    }

    fn flush_into(&mut self, parts: &mut Vec<String>) {
        let text = std::mem::take(&mut self.text);
        self.tokens = 0;
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            parts.push(trimmed.to_string());
        }
    }
}

/// Paragraphs separated by blank lines, trimmed.
///
/// A line counts as blank when it holds only whitespace; `\r\n` endings
/// are accepted.
fn split_paragraphs(body: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in body.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                paragraphs.push(current.join("\n").trim().to_string());
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        paragraphs.push(current.join("\n").trim().to_string());
    }
    paragraphs
}

/// Split on terminal punctuation, keeping the terminator with its sentence.
fn split_sentences(paragraph: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    for (i, c) in paragraph.char_indices() {
        if SENTENCE_TERMINATORS.contains(&c) {
            let end = i + c.len_utf8();
            sentences.push(&paragraph[start..end]);
            start = end;
        }
    }
    if start < paragraph.len() {
        sentences.push(&paragraph[start..]);
    }
    sentences
}

/// Byte offset just past the first `chars` characters of `s`.
fn char_boundary_after(s: &str, chars: usize) -> usize {
    s.char_indices()
        .nth(chars)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

fn make_chunk(doc: &Document, document_id: &str, index: usize, total: usize, content: String) -> Chunk {
    Chunk {
        document_id: document_id.to_string(),
        chunk_index: index,
        total_chunks: total,
        title: doc.title.clone(),
        content,
        url: doc.url.clone(),
        source_name: doc.source_name.clone(),
        category: doc.category.clone(),
        published_at: doc.published_at,
        fetched_at: doc.fetched_at,
        excerpt: doc.excerpt.clone(),
        scope: doc.scope.clone(),
    }
}
