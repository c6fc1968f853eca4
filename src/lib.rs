//! # Context Recall
//!
//! Token-bounded document chunking and retrieval-time reassembly.
//!
//! Long documents are split into chunks small enough for a vector store,
//! each carrying a copy of the document's metadata and a part marker. At
//! query time only one fragment may match, so the merger fetches every chunk
//! of each matching document and stitches the full text back together.
//!
//! ## Architecture
//!
//! ```text
//! Document ──▶ Chunker ──▶ [Chunk…] ──▶ ChunkStore::index
//!                                            │
//! query ──▶ RetrievalMerger ──▶ search ──────┤
//!                 │                          │
//!                 └── group ──▶ fetch_by_document_id ──▶ reassemble ──▶ [MergedDocument…]
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Core data types |
//! | [`tokens`] | Token counting |
//! | [`chunk`] | Document chunking |
//! | [`store`] | Chunk store trait, retry wrapper, in-memory backend |
//! | [`merge`] | Search-time grouping and reassembly |
//! | [`ingest`] | Chunk-and-index pipeline |

pub mod chunk;
pub mod config;
pub mod error;
pub mod ingest;
pub mod merge;
pub mod models;
pub mod store;
pub mod tokens;
