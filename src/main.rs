//! # Context Recall CLI (`recall`)
//!
//! Thin front end over the library for trying chunking and merged search on
//! a JSON file of documents (an array of objects with `title`, `body`,
//! `url`, and optional metadata).
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `recall chunk <docs.json>` | Print the chunks each document splits into |
//! | `recall search <docs.json> "<query>"` | Index in memory and print merged results |
//!
//! Output is JSON on stdout; logs go to stderr (`RUST_LOG=info` for more).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use context_recall::chunk::Chunker;
use context_recall::config::{self, Config};
use context_recall::ingest::{index_documents, IngestOptions};
use context_recall::merge::RetrievalMerger;
use context_recall::models::Document;
use context_recall::store::memory::InMemoryChunkStore;
use context_recall::store::retry::RetryingStore;
use context_recall::store::CollectionLayout;

/// Context Recall: token-bounded chunking and full-document retrieval.
#[derive(Parser)]
#[command(
    name = "recall",
    about = "Context Recall: token-bounded chunking and full-document retrieval",
    version
)]
struct Cli {
    /// Path to configuration file (TOML). Built-in defaults when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chunk documents and print the chunks as JSON.
    Chunk {
        /// JSON file containing an array of documents.
        documents: PathBuf,

        /// Override `chunking.max_tokens`.
        #[arg(long)]
        max_tokens: Option<usize>,
    },

    /// Index documents into an in-memory store and run a merged search.
    Search {
        /// JSON file containing an array of documents.
        documents: PathBuf,

        /// Free-text query.
        query: String,

        /// Maximum documents to return (defaults to `retrieval.default_limit`).
        #[arg(long)]
        limit: Option<usize>,

        /// Override `chunking.max_tokens`.
        #[arg(long)]
        max_tokens: Option<usize>,

        /// Collection name used inside the in-memory store.
        #[arg(long, default_value = "documents")]
        collection: String,

        /// Print the full outcome, including partial-recall details.
        #[arg(long)]
        details: bool,
    },
}

fn load_documents(path: &Path) -> Result<Vec<Document>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read documents file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse documents file: {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let cfg = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => Config::default(),
    };
    let chunker = Chunker::from_config(&cfg.chunking);

    match cli.command {
        Commands::Chunk {
            documents,
            max_tokens,
        } => {
            let docs = load_documents(&documents)?;
            let max_tokens = max_tokens.unwrap_or(cfg.chunking.max_tokens);
            let chunks = chunker.chunk_many(&docs, max_tokens)?;
            println!("{}", serde_json::to_string_pretty(&chunks)?);
        }
        Commands::Search {
            documents,
            query,
            limit,
            max_tokens,
            collection,
            details,
        } => {
            let docs = load_documents(&documents)?;
            let memory = InMemoryChunkStore::new();
            memory.create_collection(&collection, CollectionLayout::Chunked)?;
            let store = RetryingStore::new(memory, cfg.store.retry_policy());

            let options = IngestOptions {
                max_tokens: max_tokens.unwrap_or(cfg.chunking.max_tokens),
                skip_existing: false,
            };
            index_documents(&store, &collection, &chunker, &docs, &options).await?;

            let merger = RetrievalMerger::new(&store, cfg.retrieval.search_params());
            let limit = limit.unwrap_or(cfg.retrieval.default_limit);
            if details {
                let outcome = merger.search_detailed(&collection, &query, limit).await?;
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                let results = merger.search(&collection, &query, limit).await?;
                println!("{}", serde_json::to_string_pretty(&results)?);
            }
        }
    }

    Ok(())
}
