//! Error taxonomy for chunking and retrieval.
//!
//! Only failures a caller has to act on are represented here. A collection
//! without chunk-identity fields is not an error (it selects the flat
//! layout), and documents that cannot be fully reassembled are reported as
//! [`PartialRecall`](crate::merge::PartialRecall) entries on a successful
//! search rather than failing it.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed document handed to the chunker (e.g. missing URL).
    #[error("invalid document: {0}")]
    Validation(String),

    /// Token budget too small to hold the metadata header and safety margin.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The chunk store could not be reached or refused the request.
    #[error("chunk store unavailable: {0}")]
    StorageUnavailable(String),

    /// Query arguments rejected before contacting the store.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Cancellation fired before the initial fan-out search returned.
    #[error("search cancelled before the initial search completed")]
    Cancelled,

    /// A subword tokenizer could not be loaded.
    #[error("tokenizer error: {0}")]
    Tokenizer(String),
}

impl Error {
    /// Whether a bounded retry at the store boundary may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::StorageUnavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
