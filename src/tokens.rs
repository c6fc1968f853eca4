//! Token cost estimation.
//!
//! The chunker never talks to a tokenizer directly; it is handed an
//! `Arc<dyn TokenCounter>`. Two implementations exist:
//!
//! - [`CharCounter`] counts Unicode scalar values. For subword tokenizers a
//!   token almost always spans at least one character, so this over-estimates
//!   and biases toward smaller chunks.
//! - `SubwordCounter` (feature `subword-tokenizer`) loads a HuggingFace
//!   `tokenizer.json` and counts real tokens.

use std::path::Path;
use std::sync::Arc;

use tracing::warn;

use crate::config::ChunkingConfig;
use crate::error::Result;

/// Estimates the token cost of a text. Must be pure and deterministic.
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

/// Conservative fallback: one token per character.
#[derive(Debug, Clone, Copy, Default)]
pub struct CharCounter;

impl TokenCounter for CharCounter {
    fn count(&self, text: &str) -> usize {
        text.chars().count()
    }
}

#[cfg(feature = "subword-tokenizer")]
pub use subword::SubwordCounter;

#[cfg(feature = "subword-tokenizer")]
mod subword {
    use std::path::Path;

    use tracing::warn;

    use super::{CharCounter, TokenCounter};
    use crate::error::{Error, Result};

    /// Precise counter backed by a `tokenizers::Tokenizer`.
    pub struct SubwordCounter {
        tokenizer: tokenizers::Tokenizer,
    }

    impl SubwordCounter {
        pub fn from_file(path: &Path) -> Result<Self> {
            let tokenizer = tokenizers::Tokenizer::from_file(path).map_err(|e| {
                Error::Tokenizer(format!("failed to load {}: {}", path.display(), e))
            })?;
            Ok(Self { tokenizer })
        }
    }

    impl TokenCounter for SubwordCounter {
        fn count(&self, text: &str) -> usize {
            match self.tokenizer.encode(text, false) {
                Ok(encoding) => encoding.len(),
                Err(e) => {
                    warn!("token count failed, falling back to characters: {}", e);
                    CharCounter.count(text)
                }
            }
        }
    }
}

/// Load a subword counter, if this build supports one.
pub fn load_subword_counter(path: &Path) -> Result<Arc<dyn TokenCounter>> {
    #[cfg(feature = "subword-tokenizer")]
    {
        let counter: Arc<dyn TokenCounter> = Arc::new(SubwordCounter::from_file(path)?);
        Ok(counter)
    }
    #[cfg(not(feature = "subword-tokenizer"))]
    {
        Err(crate::error::Error::Tokenizer(format!(
            "cannot load {}: built without the `subword-tokenizer` feature",
            path.display()
        )))
    }
}

/// Build the counter described by the chunking config.
///
/// A configured tokenizer that cannot be loaded degrades to [`CharCounter`]
/// with a warning rather than failing.
pub fn counter_from_config(config: &ChunkingConfig) -> Arc<dyn TokenCounter> {
    match &config.tokenizer_path {
        None => Arc::new(CharCounter),
        Some(path) => match load_subword_counter(path) {
            Ok(counter) => counter,
            Err(e) => {
                warn!("{}; counting characters instead", e);
                Arc::new(CharCounter)
            }
        },
    }
}
