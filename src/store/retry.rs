//! Bounded retry at the store boundary.
//!
//! [`RetryingStore`] wraps any [`ChunkStore`] and retries calls that fail
//! with [`Error::StorageUnavailable`](crate::error::Error::StorageUnavailable)
//! using exponential backoff: `base, 2×base, 4×base, …` (capped at 32×base).
//! Any other error is returned immediately. The merge algorithm never
//! retries on its own.

use std::collections::{BTreeSet, HashSet};
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::error::Result;
use crate::models::{Chunk, SearchHit};

use super::ChunkStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first failure.
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(5);
        self.base_delay * (1u32 << exponent)
    }

    /// Run `op` until it succeeds, fails permanently, or retries run out.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = self.delay_for(attempt);
                    warn!(
                        operation,
                        attempt,
                        max_retries = self.max_retries,
                        "store call failed, retrying in {:?}: {}",
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// A [`ChunkStore`] that retries transient failures of the inner store.
pub struct RetryingStore<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S: ChunkStore> RetryingStore<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: ChunkStore> ChunkStore for RetryingStore<S> {
    async fn index(&self, collection: &str, chunk: &Chunk) -> Result<()> {
        self.policy
            .run("index", || self.inner.index(collection, chunk))
            .await
    }

    async fn search(&self, collection: &str, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        self.policy
            .run("search", || self.inner.search(collection, query, limit))
            .await
    }

    async fn fetch_by_document_id(
        &self,
        collection: &str,
        document_id: &str,
    ) -> Result<Vec<Chunk>> {
        self.policy
            .run("fetch_by_document_id", || {
                self.inner.fetch_by_document_id(collection, document_id)
            })
            .await
    }

    async fn describe_schema(&self, collection: &str) -> Result<BTreeSet<String>> {
        self.policy
            .run("describe_schema", || self.inner.describe_schema(collection))
            .await
    }

    async fn delete_by_document_id(&self, collection: &str, document_id: &str) -> Result<usize> {
        self.policy
            .run("delete_by_document_id", || {
                self.inner.delete_by_document_id(collection, document_id)
            })
            .await
    }

    async fn existing_urls(&self, collection: &str, scope: &str) -> Result<HashSet<String>> {
        self.policy
            .run("existing_urls", || self.inner.existing_urls(collection, scope))
            .await
    }
}
