//! TOML configuration for chunking, retrieval, and the store boundary.
//!
//! Every key has a default, so an empty file (or no file at all) yields a
//! working configuration. Validation happens once, at load time.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::merge::SearchParams;
use crate::store::retry::RetryPolicy;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_safety_margin")]
    pub safety_margin: usize,
    /// Path to a `tokenizer.json`; characters are counted when unset.
    #[serde(default)]
    pub tokenizer_path: Option<PathBuf>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            safety_margin: default_safety_margin(),
            tokenizer_path: None,
        }
    }
}

fn default_max_tokens() -> usize {
    6000
}
fn default_safety_margin() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_fan_out_factor")]
    pub fan_out_factor: usize,
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
    /// Deadline for a whole search; `0` disables it.
    #[serde(default)]
    pub search_timeout_ms: u64,
    #[serde(default = "default_limit")]
    pub default_limit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            fan_out_factor: default_fan_out_factor(),
            fetch_concurrency: default_fetch_concurrency(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            search_timeout_ms: 0,
            default_limit: default_limit(),
        }
    }
}

fn default_fan_out_factor() -> usize {
    5
}
fn default_fetch_concurrency() -> usize {
    4
}
fn default_fetch_timeout_ms() -> u64 {
    5000
}
fn default_limit() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
        }
    }
}

fn default_max_retries() -> u32 {
    2
}
fn default_retry_base_delay_ms() -> u64 {
    100
}

/// Upper bound on concurrent per-document fetches.
const MAX_FETCH_CONCURRENCY: usize = 16;

impl RetrievalConfig {
    pub fn search_params(&self) -> SearchParams {
        SearchParams {
            fan_out_factor: self.fan_out_factor,
            fetch_concurrency: self.fetch_concurrency,
            fetch_timeout: Duration::from_millis(self.fetch_timeout_ms),
            search_timeout: (self.search_timeout_ms > 0)
                .then(|| Duration::from_millis(self.search_timeout_ms)),
        }
    }
}

impl StoreConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate chunking
    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }
    if config.chunking.safety_margin >= config.chunking.max_tokens {
        anyhow::bail!(
            "chunking.safety_margin ({}) must be smaller than chunking.max_tokens ({})",
            config.chunking.safety_margin,
            config.chunking.max_tokens
        );
    }

    // Validate retrieval
    if config.retrieval.fan_out_factor == 0 {
        anyhow::bail!("retrieval.fan_out_factor must be >= 1");
    }
    if !(1..=MAX_FETCH_CONCURRENCY).contains(&config.retrieval.fetch_concurrency) {
        anyhow::bail!(
            "retrieval.fetch_concurrency must be in [1, {}]",
            MAX_FETCH_CONCURRENCY
        );
    }
    if config.retrieval.fetch_timeout_ms == 0 {
        anyhow::bail!("retrieval.fetch_timeout_ms must be > 0");
    }
    if config.retrieval.default_limit == 0 {
        anyhow::bail!("retrieval.default_limit must be >= 1");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.chunking.max_tokens, 6000);
        assert_eq!(config.chunking.safety_margin, 50);
        assert!(config.chunking.tokenizer_path.is_none());
        assert_eq!(config.retrieval.fan_out_factor, 5);
        assert_eq!(config.retrieval.default_limit, 10);
        assert_eq!(config.store.max_retries, 2);
    }

    #[test]
    fn test_partial_sections() {
        let config = parse_config(
            r#"
            [chunking]
            max_tokens = 500

            [retrieval]
            fan_out_factor = 3
            search_timeout_ms = 2500
            "#,
        )
        .unwrap();
        assert_eq!(config.chunking.max_tokens, 500);
        assert_eq!(config.chunking.safety_margin, 50);
        let params = config.retrieval.search_params();
        assert_eq!(params.fan_out_factor, 3);
        assert_eq!(params.search_timeout, Some(Duration::from_millis(2500)));
        assert_eq!(params.fetch_timeout, Duration::from_millis(5000));
    }

    #[test]
    fn test_zero_search_timeout_disables_deadline() {
        let config = parse_config("").unwrap();
        assert!(config.retrieval.search_params().search_timeout.is_none());
    }

    #[test]
    fn test_rejects_zero_max_tokens() {
        let err = parse_config("[chunking]\nmax_tokens = 0\n").unwrap_err();
        assert!(err.to_string().contains("max_tokens"));
    }

    #[test]
    fn test_rejects_margin_not_below_budget() {
        let err = parse_config("[chunking]\nmax_tokens = 40\nsafety_margin = 40\n").unwrap_err();
        assert!(err.to_string().contains("safety_margin"));
    }

    #[test]
    fn test_rejects_zero_fan_out() {
        let err = parse_config("[retrieval]\nfan_out_factor = 0\n").unwrap_err();
        assert!(err.to_string().contains("fan_out_factor"));
    }

    #[test]
    fn test_rejects_unbounded_concurrency() {
        assert!(parse_config("[retrieval]\nfetch_concurrency = 0\n").is_err());
        assert!(parse_config("[retrieval]\nfetch_concurrency = 64\n").is_err());
    }

    #[test]
    fn test_retry_policy_from_store_section() {
        let config =
            parse_config("[store]\nmax_retries = 4\nretry_base_delay_ms = 10\n").unwrap();
        let policy = config.store.retry_policy();
        assert_eq!(policy.max_retries, 4);
        assert_eq!(policy.base_delay, Duration::from_millis(10));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[chunking]\nmax_tokens = 1200").unwrap();
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.chunking.max_tokens, 1200);
    }

    #[test]
    fn test_load_config_missing_file() {
        let err = load_config(Path::new("/nonexistent/recall.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
