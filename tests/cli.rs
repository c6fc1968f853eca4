use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn recall_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_recall"))
}

fn setup_test_env() -> (TempDir, PathBuf, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let long_body = (1..=4)
        .map(|i| {
            let extra = if i == 2 { "borrow checker " } else { "" };
            format!("Chapter {} {}{}", i, extra, "filler words ".repeat(20).trim_end())
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    let documents = serde_json::json!([
        {
            "title": "Rust Ownership",
            "body": long_body,
            "url": "https://example.com/ownership",
            "source_name": "blog",
            "category": "programming",
            "scope": "demo"
        },
        {
            "title": "Gardening",
            "body": "Tomatoes need sun and water.",
            "url": "https://example.com/garden",
            "source_name": "blog",
            "category": "home",
            "scope": "demo"
        }
    ]);
    let docs_path = root.join("documents.json");
    fs::write(&docs_path, serde_json::to_string_pretty(&documents).unwrap()).unwrap();

    let config_content = r#"[chunking]
max_tokens = 500
safety_margin = 50

[retrieval]
fan_out_factor = 5
fetch_concurrency = 2
fetch_timeout_ms = 2000
default_limit = 5

[store]
max_retries = 1
retry_base_delay_ms = 10
"#;
    let config_path = root.join("recall.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path, docs_path)
}

fn run_recall(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = recall_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run recall binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_chunk_prints_chunks_as_json() {
    let (_tmp, config_path, docs_path) = setup_test_env();
    let (stdout, stderr, success) = run_recall(&config_path, &["chunk", docs_path.to_str().unwrap()]);
    assert!(success, "chunk failed: {}", stderr);

    let chunks: Vec<serde_json::Value> = serde_json::from_str(&stdout).unwrap();
    let ownership: Vec<&serde_json::Value> = chunks
        .iter()
        .filter(|c| c["url"] == "https://example.com/ownership")
        .collect();
    assert_eq!(ownership.len(), 4);
    assert!(ownership
        .iter()
        .all(|c| c["total_chunks"] == 4 && c["content"].as_str().unwrap().chars().count() <= 500));
    assert_eq!(chunks.len(), 5);
}

#[test]
fn test_chunk_max_tokens_override() {
    let (_tmp, config_path, docs_path) = setup_test_env();
    let (stdout, stderr, success) = run_recall(
        &config_path,
        &["chunk", docs_path.to_str().unwrap(), "--max-tokens", "6000"],
    );
    assert!(success, "chunk failed: {}", stderr);

    let chunks: Vec<serde_json::Value> = serde_json::from_str(&stdout).unwrap();
    assert_eq!(chunks.len(), 2);
}

#[test]
fn test_search_returns_reassembled_document() {
    let (_tmp, config_path, docs_path) = setup_test_env();
    let (stdout, stderr, success) = run_recall(
        &config_path,
        &["search", docs_path.to_str().unwrap(), "borrow checker"],
    );
    assert!(success, "search failed: {}", stderr);

    let results: Vec<serde_json::Value> = serde_json::from_str(&stdout).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["url"], "https://example.com/ownership");
    assert_eq!(results[0]["chunk_count"], 4);
    let content = results[0]["content"].as_str().unwrap();
    for i in 1..=4 {
        assert!(content.contains(&format!("Chapter {}", i)));
    }
}

#[test]
fn test_search_details_reports_outcome() {
    let (_tmp, config_path, docs_path) = setup_test_env();
    let (stdout, stderr, success) = run_recall(
        &config_path,
        &["search", docs_path.to_str().unwrap(), "tomatoes", "--details"],
    );
    assert!(success, "search failed: {}", stderr);

    let outcome: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(outcome["cancelled"], false);
    assert_eq!(outcome["documents"].as_array().unwrap().len(), 1);
    assert!(outcome["partial_recall"].as_array().unwrap().is_empty());
}

#[test]
fn test_invalid_config_fails() {
    let (tmp, _config_path, docs_path) = setup_test_env();
    let bad_config = tmp.path().join("bad.toml");
    fs::write(&bad_config, "[chunking]\nmax_tokens = 0\n").unwrap();

    let (_stdout, stderr, success) = run_recall(&bad_config, &["chunk", docs_path.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("max_tokens"));
}

#[test]
fn test_missing_documents_file_fails() {
    let (tmp, config_path, _docs_path) = setup_test_env();
    let missing = tmp.path().join("nope.json");
    let (_stdout, stderr, success) = run_recall(&config_path, &["chunk", missing.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("Failed to read documents file"));
}
