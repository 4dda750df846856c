use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn indexkit_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("indexkit");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let docs_dir = root.join("docs");
    fs::create_dir_all(docs_dir.join("sub")).unwrap();
    fs::write(
        docs_dir.join("a.json"),
        r#"{"title": "Rust in practice", "body": "Ownership and borrowing", "views": 5, "lang": "en", "tags": ["rust"]}"#,
    )
    .unwrap();
    fs::write(
        docs_dir.join("b.json"),
        r#"{"title": "Gardening", "body": "Growing rust-resistant roses", "views": 2, "lang": "en", "tags": ["garden"]}"#,
    )
    .unwrap();
    fs::write(
        docs_dir.join("sub/c.json"),
        r#"{"title": "Kochen", "body": "Nudeln mit Tomaten", "views": 1, "lang": "de"}"#,
    )
    .unwrap();
    fs::write(docs_dir.join("README.md"), "not indexed").unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/indexkit.sqlite"

[indexing]
batch_size = 2

[servers.local]
backend = "sqlite"

[datasources.docs]
kind = "json"
root = "{root}/docs"
language_property = "lang"

[datasources.docs.properties]
title = "text"
body = "text"
views = "integer"
tags = "list<string>"
lang = "string"

[[indexes]]
id = "main"
server = "local"
datasources = ["docs"]

[indexes.fields.title]
type = "text"
boost = 2.0

[indexes.fields.body]
type = "text"

[indexes.fields.views]
type = "integer"

[indexes.fields.tags]
type = "list<string>"

[[indexes.processors]]
id = "ignore_case"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("indexkit.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_indexkit(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = indexkit_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run indexkit binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

/// init + track + index everything.
fn setup_indexed() -> (TempDir, PathBuf) {
    let (tmp, config_path) = setup_test_env();
    for args in [
        &["init"][..],
        &["track", "main", "--progress", "off"][..],
        &["index", "main", "--all", "--progress", "off"][..],
    ] {
        let (_, stderr, success) = run_indexkit(&config_path, args);
        assert!(success, "{:?} failed: {}", args, stderr);
    }
    (tmp, config_path)
}

fn result_ids(stdout: &str) -> Vec<String> {
    let json: serde_json::Value = serde_json::from_str(stdout).unwrap();
    json["results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["id"].as_str().unwrap().to_string())
        .collect()
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_indexkit(&config_path, &["init"]);
    assert!(success, "init failed: {}", stderr);
    assert!(stdout.contains("Database initialized successfully."));
    assert!(tmp.path().join("data/indexkit.sqlite").exists());

    // Idempotent
    let (_, stderr, success) = run_indexkit(&config_path, &["init"]);
    assert!(success, "second init failed: {}", stderr);
}

#[test]
fn test_track_queues_every_json_file() {
    let (_tmp, config_path) = setup_test_env();
    run_indexkit(&config_path, &["init"]);

    let (stdout, stderr, success) =
        run_indexkit(&config_path, &["track", "main", "--progress", "off"]);
    assert!(success, "track failed: {}", stderr);
    assert!(stdout.contains("Tracking 3 items of index 'main', 3 pending."));

    let (stdout, _, success) = run_indexkit(&config_path, &["status"]);
    assert!(success);
    assert!(stdout.contains("Index main"));
    assert!(stdout.contains("Pending:   3"));
}

#[test]
fn test_index_respects_limit() {
    let (_tmp, config_path) = setup_test_env();
    run_indexkit(&config_path, &["init"]);
    run_indexkit(&config_path, &["track", "main", "--progress", "off"]);

    let (stdout, stderr, success) = run_indexkit(
        &config_path,
        &["index", "main", "--limit", "2", "--progress", "off"],
    );
    assert!(success, "index failed: {}", stderr);
    assert!(stdout.contains("Successfully indexed 2 items."));

    let (stdout, _, _) = run_indexkit(&config_path, &["status", "--index", "main"]);
    assert!(stdout.contains("Pending:   1"));
}

#[test]
fn test_json_progress_goes_to_stderr() {
    let (_tmp, config_path) = setup_test_env();
    run_indexkit(&config_path, &["init"]);
    run_indexkit(&config_path, &["track", "main", "--progress", "off"]);

    let (stdout, stderr, success) =
        run_indexkit(&config_path, &["index", "main", "--all", "--progress", "json"]);
    assert!(success);
    assert!(stdout.contains("Successfully indexed 3 items."));
    let last = stderr
        .lines()
        .filter(|l| l.starts_with('{'))
        .last()
        .expect("progress lines on stderr");
    let event: serde_json::Value = serde_json::from_str(last).unwrap();
    assert_eq!(event["phase"], "indexing");
    assert_eq!(event["n"], 3);
    assert_eq!(event["total"], 3);
}

#[test]
fn test_keyword_search() {
    let (_tmp, config_path) = setup_indexed();

    let (stdout, stderr, success) = run_indexkit(&config_path, &["search", "main", "RUST"]);
    assert!(success, "search failed: {}", stderr);
    assert!(stdout.contains("2 results"));
    assert!(stdout.contains("docs/a.json"));
    assert!(stdout.contains("docs/b.json"));
    assert!(!stdout.contains("docs/sub/c.json"));
}

#[test]
fn test_search_no_results() {
    let (_tmp, config_path) = setup_indexed();

    let (stdout, _, success) = run_indexkit(&config_path, &["search", "main", "zzzznonexistent"]);
    assert!(success);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_filters_and_sorting() {
    let (_tmp, config_path) = setup_indexed();

    let (stdout, stderr, success) = run_indexkit(
        &config_path,
        &[
            "search", "main", "--filter", "views>=2", "--sort", "views:DESC", "--json",
        ],
    );
    assert!(success, "search failed: {}", stderr);
    assert_eq!(result_ids(&stdout), vec!["docs/a.json", "docs/b.json"]);

    let (stdout, _, success) = run_indexkit(
        &config_path,
        &["search", "main", "--filter", "tags=garden", "--json"],
    );
    assert!(success);
    assert_eq!(result_ids(&stdout), vec!["docs/b.json"]);
}

#[test]
fn test_language_restriction() {
    let (_tmp, config_path) = setup_indexed();

    let (stdout, stderr, success) = run_indexkit(
        &config_path,
        &["search", "main", "--language", "de", "--json"],
    );
    assert!(success, "search failed: {}", stderr);
    assert_eq!(result_ids(&stdout), vec!["docs/sub/c.json"]);
}

#[test]
fn test_sorting_on_text_field_is_rejected() {
    let (_tmp, config_path) = setup_indexed();

    let (_, stderr, success) =
        run_indexkit(&config_path, &["search", "main", "rust", "--sort", "title"]);
    assert!(!success);
    assert!(stderr.contains("fulltext field 'title'"));
}

#[test]
fn test_reindex_keeps_results_available() {
    let (_tmp, config_path) = setup_indexed();

    let (stdout, stderr, success) = run_indexkit(&config_path, &["reindex", "main"]);
    assert!(success, "reindex failed: {}", stderr);
    assert!(stdout.contains("Queued 3 items of index 'main' for reindexing."));

    let (stdout, _, _) = run_indexkit(&config_path, &["search", "main", "gardening"]);
    assert!(stdout.contains("docs/b.json"));
}

#[test]
fn test_clear_removes_results() {
    let (_tmp, config_path) = setup_indexed();

    let (stdout, stderr, success) = run_indexkit(&config_path, &["clear", "main"]);
    assert!(success, "clear failed: {}", stderr);
    assert!(stdout.contains("Cleared index 'main'; 3 items queued."));

    let (stdout, _, _) = run_indexkit(&config_path, &["search", "main", "rust"]);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_deleted_file_is_untracked_on_next_run() {
    let (tmp, config_path) = setup_test_env();
    run_indexkit(&config_path, &["init"]);
    run_indexkit(&config_path, &["track", "main", "--progress", "off"]);
    fs::remove_file(tmp.path().join("docs/b.json")).unwrap();

    let (stdout, _, success) =
        run_indexkit(&config_path, &["index", "main", "--all", "--progress", "off"]);
    assert!(success);
    assert!(stdout.contains("Successfully indexed 2 items."));

    let (stdout, _, _) = run_indexkit(&config_path, &["status"]);
    assert!(stdout.contains("Tracked:   2"));
}

#[test]
fn test_unknown_index() {
    let (_tmp, config_path) = setup_test_env();
    run_indexkit(&config_path, &["init"]);

    let (_, stderr, success) = run_indexkit(&config_path, &["track", "nope"]);
    assert!(!success);
    assert!(stderr.contains("Unknown index 'nope'"));
}

#[test]
fn test_invalid_config() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("bad.toml");
    fs::write(
        &config_path,
        "[db]\npath = \"x.sqlite\"\n\n[[indexes]]\nid = \"main\"\nserver = \"missing\"\ndatasources = [\"docs\"]\n",
    )
    .unwrap();

    let (_, stderr, success) = run_indexkit(&config_path, &["status"]);
    assert!(!success);
    assert!(stderr.contains("unknown server 'missing'"));
}
