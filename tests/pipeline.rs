//! Library-level tests: configured indexes over SQLite tracking and the
//! SQLite backend, without going through the binary.

use std::fs;
use std::path::Path;

use indexkit::config::Config;
use indexkit::migrate::create_schema;
use indexkit::registry::PluginRegistry;
use indexkit::workspace::Workspace;
use indexkit_core::batch::{self, BatchContext};
use indexkit_core::processor::access::Account;
use indexkit_core::query::QueryOptions;
use sqlx::sqlite::SqlitePoolOptions;
use tempfile::TempDir;

fn write_docs(root: &Path) {
    let docs = root.join("docs");
    fs::create_dir_all(&docs).unwrap();
    fs::write(
        docs.join("a.json"),
        r#"{"title": "Rust in practice", "body": "<p>Ownership and <b>borrowing</b></p>", "views": 5, "grants": ["team:a"]}"#,
    )
    .unwrap();
    fs::write(
        docs.join("b.json"),
        r#"{"title": "Gardening", "body": "<p>Growing rust-resistant roses</p>", "views": 2}"#,
    )
    .unwrap();
    fs::write(
        docs.join("c.json"),
        r#"{"title": "Secret rust recipes", "body": "<p>Only for team b</p>", "views": 9, "grants": ["team:b"]}"#,
    )
    .unwrap();
}

fn config(root: &Path, backend: &str, processors: &str) -> Config {
    let src = format!(
        r#"
[db]
path = "{root}/unused.sqlite"

[servers.local]
backend = "{backend}"

[datasources.docs]
root = "{root}/docs"

[datasources.docs.properties]
title = "text"
body = "text"
views = "integer"

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

[indexes.fields._access_grants]
type = "list<string>"
{processors}
"#,
        root = root.display(),
    );
    toml::from_str(&src).unwrap()
}

async fn workspace(config: &Config) -> Workspace {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    create_schema(&pool).await.unwrap();
    Workspace::build(config, pool, &PluginRegistry::with_builtins()).unwrap()
}

const HTML_AND_ACCESS: &str = r#"
[[indexes.processors]]
id = "html_filter"

[[indexes.processors]]
id = "access"
"#;

#[tokio::test]
async fn indexed_items_are_searchable_from_sqlite() {
    let tmp = TempDir::new().unwrap();
    write_docs(tmp.path());
    let workspace = workspace(&config(tmp.path(), "sqlite", "")).await;
    let index = workspace.index("main").unwrap();

    assert!(index.rebuild_tracker().await.unwrap());
    let report = index.index_items(None, None).await.unwrap();
    assert_eq!((report.attempted, report.indexed), (3, 3));

    let mut query = index.query(QueryOptions::default());
    query.keys(Some("rust"));
    query.sort("views", "DESC").unwrap();
    let results = query.execute().await.unwrap();
    assert_eq!(results.ids(), vec!["docs/c.json", "docs/a.json", "docs/b.json"]);
    assert!(results.results.iter().all(|item| item.score.is_some()));
}

#[tokio::test]
async fn html_is_stripped_and_access_is_enforced() {
    let tmp = TempDir::new().unwrap();
    write_docs(tmp.path());
    let workspace = workspace(&config(tmp.path(), "sqlite", HTML_AND_ACCESS)).await;
    let index = workspace.index("main").unwrap();
    index.rebuild_tracker().await.unwrap();
    index.index_items(None, None).await.unwrap();

    let mut team_a = Account::new("alice");
    team_a.grants = vec!["team:a".into()];
    let mut query = index.query(QueryOptions {
        access_account: Some(team_a),
        ..QueryOptions::default()
    });
    query.keys(Some("rust"));
    let results = query.execute().await.unwrap();
    let mut ids = results.ids();
    ids.sort();
    assert_eq!(ids, vec!["docs/a.json", "docs/b.json"]);

    let body = results
        .results
        .iter()
        .find(|item| item.id == "docs/a.json")
        .map(|item| item.field_value("body").to_text())
        .unwrap();
    assert!(!body.contains('<'), "markup left in {:?}", body);
    assert!(body.contains("borrowing"));

    let mut anonymous = index.query(QueryOptions::default());
    anonymous.keys(Some("rust"));
    let results = anonymous.execute().await.unwrap();
    assert_eq!(results.ids(), vec!["docs/b.json"]);
    assert!(results.warnings.is_empty());
}

#[tokio::test]
async fn batches_resume_from_sqlite_tracking_state() {
    let tmp = TempDir::new().unwrap();
    write_docs(tmp.path());
    let workspace = workspace(&config(tmp.path(), "sqlite", "")).await;
    let index = workspace.index("main").unwrap();
    index.rebuild_tracker().await.unwrap();

    let mut context = BatchContext::new(2, None);
    batch::process(index, &mut context).await;
    assert_eq!((context.max, context.progress), (Some(3), 2));
    assert_eq!(index.status().await.unwrap().remaining, 1);

    let context = batch::run(index, context, |_| {}).await;
    assert!(context.finished);
    assert_eq!(context.summary(), "Successfully indexed 3 items.");
    assert_eq!(index.status().await.unwrap().indexed, 3);
}

#[tokio::test]
async fn updated_files_are_reindexed() {
    let tmp = TempDir::new().unwrap();
    write_docs(tmp.path());
    let workspace = workspace(&config(tmp.path(), "sqlite", "")).await;
    let index = workspace.index("main").unwrap();
    index.rebuild_tracker().await.unwrap();
    index.index_items(None, None).await.unwrap();

    fs::write(
        tmp.path().join("docs/b.json"),
        r#"{"title": "Composting", "body": "Worms", "views": 3}"#,
    )
    .unwrap();
    index
        .track_items_updated("docs", &["b.json".to_string()])
        .await
        .unwrap();
    assert_eq!(index.status().await.unwrap().remaining, 1);
    index.index_items(None, None).await.unwrap();

    let mut query = index.query(QueryOptions::default());
    query.keys(Some("composting"));
    let results = query.execute().await.unwrap();
    assert_eq!(results.ids(), vec!["docs/b.json"]);
}

#[tokio::test]
async fn memory_server_shares_the_sqlite_tracker() {
    let tmp = TempDir::new().unwrap();
    write_docs(tmp.path());
    let workspace = workspace(&config(tmp.path(), "memory", "")).await;
    let index = workspace.index("main").unwrap();
    assert_eq!(index.backend().id(), "local");

    index.rebuild_tracker().await.unwrap();
    index.index_items(Some(1), None).await.unwrap();
    let status = index.status().await.unwrap();
    assert_eq!((status.total, status.indexed, status.remaining), (3, 1, 2));

    let results = index.query(QueryOptions::default()).execute().await.unwrap();
    assert_eq!(results.result_count, 1);
}

#[tokio::test]
async fn deleting_a_datasource_empties_backend_and_tracker() {
    let tmp = TempDir::new().unwrap();
    write_docs(tmp.path());
    let workspace = workspace(&config(tmp.path(), "sqlite", "")).await;
    let index = workspace.index("main").unwrap();
    index.rebuild_tracker().await.unwrap();
    index.index_items(None, None).await.unwrap();

    assert!(index.track_all_items_deleted("docs").await.unwrap());
    assert_eq!(index.status().await.unwrap().total, 0);
    let results = index.query(QueryOptions::default()).execute().await.unwrap();
    assert_eq!(results.result_count, 0);
}
