//! Shared fixtures for unit tests.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::json;

use crate::backend::memory::MemoryBackend;
use crate::datasource::{Datasource, MemoryDatasource};
use crate::error::Result;
use crate::field::FieldType;
use crate::index::{FieldConfig, Index, IndexSettings};
use crate::processor::registry::ProcessorRegistry;
use crate::processor::{ProcessorConfig, ProcessorPipeline};
use crate::tracker::memory::MemoryTrackerStore;
use crate::tracker::ManualClock;

pub(crate) struct Fixture {
    pub index: Arc<Index>,
    pub backend: Arc<MemoryBackend>,
    pub docs: Arc<MemoryDatasource>,
    pub clock: Arc<ManualClock>,
}

fn properties() -> BTreeMap<String, FieldType> {
    [
        ("title", FieldType::Text),
        ("body", FieldType::Text),
        ("views", FieldType::Integer),
        ("tags", FieldType::list_of(FieldType::String)),
        ("lang", FieldType::String),
    ]
    .into_iter()
    .map(|(name, ty)| (name.to_string(), ty))
    .collect()
}

/// `docs/a` and `docs/b` mention "rust" (a in its title), `docs/c` is
/// German.
pub(crate) fn docs() -> Arc<MemoryDatasource> {
    let docs = MemoryDatasource::new("docs", properties()).with_language_property("lang");
    let objects = [
        (
            "a",
            json!({"title": "Rust in practice", "body": "Ownership and borrowing",
                   "views": 5, "tags": ["lang", "rust"], "lang": "en", "grants": ["team:a"]}),
        ),
        (
            "b",
            json!({"title": "Gardening", "body": "Growing rust-resistant roses",
                   "views": 2, "tags": ["garden"], "lang": "en"}),
        ),
        (
            "c",
            json!({"title": "Kochen", "body": "Nudeln mit Soße", "views": 1, "tags": [], "lang": "de"}),
        ),
    ];
    for (id, object) in objects {
        docs.insert(id, object).expect("insert fixture object");
    }
    Arc::new(docs)
}

pub(crate) fn settings() -> IndexSettings {
    let mut settings = IndexSettings::new("main")
        .field("title", FieldConfig::new(FieldType::Text).with_boost(2.0))
        .field("body", FieldConfig::new(FieldType::Text))
        .field("views", FieldConfig::new(FieldType::Integer))
        .field("tags", FieldConfig::new(FieldType::list_of(FieldType::String)));
    settings.datasources = vec!["docs".into()];
    settings
}

pub(crate) fn pipeline(processors: Vec<ProcessorConfig>) -> ProcessorPipeline {
    ProcessorRegistry::with_builtins()
        .build(&processors)
        .expect("valid processor configuration")
}

pub(crate) fn build_index(
    settings: IndexSettings,
    processors: Vec<ProcessorConfig>,
) -> Result<Index> {
    Index::new(
        settings,
        Arc::new(MemoryBackend::new("memory")),
        vec![docs() as Arc<dyn Datasource>],
        pipeline(processors),
        Arc::new(MemoryTrackerStore::new()),
        Arc::new(ManualClock::new(100)),
    )
}

pub(crate) fn fixture_from(settings: IndexSettings, pipeline: ProcessorPipeline) -> Fixture {
    let backend = Arc::new(MemoryBackend::new("memory"));
    let docs = docs();
    let clock = Arc::new(ManualClock::new(100));
    let index = Index::new(
        settings,
        backend.clone(),
        vec![docs.clone() as Arc<dyn Datasource>],
        pipeline,
        Arc::new(MemoryTrackerStore::new()),
        clock.clone(),
    )
    .expect("valid fixture index");
    Fixture {
        index: Arc::new(index),
        backend,
        docs,
        clock,
    }
}

pub(crate) fn fixture(processors: Vec<ProcessorConfig>) -> Fixture {
    fixture_from(settings(), pipeline(processors))
}

pub(crate) fn fixture_with(
    alter: impl FnOnce(&mut IndexSettings),
    processors: Vec<ProcessorConfig>,
) -> Fixture {
    let mut settings = settings();
    alter(&mut settings);
    fixture_from(settings, pipeline(processors))
}

pub(crate) fn index(processors: Vec<ProcessorConfig>) -> Arc<Index> {
    fixture(processors).index
}

pub(crate) fn read_only_index() -> Arc<Index> {
    fixture_with(|settings| settings.read_only = true, vec![]).index
}

/// Track and index every fixture item.
pub(crate) async fn index_everything(index: &Arc<Index>) {
    assert!(index.rebuild_tracker().await.expect("tracking"));
    index.index_items(None, None).await.expect("indexing");
}

/// An index over `docs` and `notes` with the access processor controlling
/// `controlled` (every datasource when `None`).
pub(crate) fn index_with_access(
    field_indexed: bool,
    controlled: Option<Vec<&str>>,
) -> Arc<Index> {
    let notes = MemoryDatasource::new("notes", properties());
    notes
        .insert("n1", json!({"title": "Shopping list", "body": "rust remover"}))
        .expect("insert fixture object");

    let mut settings = settings();
    settings.datasources = vec!["docs".into(), "notes".into()];
    if field_indexed {
        settings.fields.insert(
            "_access_grants".into(),
            FieldConfig::new(FieldType::list_of(FieldType::String)),
        );
    }

    let mut config = ProcessorConfig::new("access");
    if let Some(ids) = controlled {
        config = config.with_setting("datasources", json!(ids));
    }

    let index = Index::new(
        settings,
        Arc::new(MemoryBackend::new("memory")),
        vec![docs() as Arc<dyn Datasource>, Arc::new(notes) as Arc<dyn Datasource>],
        pipeline(vec![config]),
        Arc::new(MemoryTrackerStore::new()),
        Arc::new(ManualClock::new(100)),
    )
    .expect("valid fixture index");
    Arc::new(index)
}
