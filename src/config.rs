use anyhow::{bail, Context, Result};
use indexkit_core::field::FieldType;
use indexkit_core::index::IndexSettings;
use indexkit_core::processor::ProcessorConfig;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::registry::PluginRegistry;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub servers: BTreeMap<String, ServerConfig>,
    #[serde(default)]
    pub datasources: BTreeMap<String, DatasourceConfig>,
    #[serde(default)]
    pub indexes: Vec<IndexConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexingConfig {
    /// Items per batch step.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
        }
    }
}

fn default_batch_size() -> usize {
    50
}

/// A search server: where an index's items are stored.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_backend")]
    pub backend: String,
}

fn default_backend() -> String {
    "sqlite".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatasourceConfig {
    #[serde(default = "default_kind")]
    pub kind: String,
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    /// Property holding an object's language code.
    #[serde(default)]
    pub language_property: Option<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, FieldType>,
}

fn default_kind() -> String {
    "json".to_string()
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.json".to_string()]
}

/// One `[[indexes]]` entry.
#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(flatten)]
    pub settings: IndexSettings,
    pub server: String,
    #[serde(default)]
    pub processors: Vec<ProcessorConfig>,
}

impl Config {
    pub fn index(&self, id: &str) -> Option<&IndexConfig> {
        self.indexes.iter().find(|i| i.settings.id == id)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config, &PluginRegistry::with_builtins())?;
    Ok(config)
}

/// Check cross references and plugin ids without opening anything.
pub fn validate(config: &Config, plugins: &PluginRegistry) -> Result<()> {
    if config.indexing.batch_size == 0 {
        bail!("indexing.batch_size must be > 0");
    }

    for (id, server) in &config.servers {
        if !plugins.has_backend(&server.backend) {
            bail!(
                "Unknown backend '{}' for server '{}'. Available: {}",
                server.backend,
                id,
                plugins.backend_kinds().join(", ")
            );
        }
    }

    for (id, ds) in &config.datasources {
        if !plugins.has_datasource(&ds.kind) {
            bail!(
                "Unknown datasource kind '{}' for datasource '{}'. Available: {}",
                ds.kind,
                id,
                plugins.datasource_kinds().join(", ")
            );
        }
    }

    let processors = plugins.processors();
    let mut seen = BTreeSet::new();
    for index in &config.indexes {
        let id = &index.settings.id;
        if !seen.insert(id.as_str()) {
            bail!("Duplicate index id '{}'", id);
        }
        if !config.servers.contains_key(&index.server) {
            bail!("Index '{}' uses unknown server '{}'", id, index.server);
        }
        if index.settings.datasources.is_empty() {
            bail!("Index '{}' must list at least one datasource", id);
        }
        for ds in &index.settings.datasources {
            if !config.datasources.contains_key(ds) {
                bail!("Index '{}' uses unknown datasource '{}'", id, ds);
            }
        }
        for processor in &index.processors {
            if !processors.ids().contains(&processor.id.as_str()) {
                bail!(
                    "Index '{}' uses unknown processor '{}'. Available: {}",
                    id,
                    processor.id,
                    processors.ids().join(", ")
                );
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = r#"
[db]
path = "/tmp/indexkit.sqlite"

[servers.local]

[datasources.docs]
root = "/tmp/docs"
language_property = "lang"

[datasources.docs.properties]
title = "text"
tags = "list<string>"

[[indexes]]
id = "main"
server = "local"
datasources = ["docs"]

[indexes.fields.title]
type = "text"
boost = 2.0

[[indexes.processors]]
id = "ignore_case"
weight = -10
"#;

    fn parse(toml_src: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_src)?;
        validate(&config, &PluginRegistry::with_builtins())?;
        Ok(config)
    }

    #[test]
    fn defaults_are_applied() {
        let config = parse(BASE).unwrap();
        assert_eq!(config.indexing.batch_size, 50);
        assert_eq!(config.servers["local"].backend, "sqlite");
        let docs = &config.datasources["docs"];
        assert_eq!(docs.kind, "json");
        assert_eq!(docs.include_globs, vec!["**/*.json".to_string()]);
        assert_eq!(
            docs.properties["tags"],
            FieldType::list_of(FieldType::String)
        );

        let index = config.index("main").unwrap();
        assert!(index.settings.enabled);
        assert_eq!(index.settings.cron_limit, 50);
        assert_eq!(index.settings.fields["title"].boost, 2.0);
        assert_eq!(index.processors[0].weight, -10);
    }

    #[test]
    fn unknown_references_are_rejected() {
        let err = parse(&BASE.replace("server = \"local\"", "server = \"remote\"")).unwrap_err();
        assert!(err.to_string().contains("unknown server 'remote'"));

        let err = parse(&BASE.replace("id = \"ignore_case\"", "id = \"stemmer\"")).unwrap_err();
        assert!(err.to_string().contains("unknown processor 'stemmer'"));

        let err = parse(&BASE.replace("[servers.local]", "[servers.local]\nbackend = \"solr\""))
            .unwrap_err();
        assert!(err.to_string().contains("Unknown backend 'solr'"));
    }

    #[test]
    fn example_config_is_valid() {
        let config = parse(include_str!("../config/indexkit.example.toml")).unwrap();
        let index = config.index("main").unwrap();
        assert_eq!(index.processors.len(), 7);
        assert_eq!(
            index.settings.fields["author"].property_path.as_deref(),
            Some("authors:name")
        );
        PluginRegistry::with_builtins()
            .processors()
            .build(&index.processors)
            .unwrap();
    }

    #[test]
    fn bad_field_type_fails_to_parse() {
        let src = BASE.replace("title = \"text\"", "title = \"blob\"");
        assert!(parse(&src).is_err());
    }
}
