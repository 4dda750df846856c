//! Plugin registry: factories for backends, datasources and processors,
//! keyed by the ids used in the config file.
//!
//! ```text
//! [servers.local]      backend = "sqlite"  -> backend factory
//! [datasources.docs]   kind = "json"       -> datasource factory
//! [[indexes.processors]] id = "tokenizer"  -> processor factory
//! ```

use anyhow::{anyhow, Result};
use indexkit_core::backend::memory::MemoryBackend;
use indexkit_core::backend::Backend;
use indexkit_core::datasource::Datasource;
use indexkit_core::processor::registry::ProcessorRegistry;
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::backend_sqlite::SqliteBackend;
use crate::config::{DatasourceConfig, ServerConfig};
use crate::datasource_json::JsonDirDatasource;

pub type BackendFactory = fn(&str, &ServerConfig, &SqlitePool) -> Result<Arc<dyn Backend>>;
pub type DatasourceFactory = fn(&str, &DatasourceConfig) -> Result<Arc<dyn Datasource>>;

#[derive(Clone, Default)]
pub struct PluginRegistry {
    backends: BTreeMap<String, BackendFactory>,
    datasources: BTreeMap<String, DatasourceFactory>,
    processors: ProcessorRegistry,
}

impl PluginRegistry {
    pub fn with_builtins() -> Self {
        let mut registry = Self {
            processors: ProcessorRegistry::with_builtins(),
            ..Self::default()
        };
        registry.register_backend("sqlite", |id, _, pool| {
            Ok(Arc::new(SqliteBackend::new(id, pool.clone())) as Arc<dyn Backend>)
        });
        registry.register_backend("memory", |id, _, _| {
            Ok(Arc::new(MemoryBackend::new(id)) as Arc<dyn Backend>)
        });
        registry.register_datasource("json", |id, config| {
            Ok(Arc::new(JsonDirDatasource::from_config(id, config)?) as Arc<dyn Datasource>)
        });
        registry
    }

    pub fn register_backend(&mut self, kind: &str, factory: BackendFactory) {
        self.backends.insert(kind.to_string(), factory);
    }

    pub fn register_datasource(&mut self, kind: &str, factory: DatasourceFactory) {
        self.datasources.insert(kind.to_string(), factory);
    }

    pub fn has_backend(&self, kind: &str) -> bool {
        self.backends.contains_key(kind)
    }

    pub fn has_datasource(&self, kind: &str) -> bool {
        self.datasources.contains_key(kind)
    }

    pub fn backend_kinds(&self) -> Vec<&str> {
        self.backends.keys().map(String::as_str).collect()
    }

    pub fn datasource_kinds(&self) -> Vec<&str> {
        self.datasources.keys().map(String::as_str).collect()
    }

    pub fn processors(&self) -> &ProcessorRegistry {
        &self.processors
    }

    pub fn create_backend(
        &self,
        id: &str,
        config: &ServerConfig,
        pool: &SqlitePool,
    ) -> Result<Arc<dyn Backend>> {
        let factory = self
            .backends
            .get(&config.backend)
            .ok_or_else(|| anyhow!("Unknown backend '{}' for server '{}'", config.backend, id))?;
        factory(id, config, pool)
    }

    pub fn create_datasource(
        &self,
        id: &str,
        config: &DatasourceConfig,
    ) -> Result<Arc<dyn Datasource>> {
        let factory = self
            .datasources
            .get(&config.kind)
            .ok_or_else(|| anyhow!("Unknown datasource kind '{}' for '{}'", config.kind, id))?;
        factory(id, config)
    }
}
