//! Assembles the configured indexes.
//!
//! Datasources and servers are created once and shared by every index
//! that references them. All indexes share one SQLite tracker store.

use anyhow::{anyhow, Result};
use indexkit_core::backend::Backend;
use indexkit_core::datasource::Datasource;
use indexkit_core::tracker::{Clock, SystemClock, TrackerStore};
use indexkit_core::Index;
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::config::Config;
use crate::db;
use crate::migrate;
use crate::registry::PluginRegistry;
use crate::tracker_sqlite::SqliteTrackerStore;

pub struct Workspace {
    pool: SqlitePool,
    indexes: BTreeMap<String, Arc<Index>>,
}

impl Workspace {
    /// Connect to the configured database and build every index.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::create_schema(&pool).await?;
        Self::build(config, pool, &PluginRegistry::with_builtins())
    }

    pub fn build(config: &Config, pool: SqlitePool, plugins: &PluginRegistry) -> Result<Self> {
        let tracker_store: Arc<dyn TrackerStore> = Arc::new(SqliteTrackerStore::new(pool.clone()));
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let mut datasources: BTreeMap<&str, Arc<dyn Datasource>> = BTreeMap::new();
        for (id, ds_config) in &config.datasources {
            datasources.insert(id, plugins.create_datasource(id, ds_config)?);
        }

        let mut backends: BTreeMap<&str, Arc<dyn Backend>> = BTreeMap::new();
        for (id, server) in &config.servers {
            backends.insert(id, plugins.create_backend(id, server, &pool)?);
        }

        let mut indexes = BTreeMap::new();
        for index_config in &config.indexes {
            let settings = index_config.settings.clone();
            let backend = backends
                .get(index_config.server.as_str())
                .cloned()
                .ok_or_else(|| {
                    anyhow!(
                        "Index '{}' uses unknown server '{}'",
                        settings.id,
                        index_config.server
                    )
                })?;
            let sources = settings
                .datasources
                .iter()
                .map(|id| {
                    datasources.get(id.as_str()).cloned().ok_or_else(|| {
                        anyhow!("Index '{}' uses unknown datasource '{}'", settings.id, id)
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            let pipeline = plugins.processors().build(&index_config.processors)?;
            debug!(index = %settings.id, processors = pipeline.len(), "index assembled");

            let index = Index::new(
                settings,
                backend,
                sources,
                pipeline,
                tracker_store.clone(),
                clock.clone(),
            )?;
            indexes.insert(index.id().to_string(), Arc::new(index));
        }

        Ok(Self { pool, indexes })
    }

    pub fn index(&self, id: &str) -> Result<&Arc<Index>> {
        self.indexes.get(id).ok_or_else(|| {
            let known: Vec<&str> = self.indexes.keys().map(String::as_str).collect();
            anyhow!(
                "Unknown index '{}'. Configured indexes: {}",
                id,
                if known.is_empty() {
                    "(none)".to_string()
                } else {
                    known.join(", ")
                }
            )
        })
    }

    pub fn indexes(&self) -> impl Iterator<Item = &Arc<Index>> {
        self.indexes.values()
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}
