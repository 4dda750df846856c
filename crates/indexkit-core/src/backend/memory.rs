//! A backend that keeps indexed items in memory.

use std::collections::BTreeMap;
use std::sync::RwLock;

use anyhow::anyhow;
use async_trait::async_trait;
use tracing::debug;

use super::{eval, Backend};
use crate::error::{Error, Result};
use crate::index::Index;
use crate::item::{Item, ItemMap};
use crate::query::Query;
use crate::results::ResultSet;

type IndexedItems = BTreeMap<String, BTreeMap<String, Item>>;

pub struct MemoryBackend {
    id: String,
    /// index id -> item id -> item
    items: RwLock<IndexedItems>,
    #[cfg(test)]
    rejected: RwLock<std::collections::BTreeSet<String>>,
    #[cfg(test)]
    failing: std::sync::atomic::AtomicBool,
}

impl MemoryBackend {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            items: RwLock::new(BTreeMap::new()),
            #[cfg(test)]
            rejected: RwLock::new(Default::default()),
            #[cfg(test)]
            failing: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Ids stored for `index_id`, in id order.
    pub fn stored_ids(&self, index_id: &str) -> Vec<String> {
        self.items
            .read()
            .map(|items| {
                items
                    .get(index_id)
                    .map(|m| m.keys().cloned().collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    pub fn stored_item(&self, index_id: &str, item_id: &str) -> Option<Item> {
        let items = self.items.read().ok()?;
        items.get(index_id)?.get(item_id).cloned()
    }

    /// Make `index_items` leave out `item_id`.
    #[cfg(test)]
    pub(crate) fn reject(&self, item_id: &str) {
        if let Ok(mut rejected) = self.rejected.write() {
            rejected.insert(item_id.to_string());
        }
    }

    /// Make every following `index_items` call fail.
    #[cfg(test)]
    pub(crate) fn fail(&self, failing: bool) {
        self.failing
            .store(failing, std::sync::atomic::Ordering::SeqCst);
    }

    #[cfg(test)]
    fn accepts(&self, item_id: &str) -> anyhow::Result<bool> {
        if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(anyhow!("backend unavailable"));
        }
        let rejected = self
            .rejected
            .read()
            .map_err(|_| anyhow!("backend lock poisoned"))?;
        Ok(!rejected.contains(item_id))
    }

    #[cfg(not(test))]
    fn accepts(&self, _item_id: &str) -> anyhow::Result<bool> {
        Ok(true)
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn id(&self) -> &str {
        &self.id
    }

    async fn index_items(&self, index: &Index, items: &ItemMap) -> anyhow::Result<Vec<String>> {
        let mut stored = self
            .items
            .write()
            .map_err(|_| anyhow!("backend lock poisoned"))?;
        let table = stored.entry(index.id().to_string()).or_default();
        let mut accepted = Vec::with_capacity(items.len());
        for (id, item) in items {
            if !self.accepts(id)? {
                continue;
            }
            let mut copy = item.clone();
            copy.source = None;
            table.insert(id.clone(), copy);
            accepted.push(id.clone());
        }
        debug!(index = %index.id(), stored = accepted.len(), "items stored");
        Ok(accepted)
    }

    async fn delete_items(&self, index: &Index, item_ids: &[String]) -> anyhow::Result<()> {
        let mut stored = self
            .items
            .write()
            .map_err(|_| anyhow!("backend lock poisoned"))?;
        if let Some(table) = stored.get_mut(index.id()) {
            for id in item_ids {
                table.remove(id);
            }
        }
        Ok(())
    }

    async fn delete_all_items(
        &self,
        index: &Index,
        datasource: Option<&str>,
    ) -> anyhow::Result<()> {
        let mut stored = self
            .items
            .write()
            .map_err(|_| anyhow!("backend lock poisoned"))?;
        match datasource {
            None => {
                stored.remove(index.id());
            }
            Some(ds) => {
                if let Some(table) = stored.get_mut(index.id()) {
                    table.retain(|_, item| item.datasource_id.as_deref() != Some(ds));
                }
            }
        }
        Ok(())
    }

    async fn search(&self, query: &Query) -> Result<ResultSet> {
        let stored = self
            .items
            .read()
            .map_err(|_| Error::backend("backend lock poisoned"))?;
        let empty = BTreeMap::new();
        let table = stored.get(query.index().id()).unwrap_or(&empty);
        Ok(eval::evaluate(query, table.values()))
    }
}
