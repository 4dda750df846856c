//! Datasources: where indexed content comes from.
//!
//! A [`Datasource`] hands out source objects by raw id and enumerates its
//! ids page by page. It does not track changes itself; whoever modifies
//! the content calls the owning index's `track_items_*` methods.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value as Json;

use crate::field::FieldType;
use crate::item::{resolve_property, SourceObject};

#[async_trait]
pub trait Datasource: Send + Sync {
    fn id(&self) -> &str;

    fn label(&self) -> &str {
        self.id()
    }

    /// Property paths this datasource knows, with their types.
    fn property_definitions(&self) -> BTreeMap<String, FieldType>;

    async fn load(&self, raw_id: &str) -> Result<Option<Arc<dyn SourceObject>>> {
        let mut loaded = self.load_multiple(&[raw_id.to_string()]).await?;
        Ok(loaded.remove(raw_id))
    }

    /// Load several objects. Ids that no longer exist are left out.
    async fn load_multiple(
        &self,
        raw_ids: &[String],
    ) -> Result<BTreeMap<String, Arc<dyn SourceObject>>>;

    /// Up to `limit` raw ids, in a stable order, starting after `cursor`.
    async fn get_item_ids(&self, limit: Option<usize>, cursor: Option<&str>)
        -> Result<Vec<String>>;

    /// Language code of an object, `None` if language-neutral.
    fn item_language(&self, _object: &dyn SourceObject) -> Option<String> {
        None
    }
}

/// A datasource over JSON objects held in memory.
pub struct MemoryDatasource {
    id: String,
    properties: BTreeMap<String, FieldType>,
    language_property: Option<String>,
    objects: RwLock<BTreeMap<String, Arc<Json>>>,
}

impl MemoryDatasource {
    pub fn new(id: impl Into<String>, properties: BTreeMap<String, FieldType>) -> Self {
        Self {
            id: id.into(),
            properties,
            language_property: None,
            objects: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn with_language_property(mut self, property: impl Into<String>) -> Self {
        self.language_property = Some(property.into());
        self
    }

    pub fn insert(&self, raw_id: impl Into<String>, object: Json) -> Result<()> {
        self.objects
            .write()
            .map_err(|_| anyhow!("datasource lock poisoned"))?
            .insert(raw_id.into(), Arc::new(object));
        Ok(())
    }

    pub fn remove(&self, raw_id: &str) -> Result<bool> {
        Ok(self
            .objects
            .write()
            .map_err(|_| anyhow!("datasource lock poisoned"))?
            .remove(raw_id)
            .is_some())
    }
}

#[async_trait]
impl Datasource for MemoryDatasource {
    fn id(&self) -> &str {
        &self.id
    }

    fn property_definitions(&self) -> BTreeMap<String, FieldType> {
        self.properties.clone()
    }

    async fn load_multiple(
        &self,
        raw_ids: &[String],
    ) -> Result<BTreeMap<String, Arc<dyn SourceObject>>> {
        let objects = self
            .objects
            .read()
            .map_err(|_| anyhow!("datasource lock poisoned"))?;
        Ok(raw_ids
            .iter()
            .filter_map(|id| {
                objects
                    .get(id)
                    .map(|obj| (id.clone(), Arc::clone(obj) as Arc<dyn SourceObject>))
            })
            .collect())
    }

    async fn get_item_ids(
        &self,
        limit: Option<usize>,
        cursor: Option<&str>,
    ) -> Result<Vec<String>> {
        let objects = self
            .objects
            .read()
            .map_err(|_| anyhow!("datasource lock poisoned"))?;
        Ok(objects
            .keys()
            .filter(|id| cursor.map_or(true, |c| id.as_str() > c))
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    fn item_language(&self, object: &dyn SourceObject) -> Option<String> {
        let property = self.language_property.as_deref()?;
        match resolve_property(object, property) {
            Json::String(lang) if !lang.is_empty() => Some(lang),
            _ => None,
        }
    }
}
