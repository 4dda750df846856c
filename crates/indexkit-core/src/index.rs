//! An index: datasources, a processor pipeline, a tracker and a backend
//! working together.
//!
//! Datasources report changes through the `track_items_*` methods; the
//! tracker records them as pending; [`Index::index_items`] later pulls
//! pending ids, builds items, runs them through the pipeline and hands
//! them to the backend. Only ids the backend acknowledges (plus items a
//! processor rejected) are marked indexed.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::backend::Backend;
use crate::datasource::Datasource;
use crate::error::{Error, Result};
use crate::field::{Field, FieldType, Value};
use crate::item::{combined_id, split_combined_id, Item, ItemMap, SourceObject};
use crate::processor::{Processor, ProcessorPipeline, Stage};
use crate::query::{Query, QueryOptions};
use crate::tracker::{Clock, Tracker, TrackerGuard, TrackerStore, TRACKER_BATCH_SIZE};

/// Pseudo field for sorting and filtering by item id.
pub const ID_FIELD: &str = "_id";
/// Pseudo field for sorting by score.
pub const RELEVANCE_FIELD: &str = "_relevance";
pub const LANGUAGE_FIELD: &str = "_language";
pub const DATASOURCE_FIELD: &str = "_datasource";
/// Language code of language-neutral items.
pub const LANGUAGE_NONE: &str = "und";

/// Hook run on every query of an index after its processors.
pub type QueryAlter = Arc<dyn Fn(&mut Query) -> Result<()> + Send + Sync>;

fn default_true() -> bool {
    true
}

fn default_boost() -> f64 {
    1.0
}

fn default_cron_limit() -> usize {
    50
}

/// One `[indexes.fields.<id>]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldConfig {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Defaults to the field id.
    #[serde(default)]
    pub property_path: Option<String>,
    /// `None` for fields every datasource provides.
    #[serde(default)]
    pub datasource: Option<String>,
    #[serde(default = "default_boost")]
    pub boost: f64,
}

impl FieldConfig {
    pub fn new(field_type: FieldType) -> Self {
        Self {
            field_type,
            property_path: None,
            datasource: None,
            boost: 1.0,
        }
    }

    pub fn with_boost(mut self, boost: f64) -> Self {
        self.boost = boost;
        self
    }

    pub fn with_datasource(mut self, datasource: impl Into<String>) -> Self {
        self.datasource = Some(datasource.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSettings {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub read_only: bool,
    /// Index inserted and updated items right away instead of waiting
    /// for the next batch run.
    #[serde(default)]
    pub index_directly: bool,
    /// Items per scheduled run.
    #[serde(default = "default_cron_limit")]
    pub cron_limit: usize,
    /// Datasource ids; empty means every datasource handed to the index.
    #[serde(default)]
    pub datasources: Vec<String>,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldConfig>,
}

impl IndexSettings {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            enabled: true,
            read_only: false,
            index_directly: false,
            cron_limit: default_cron_limit(),
            datasources: Vec::new(),
            fields: BTreeMap::new(),
        }
    }

    pub fn field(mut self, id: impl Into<String>, config: FieldConfig) -> Self {
        self.fields.insert(id.into(), config);
        self
    }
}

/// Tracking counts of an index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IndexStatus {
    pub total: usize,
    pub indexed: usize,
    pub remaining: usize,
}

/// Outcome of one [`Index::index_items`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IndexingReport {
    /// Pending ids that were pulled from the tracker.
    pub attempted: usize,
    /// Ids now marked indexed, rejected items included.
    pub indexed: usize,
}

pub struct Index {
    settings: IndexSettings,
    fields: BTreeMap<String, FieldConfig>,
    datasources: BTreeMap<String, Arc<dyn Datasource>>,
    backend: Arc<dyn Backend>,
    pipeline: ProcessorPipeline,
    tracker: Tracker,
    query_alters: RwLock<Vec<QueryAlter>>,
}

impl fmt::Debug for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Index")
            .field("id", &self.settings.id)
            .field("backend", &self.backend.id())
            .field("datasources", &self.datasources.keys().collect::<Vec<_>>())
            .field("pipeline", &self.pipeline)
            .finish()
    }
}

impl Index {
    /// Assemble an index. Fails when the settings reference datasources
    /// that were not provided.
    pub fn new(
        settings: IndexSettings,
        backend: Arc<dyn Backend>,
        datasources: Vec<Arc<dyn Datasource>>,
        pipeline: ProcessorPipeline,
        tracker_store: Arc<dyn TrackerStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let mut provided: BTreeMap<String, Arc<dyn Datasource>> = datasources
            .into_iter()
            .map(|ds| (ds.id().to_string(), ds))
            .collect();
        if !settings.datasources.is_empty() {
            let mut selected = BTreeMap::new();
            for id in &settings.datasources {
                let ds = provided.remove(id).ok_or_else(|| {
                    Error::configuration(format!(
                        "index '{}' references unknown datasource '{}'",
                        settings.id, id
                    ))
                })?;
                selected.insert(id.clone(), ds);
            }
            provided = selected;
        }

        let mut fields = settings.fields.clone();
        for (id, config) in &fields {
            if let Some(ds) = &config.datasource {
                if !provided.contains_key(ds) {
                    return Err(Error::configuration(format!(
                        "field '{}' of index '{}' belongs to unknown datasource '{}'",
                        id, settings.id, ds
                    )));
                }
            }
        }
        for special in [DATASOURCE_FIELD, LANGUAGE_FIELD] {
            fields
                .entry(special.to_string())
                .or_insert_with(|| FieldConfig::new(FieldType::String));
        }

        let guard = TrackerGuard {
            exists: true,
            enabled: settings.enabled,
            read_only: settings.read_only,
        };
        let tracker = Tracker::new(settings.id.clone(), guard, tracker_store, clock);

        Ok(Self {
            settings,
            fields,
            datasources: provided,
            backend,
            pipeline,
            tracker,
            query_alters: RwLock::new(Vec::new()),
        })
    }

    pub fn id(&self) -> &str {
        &self.settings.id
    }

    pub fn name(&self) -> &str {
        self.settings.name.as_deref().unwrap_or(&self.settings.id)
    }

    pub fn settings(&self) -> &IndexSettings {
        &self.settings
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.enabled
    }

    pub fn is_read_only(&self) -> bool {
        self.settings.read_only
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    pub fn pipeline(&self) -> &ProcessorPipeline {
        &self.pipeline
    }

    pub fn datasource_ids(&self) -> Vec<String> {
        self.datasources.keys().cloned().collect()
    }

    pub fn datasource(&self, id: &str) -> Option<&Arc<dyn Datasource>> {
        self.datasources.get(id)
    }

    fn owned_datasource(&self, id: &str) -> Result<&Arc<dyn Datasource>> {
        self.datasources.get(id).ok_or_else(|| {
            Error::consistency(format!(
                "datasource '{}' is not part of index '{}'",
                id,
                self.id()
            ))
        })
    }

    /// Indexed fields, special fields included.
    pub fn fields(&self) -> &BTreeMap<String, FieldConfig> {
        &self.fields
    }

    pub fn field_type(&self, field: &str) -> Option<FieldType> {
        self.fields.get(field).map(|f| f.field_type.clone())
    }

    pub fn field_boost(&self, field: &str) -> f64 {
        self.fields.get(field).map_or(1.0, |f| f.boost)
    }

    /// Ids of the text and tokens fields, in name order.
    pub fn fulltext_fields(&self) -> Vec<String> {
        self.fields
            .iter()
            .filter(|(_, config)| config.field_type.is_text())
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn processors_for_stage(&self, stage: Stage) -> Vec<Arc<dyn Processor>> {
        self.pipeline.for_stage(stage)
    }

    /// Properties of `datasource` (`None`: datasource independent),
    /// including the ones processors add.
    pub fn property_definitions(&self, datasource: Option<&str>) -> BTreeMap<String, FieldType> {
        let mut properties = datasource
            .and_then(|id| self.datasources.get(id))
            .map(|ds| ds.property_definitions())
            .unwrap_or_default();
        for processor in self.processors_for_stage(Stage::AddProperties) {
            processor.alter_property_definitions(datasource, &mut properties);
        }
        properties
    }

    pub fn add_query_alter<F>(&self, alter: F)
    where
        F: Fn(&mut Query) -> Result<()> + Send + Sync + 'static,
    {
        if let Ok(mut alters) = self.query_alters.write() {
            alters.push(Arc::new(alter));
        }
    }

    pub fn query_alters(&self) -> Vec<QueryAlter> {
        self.query_alters
            .read()
            .map(|alters| alters.clone())
            .unwrap_or_default()
    }

    pub fn query(self: &Arc<Self>, options: QueryOptions) -> Query {
        Query::new(Arc::clone(self), options)
    }

    /// Build the item for one source object, with all fields extracted.
    pub fn create_item(
        &self,
        datasource: &Arc<dyn Datasource>,
        raw_id: &str,
        source: Arc<dyn SourceObject>,
    ) -> Item {
        let ds_id = datasource.id();
        let mut item = Item::new(ds_id, raw_id).with_source(Arc::clone(&source));
        for (id, config) in &self.fields {
            if config.datasource.as_deref().is_some_and(|d| d != ds_id) {
                continue;
            }
            let path = config.property_path.clone().unwrap_or_else(|| id.clone());
            item.fields
                .insert(id.clone(), Field::new(path, config.field_type.clone()));
        }
        item.extract_fields();

        let language = datasource
            .item_language(source.as_ref())
            .unwrap_or_else(|| LANGUAGE_NONE.to_string());
        if let Some(field) = item.field_mut(LANGUAGE_FIELD) {
            field.value = Value::String(language);
        }
        if let Some(field) = item.field_mut(DATASOURCE_FIELD) {
            field.value = Value::String(ds_id.to_string());
        }
        item
    }

    fn combined(datasource: &str, raw_ids: &[String]) -> Vec<String> {
        raw_ids.iter().map(|id| combined_id(datasource, id)).collect()
    }

    fn ensure_writable(&self, operation: &str) -> Result<()> {
        if !self.settings.enabled || self.settings.read_only {
            return Err(Error::configuration(format!(
                "cannot {} on index '{}': it is disabled or read-only",
                operation,
                self.id()
            )));
        }
        Ok(())
    }

    async fn index_directly(&self, item_ids: &[String]) {
        if !self.settings.index_directly || item_ids.is_empty() {
            return;
        }
        if let Err(e) = self.index_specific_items(item_ids).await {
            error!(
                index = %self.id(),
                error = %e,
                "direct indexing failed, items stay queued"
            );
        }
    }

    /// Start tracking new items of `datasource` (raw ids).
    pub async fn track_items_inserted(&self, datasource: &str, raw_ids: &[String]) -> Result<bool> {
        self.owned_datasource(datasource)?;
        let ids = Self::combined(datasource, raw_ids);
        let ok = self.tracker.track_inserted(&ids).await;
        if ok {
            self.index_directly(&ids).await;
        }
        Ok(ok)
    }

    pub async fn track_items_updated(&self, datasource: &str, raw_ids: &[String]) -> Result<bool> {
        self.owned_datasource(datasource)?;
        let ids = Self::combined(datasource, raw_ids);
        let ok = self.tracker.track_updated(&ids).await;
        if ok {
            self.index_directly(&ids).await;
        }
        Ok(ok)
    }

    /// Queue every item of `datasource` for reindexing.
    pub async fn track_all_items_updated(&self, datasource: &str) -> Result<bool> {
        self.owned_datasource(datasource)?;
        Ok(self.tracker.track_all_updated(Some(datasource)).await)
    }

    /// Stop tracking items of `datasource` and remove them from the
    /// backend.
    pub async fn track_items_deleted(&self, datasource: &str, raw_ids: &[String]) -> Result<bool> {
        self.owned_datasource(datasource)?;
        let ids = Self::combined(datasource, raw_ids);
        if self.tracker.guard().allows_writes() {
            if let Err(e) = self.backend.delete_items(self, &ids).await {
                error!(index = %self.id(), datasource, error = %format!("{:#}", e), "backend delete failed");
            }
        }
        Ok(self.tracker.track_deleted(&ids).await)
    }

    pub async fn track_all_items_deleted(&self, datasource: &str) -> Result<bool> {
        self.owned_datasource(datasource)?;
        if self.tracker.guard().allows_writes() {
            if let Err(e) = self.backend.delete_all_items(self, Some(datasource)).await {
                error!(index = %self.id(), datasource, error = %format!("{:#}", e), "backend delete failed");
            }
        }
        Ok(self.tracker.track_all_deleted(Some(datasource)).await)
    }

    /// Index up to `limit` pending items (of `datasource`, if given),
    /// oldest first.
    pub async fn index_items(
        &self,
        limit: Option<usize>,
        datasource: Option<&str>,
    ) -> Result<IndexingReport> {
        self.ensure_writable("index items")?;
        if let Some(ds) = datasource {
            self.owned_datasource(ds)?;
        }
        let ids = self.tracker.remaining_items(limit, datasource).await?;
        if ids.is_empty() {
            return Ok(IndexingReport::default());
        }
        let indexed = self.index_specific_items(&ids).await?;
        Ok(IndexingReport {
            attempted: ids.len(),
            indexed: indexed.len(),
        })
    }

    /// Index the given combined ids regardless of their tracking state.
    /// Returns the ids marked indexed.
    pub async fn index_specific_items(&self, item_ids: &[String]) -> Result<Vec<String>> {
        self.ensure_writable("index items")?;

        let mut by_datasource: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        for id in item_ids {
            match split_combined_id(id) {
                Some((ds, raw)) if self.datasources.contains_key(ds) => {
                    by_datasource.entry(ds).or_default().push(raw.to_string());
                }
                _ => warn!(index = %self.id(), item = %id, "skipping item of unknown datasource"),
            }
        }

        let mut items = ItemMap::new();
        let mut vanished = Vec::new();
        for (ds_id, raw_ids) in by_datasource {
            let datasource = self.owned_datasource(ds_id)?;
            let mut loaded = datasource.load_multiple(&raw_ids).await?;
            for raw_id in raw_ids {
                match loaded.remove(&raw_id) {
                    Some(source) => {
                        let item = self.create_item(datasource, &raw_id, source);
                        items.insert(item.id.clone(), item);
                    }
                    None => vanished.push(combined_id(ds_id, &raw_id)),
                }
            }
        }

        if !vanished.is_empty() {
            warn!(
                index = %self.id(),
                count = vanished.len(),
                "items could not be loaded and are no longer tracked"
            );
            self.tracker.track_deleted(&vanished).await;
        }
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let candidates: BTreeSet<String> = items.keys().cloned().collect();
        for processor in self.processors_for_stage(Stage::PreprocessIndex) {
            processor.preprocess_index_items(self, &mut items)?;
        }
        let rejected: Vec<String> = candidates
            .iter()
            .filter(|id| !items.contains_key(*id))
            .cloned()
            .collect();
        if !rejected.is_empty() {
            debug!(index = %self.id(), count = rejected.len(), "items rejected by processors");
            self.backend.delete_items(self, &rejected).await?;
        }

        let mut done = rejected;
        if !items.is_empty() {
            let acknowledged = self.backend.index_items(self, &items).await?;
            if acknowledged.len() < items.len() {
                warn!(
                    index = %self.id(),
                    failed = items.len() - acknowledged.len(),
                    "backend did not index every item, the rest stays queued"
                );
            }
            done.extend(acknowledged);
        }

        if !self.tracker.track_indexed(&done).await {
            warn!(index = %self.id(), "indexed items could not be marked as indexed");
        }
        info!(index = %self.id(), indexed = done.len(), "items indexed");
        Ok(done)
    }

    /// Queue everything for reindexing; the backend keeps serving the old
    /// data meanwhile.
    pub async fn reindex(&self) -> Result<bool> {
        self.ensure_writable("reindex")?;
        Ok(self.tracker.track_all_updated(None).await)
    }

    /// Remove everything from the backend and queue it all again.
    pub async fn clear(&self) -> Result<bool> {
        self.ensure_writable("clear")?;
        self.backend.delete_all_items(self, None).await?;
        self.reindex().await
    }

    /// Rebuild tracking from what the datasources currently hold.
    pub async fn rebuild_tracker(&self) -> Result<bool> {
        self.ensure_writable("rebuild tracking")?;
        let mut ok = self.tracker.clear().await;
        for id in self.datasource_ids() {
            ok &= self.start_tracking(&id).await?;
        }
        Ok(ok)
    }

    /// Track every item of `datasource`, paging through its ids.
    pub async fn start_tracking(&self, datasource: &str) -> Result<bool> {
        let ds = self.owned_datasource(datasource)?;
        let mut cursor: Option<String> = None;
        let mut ok = true;
        let mut total = 0;
        loop {
            let page = ds
                .get_item_ids(Some(TRACKER_BATCH_SIZE), cursor.as_deref())
                .await?;
            let Some(last) = page.last().cloned() else {
                break;
            };
            total += page.len();
            ok &= self
                .tracker
                .track_inserted(&Self::combined(datasource, &page))
                .await;
            cursor = Some(last);
        }
        info!(index = %self.id(), datasource, items = total, "tracking started");
        Ok(ok)
    }

    pub async fn status(&self) -> Result<IndexStatus> {
        Ok(IndexStatus {
            total: self.tracker.total_count(None).await?,
            indexed: self.tracker.indexed_count(None).await?,
            remaining: self.tracker.remaining_count(None).await?,
        })
    }
}
