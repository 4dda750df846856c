//! The processor pipeline.
//!
//! A [`Processor`] is a configurable transformation that takes part in one
//! or more pipeline [`Stage`]s. An index holds its processors in a
//! [`ProcessorPipeline`], built from configuration by the
//! [`registry::ProcessorRegistry`]. For each stage the participating
//! processors run in ascending weight; equal weights keep configuration
//! order.
//!
//! Processors that transform field values, keys and filter values the same
//! way implement the much smaller [`field::FieldTransform`] trait and are
//! wrapped in [`field::FieldProcessor`].

pub mod access;
pub mod field;
pub mod highlight;
pub mod html_filter;
pub mod ignore_case;
pub mod registry;
pub mod stopwords;
pub mod tokenizer;
pub mod transliteration;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

use crate::error::{Error, Result};
use crate::field::FieldType;
use crate::index::Index;
use crate::item::ItemMap;
use crate::query::Query;
use crate::results::ResultSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Contribute computed properties to datasource property definitions.
    AddProperties,
    PreprocessIndex,
    PreprocessQuery,
    PostprocessQuery,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::AddProperties => "add_properties",
            Stage::PreprocessIndex => "preprocess_index",
            Stage::PreprocessQuery => "preprocess_query",
            Stage::PostprocessQuery => "postprocess_query",
        };
        f.write_str(name)
    }
}

/// A pipeline transformation. Every stage method defaults to a no-op.
pub trait Processor: Send + Sync {
    /// Registry id (`html_filter`, `access`, ...).
    fn id(&self) -> &str;

    /// Stages this processor takes part in.
    fn stages(&self) -> &'static [Stage];

    fn supports_stage(&self, stage: Stage) -> bool {
        self.stages().contains(&stage)
    }

    /// Add computed properties for `datasource` (`None`: datasource
    /// independent).
    fn alter_property_definitions(
        &self,
        _datasource: Option<&str>,
        _properties: &mut BTreeMap<String, FieldType>,
    ) {
    }

    /// Mutate items before indexing. Removing an entry rejects the item.
    fn preprocess_index_items(&self, _index: &Index, _items: &mut ItemMap) -> Result<()> {
        Ok(())
    }

    fn preprocess_search_query(&self, _query: &mut Query) -> Result<()> {
        Ok(())
    }

    fn postprocess_search_results(&self, _results: &mut ResultSet, _query: &Query) {}
}

/// One `[[indexes.processors]]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessorConfig {
    pub id: String,
    #[serde(default)]
    pub weight: i32,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub settings: Map<String, Json>,
}

fn default_true() -> bool {
    true
}

impl ProcessorConfig {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            weight: 0,
            enabled: true,
            settings: Map::new(),
        }
    }

    pub fn with_weight(mut self, weight: i32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_setting(mut self, key: &str, value: Json) -> Self {
        self.settings.insert(key.to_string(), value);
        self
    }

    pub fn settings(&self) -> Settings<'_> {
        Settings {
            processor: &self.id,
            map: &self.settings,
        }
    }
}

/// Typed, validating view of a processor's settings map.
pub struct Settings<'a> {
    processor: &'a str,
    map: &'a Map<String, Json>,
}

impl<'a> Settings<'a> {
    fn invalid(&self, key: &str, expected: &str) -> Error {
        Error::configuration(format!(
            "processor '{}': setting '{}' must be {}",
            self.processor, key, expected
        ))
    }

    pub fn get(&self, key: &str) -> Option<&'a Json> {
        self.map.get(key)
    }

    pub fn bool(&self, key: &str, default: bool) -> Result<bool> {
        match self.map.get(key) {
            None => Ok(default),
            Some(Json::Bool(b)) => Ok(*b),
            Some(_) => Err(self.invalid(key, "a boolean")),
        }
    }

    pub fn f64(&self, key: &str, default: f64) -> Result<f64> {
        match self.map.get(key) {
            None => Ok(default),
            Some(Json::Number(n)) => n.as_f64().ok_or_else(|| self.invalid(key, "a number")),
            Some(_) => Err(self.invalid(key, "a number")),
        }
    }

    pub fn usize(&self, key: &str, default: usize) -> Result<usize> {
        match self.map.get(key) {
            None => Ok(default),
            Some(Json::Number(n)) => n
                .as_u64()
                .map(|v| v as usize)
                .ok_or_else(|| self.invalid(key, "a non-negative integer")),
            Some(_) => Err(self.invalid(key, "a non-negative integer")),
        }
    }

    pub fn string(&self, key: &str, default: &str) -> Result<String> {
        match self.map.get(key) {
            None => Ok(default.to_string()),
            Some(Json::String(s)) => Ok(s.clone()),
            Some(_) => Err(self.invalid(key, "a string")),
        }
    }

    pub fn string_list(&self, key: &str) -> Result<Option<Vec<String>>> {
        match self.map.get(key) {
            None => Ok(None),
            Some(Json::Array(items)) => items
                .iter()
                .map(|v| {
                    v.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| self.invalid(key, "a list of strings"))
                })
                .collect::<Result<Vec<_>>>()
                .map(Some),
            Some(Json::String(s)) => Ok(Some(
                s.split(|c: char| c.is_whitespace() || c == ',')
                    .filter(|w| !w.is_empty())
                    .map(str::to_string)
                    .collect(),
            )),
            Some(_) => Err(self.invalid(key, "a list of strings")),
        }
    }

    /// The `fields` allow-list: either an array of names or a map of
    /// name to boolean. `None` when not configured.
    pub fn field_allow_list(&self) -> Result<Option<BTreeSet<String>>> {
        match self.map.get("fields") {
            None | Some(Json::Null) => Ok(None),
            Some(Json::Object(map)) => Ok(Some(
                map.iter()
                    .filter(|(_, enabled)| is_truthy(enabled))
                    .map(|(name, _)| name.clone())
                    .collect(),
            )),
            Some(Json::Array(_)) => Ok(self
                .string_list("fields")?
                .map(|names| names.into_iter().collect())),
            Some(_) => Err(self.invalid("fields", "a list of field names")),
        }
    }
}

fn is_truthy(value: &Json) -> bool {
    match value {
        Json::Bool(b) => *b,
        Json::Number(n) => n.as_f64().is_some_and(|v| v != 0.0),
        Json::String(s) => !s.is_empty() && s != "0",
        Json::Null => false,
        Json::Array(a) => !a.is_empty(),
        Json::Object(o) => !o.is_empty(),
    }
}

#[derive(Clone)]
struct PipelineEntry {
    weight: i32,
    processor: Arc<dyn Processor>,
}

/// An index's processors, in configuration order.
#[derive(Clone, Default)]
pub struct ProcessorPipeline {
    entries: Vec<PipelineEntry>,
}

impl fmt::Debug for ProcessorPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|e| (e.processor.id(), e.weight)))
            .finish()
    }
}

impl ProcessorPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, weight: i32, processor: Arc<dyn Processor>) {
        self.entries.push(PipelineEntry { weight, processor });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Processor>> {
        self.entries
            .iter()
            .find(|e| e.processor.id() == id)
            .map(|e| Arc::clone(&e.processor))
    }

    /// Processors taking part in `stage`, by ascending weight.
    pub fn for_stage(&self, stage: Stage) -> Vec<Arc<dyn Processor>> {
        let mut matching: Vec<&PipelineEntry> = self
            .entries
            .iter()
            .filter(|e| e.processor.supports_stage(stage))
            .collect();
        // stable: equal weights keep configuration order
        matching.sort_by_key(|e| e.weight);
        matching
            .into_iter()
            .map(|e| Arc::clone(&e.processor))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Named(&'static str, &'static [Stage]);

    impl Processor for Named {
        fn id(&self) -> &str {
            self.0
        }

        fn stages(&self) -> &'static [Stage] {
            self.1
        }
    }

    #[test]
    fn for_stage_sorts_by_weight_and_keeps_ties_in_order() {
        let mut pipeline = ProcessorPipeline::new();
        pipeline.push(10, Arc::new(Named("late", &[Stage::PreprocessIndex])));
        pipeline.push(0, Arc::new(Named("first", &[Stage::PreprocessIndex])));
        pipeline.push(0, Arc::new(Named("second", &[Stage::PreprocessIndex])));
        pipeline.push(-5, Arc::new(Named("query_only", &[Stage::PreprocessQuery])));

        let ids: Vec<String> = pipeline
            .for_stage(Stage::PreprocessIndex)
            .iter()
            .map(|p| p.id().to_string())
            .collect();
        assert_eq!(ids, vec!["first", "second", "late"]);
        assert_eq!(pipeline.for_stage(Stage::PostprocessQuery).len(), 0);
    }

    #[test]
    fn settings_validate_types() {
        let config = ProcessorConfig::new("x")
            .with_setting("flag", json!("yes"))
            .with_setting("size", json!(3))
            .with_setting("fields", json!({"title": true, "body": false}));
        let settings = config.settings();
        assert!(settings.bool("flag", false).is_err());
        assert_eq!(settings.usize("size", 1).unwrap(), 3);
        assert_eq!(settings.bool("missing", true).unwrap(), true);
        let fields = settings.field_allow_list().unwrap().unwrap();
        assert!(fields.contains("title"));
        assert!(!fields.contains("body"));
    }
}
