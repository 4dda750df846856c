//! Search items and field extraction.
//!
//! An [`Item`] is the unit that flows through indexing and comes back as a
//! search result. Its id is always the *combined* id
//! (`datasource_id/raw_id`), unique within an index.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::field::{Field, Value};

/// Separator between datasource id and raw id in combined ids.
pub const ID_SEPARATOR: char = '/';

/// Separator for nested property paths (`author:name`).
pub const PATH_SEPARATOR: char = ':';

/// Property paths starting with this prefix are computed (by the index or
/// by processors) instead of read from the source object.
pub const COMPUTED_PREFIX: char = '_';

pub fn combined_id(datasource_id: &str, raw_id: &str) -> String {
    format!("{}{}{}", datasource_id, ID_SEPARATOR, raw_id)
}

/// Split a combined id at the first separator.
pub fn split_combined_id(id: &str) -> Option<(&str, &str)> {
    id.split_once(ID_SEPARATOR)
}

/// Typed property access on the objects a datasource produces.
pub trait SourceObject: Send + Sync + fmt::Debug {
    /// Raw value of a top-level property, `None` if absent.
    fn get_property(&self, name: &str) -> Option<Json>;
}

impl SourceObject for Json {
    fn get_property(&self, name: &str) -> Option<Json> {
        match self {
            Json::Object(map) => map.get(name).cloned(),
            _ => None,
        }
    }
}

/// Resolve a `:`-separated property path against a source object.
///
/// Arrays met on the way fan out, so `authors:name` on a list of author
/// objects yields the list of names. Anything not found resolves to null.
pub fn resolve_property(source: &dyn SourceObject, path: &str) -> Json {
    let mut segments = path.split(PATH_SEPARATOR);
    let first = match segments.next().and_then(|s| source.get_property(s)) {
        Some(v) => v,
        None => return Json::Null,
    };

    let mut current = vec![first];
    let mut fanned_out = false;
    for segment in segments {
        let mut next = Vec::new();
        for value in current {
            match value {
                Json::Object(mut map) => {
                    if let Some(v) = map.remove(segment) {
                        next.push(v);
                    }
                }
                Json::Array(items) => {
                    fanned_out = true;
                    for item in items {
                        if let Json::Object(mut map) = item {
                            if let Some(v) = map.remove(segment) {
                                next.push(v);
                            }
                        }
                    }
                }
                _ => {}
            }
        }
        current = next;
    }

    match current.len() {
        0 => Json::Null,
        1 if !fanned_out => current.remove(0),
        _ => Json::Array(current),
    }
}

/// One unit of content to index, or one search result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub datasource_id: Option<String>,
    #[serde(skip)]
    pub source: Option<Arc<dyn SourceObject>>,
    #[serde(default)]
    pub fields: BTreeMap<String, Field>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    /// Data attached by processors during postprocessing.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Json>,
}

impl Item {
    pub fn new(datasource_id: &str, raw_id: &str) -> Self {
        Self {
            id: combined_id(datasource_id, raw_id),
            datasource_id: Some(datasource_id.to_string()),
            ..Self::default()
        }
    }

    pub fn with_source(mut self, source: Arc<dyn SourceObject>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn raw_id(&self) -> &str {
        split_combined_id(&self.id)
            .map(|(_, raw)| raw)
            .unwrap_or(&self.id)
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    pub fn field_mut(&mut self, name: &str) -> Option<&mut Field> {
        self.fields.get_mut(name)
    }

    pub fn field_value(&self, name: &str) -> &Value {
        static NULL: Value = Value::Null;
        self.fields.get(name).map(|f| &f.value).unwrap_or(&NULL)
    }

    /// Fill every non-computed field from the source object.
    pub fn extract_fields(&mut self) {
        let Some(source) = self.source.clone() else {
            return;
        };
        for field in self.fields.values_mut() {
            if field.property_path.starts_with(COMPUTED_PREFIX) {
                continue;
            }
            let raw = resolve_property(source.as_ref(), &field.property_path);
            field.value = Value::from_json(&raw, &field.field_type);
        }
    }
}

/// Items keyed by combined id. Ordered so pipelines are deterministic.
pub type ItemMap = BTreeMap<String, Item>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldType;
    use serde_json::json;

    #[test]
    fn combined_ids_split_at_first_separator() {
        let id = combined_id("docs", "guides/intro.json");
        assert_eq!(id, "docs/guides/intro.json");
        assert_eq!(
            split_combined_id(&id),
            Some(("docs", "guides/intro.json"))
        );
        assert_eq!(split_combined_id("plain"), None);
    }

    #[test]
    fn nested_paths_fan_out_over_arrays() {
        let source = json!({
            "title": "Hello",
            "author": {"name": "Ada"},
            "tags": [{"label": "a"}, {"label": "b"}],
        });
        assert_eq!(resolve_property(&source, "title"), json!("Hello"));
        assert_eq!(resolve_property(&source, "author:name"), json!("Ada"));
        assert_eq!(resolve_property(&source, "tags:label"), json!(["a", "b"]));
        assert_eq!(resolve_property(&source, "author:missing"), Json::Null);
        assert_eq!(resolve_property(&source, "missing:name"), Json::Null);
    }

    #[test]
    fn extract_fields_skips_computed_paths() {
        let mut item = Item::new("ds", "1").with_source(Arc::new(json!({
            "title": "Hello",
            "views": "12",
        })));
        item.fields
            .insert("title".into(), Field::new("title", FieldType::Text));
        item.fields
            .insert("views".into(), Field::new("views", FieldType::Integer));
        item.fields.insert(
            "_language".into(),
            Field::new("_language", FieldType::String).with_value("en"),
        );

        item.extract_fields();

        assert_eq!(item.field_value("title"), &Value::String("Hello".into()));
        assert_eq!(item.field_value("views"), &Value::Integer(12));
        assert_eq!(item.field_value("_language"), &Value::String("en".into()));
        assert_eq!(item.raw_id(), "1");
    }
}
