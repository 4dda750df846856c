//! Search result sets.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::item::Item;

/// Wall-clock timings of one query execution, in seconds.
///
/// `processing` is the time spent in the pre- and postprocessing pipeline
/// only, `complete` includes the backend search.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Performance {
    pub complete: f64,
    pub preprocessing: f64,
    pub postprocessing: f64,
    pub processing: f64,
}

/// The response to one executed [`Query`](crate::query::Query).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultSet {
    /// Total matches before paging.
    pub result_count: usize,
    /// The requested page of results, in sort order.
    pub results: Vec<Item>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// Search keys dropped by processors (stopwords, too short, ...).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ignored: Vec<String>,
    #[serde(default)]
    pub performance: Performance,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Json>,
}

impl ResultSet {
    pub fn add_warning(&mut self, warning: impl Into<String>) {
        let warning = warning.into();
        if !self.warnings.contains(&warning) {
            self.warnings.push(warning);
        }
    }

    pub fn add_ignored(&mut self, key: impl Into<String>) {
        let key = key.into();
        if !self.ignored.contains(&key) {
            self.ignored.push(key);
        }
    }

    pub fn ids(&self) -> Vec<&str> {
        self.results.iter().map(|item| item.id.as_str()).collect()
    }
}
