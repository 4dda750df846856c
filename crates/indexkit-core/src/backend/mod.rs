//! Search backends: where indexed items are stored and searched.
//!
//! `index_items` is best effort: a backend returns the ids it actually
//! stored, and only those are marked indexed by the caller.

pub mod eval;
pub mod memory;

use async_trait::async_trait;

use crate::index::Index;
use crate::item::ItemMap;
use crate::query::Query;
use crate::results::ResultSet;

#[async_trait]
pub trait Backend: Send + Sync {
    fn id(&self) -> &str;

    /// Optional capabilities, e.g. `highlight`.
    fn supports_feature(&self, _feature: &str) -> bool {
        false
    }

    /// Store `items`, returning the ids that were stored successfully.
    async fn index_items(&self, index: &Index, items: &ItemMap) -> anyhow::Result<Vec<String>>;

    async fn delete_items(&self, index: &Index, item_ids: &[String]) -> anyhow::Result<()>;

    /// Delete every item of the index (of `datasource`, if given).
    async fn delete_all_items(&self, index: &Index, datasource: Option<&str>)
        -> anyhow::Result<()>;

    async fn search(&self, query: &Query) -> crate::error::Result<ResultSet>;
}
