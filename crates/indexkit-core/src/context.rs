//! Per-request search state.
//!
//! A [`SearchContext`] lives as long as one request. Queries executed
//! through it are remembered by their `search_id`, so later code in the
//! same request (facets, result listings, ...) can look up what was
//! searched and what came back.

use std::collections::BTreeMap;

use crate::error::Result;
use crate::query::Query;
use crate::results::ResultSet;

/// `search_id` of queries that do not set one.
pub const DEFAULT_SEARCH_ID: &str = "default";

#[derive(Debug, Default)]
pub struct SearchContext {
    searches: BTreeMap<String, (Query, ResultSet)>,
}

impl SearchContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Execute `query` and remember it with its results. A later search
    /// with the same id replaces the earlier one.
    pub async fn execute(&mut self, mut query: Query) -> Result<&ResultSet> {
        let search_id = query
            .options()
            .search_id
            .clone()
            .unwrap_or_else(|| DEFAULT_SEARCH_ID.to_string());
        let results = query.execute().await?;
        self.searches.insert(search_id.clone(), (query, results));
        Ok(&self.searches[&search_id].1)
    }

    pub fn get(&self, search_id: &str) -> Option<(&Query, &ResultSet)> {
        self.searches.get(search_id).map(|(q, r)| (q, r))
    }

    pub fn results(&self, search_id: &str) -> Option<&ResultSet> {
        self.searches.get(search_id).map(|(_, r)| r)
    }

    pub fn search_ids(&self) -> Vec<&str> {
        self.searches.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.searches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.searches.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::QueryOptions;
    use crate::testing;

    #[tokio::test]
    async fn searches_are_kept_per_id() {
        let index = testing::index(vec![]);
        testing::index_everything(&index).await;
        let mut context = SearchContext::new();

        let mut all = index.query(QueryOptions::default());
        all.keys(Some("rust"));
        context.execute(all).await.unwrap();

        let mut named = index.query(QueryOptions {
            search_id: Some("sidebar".into()),
            ..QueryOptions::default()
        });
        named.keys(Some("gardening"));
        let results = context.execute(named).await.unwrap();
        assert_eq!(results.ids(), vec!["docs/b"]);

        assert_eq!(context.search_ids(), vec![DEFAULT_SEARCH_ID, "sidebar"]);
        let (query, results) = context.get(DEFAULT_SEARCH_ID).unwrap();
        assert_eq!(query.original_keys(), Some("rust"));
        assert_eq!(results.result_count, 2);
    }

    #[tokio::test]
    async fn contexts_do_not_share_state() {
        let index = testing::index(vec![]);
        let mut first = SearchContext::new();
        first
            .execute(index.query(QueryOptions::default()))
            .await
            .unwrap();
        let second = SearchContext::new();
        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
        assert!(second.results(DEFAULT_SEARCH_ID).is_none());
    }
}
