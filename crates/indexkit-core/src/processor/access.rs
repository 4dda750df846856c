//! `access`: grant-token access control.
//!
//! At index time every item of an access-controlled datasource gets a
//! multi-valued field holding opaque grant tokens read from its source
//! object (`access__all` when it has none). At query time the searching
//! [`Account`]'s grants become an OR group of equality conditions on that
//! field, so a result is visible when it shares at least one token with
//! the account. Searches without an account run as an anonymous account
//! holding no grants.
//!
//! Settings: `field` (default `_access_grants`), `source_property`
//! (default `grants`), `datasources` (access-controlled datasource ids,
//! default all).

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tracing::{debug, warn};

use crate::condition::{ConditionGroup, Conjunction, Operator};
use crate::error::Result;
use crate::field::{Field, FieldType, Value};
use crate::index::{Index, DATASOURCE_FIELD};
use crate::item::{resolve_property, ItemMap};
use crate::query::Query;

use super::{Processor, ProcessorConfig, Stage};

/// Grant token of items visible to everyone.
pub const ACCESS_ALL: &str = "access__all";

/// The account a search runs for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    #[serde(default)]
    pub grants: Vec<String>,
    /// Skip access checks entirely.
    #[serde(default)]
    pub bypass: bool,
    /// Whether the account may view access-controlled content at all.
    #[serde(default = "default_true")]
    pub can_view: bool,
}

fn default_true() -> bool {
    true
}

impl Account {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            grants: Vec::new(),
            bypass: false,
            can_view: true,
        }
    }

    /// Searches without an account see only items granted to everyone.
    pub fn anonymous() -> Self {
        Self::new("anonymous")
    }

    pub fn with_grants(mut self, grants: impl IntoIterator<Item = String>) -> Self {
        self.grants = grants.into_iter().collect();
        self
    }
}

pub struct AccessProcessor {
    id: String,
    field: String,
    source_property: String,
    datasources: Option<BTreeSet<String>>,
}

impl AccessProcessor {
    pub fn from_config(config: &ProcessorConfig) -> Result<Self> {
        let settings = config.settings();
        Ok(Self {
            id: config.id.clone(),
            field: settings.string("field", "_access_grants")?,
            source_property: settings.string("source_property", "grants")?,
            datasources: settings
                .string_list("datasources")?
                .map(|ids| ids.into_iter().collect()),
        })
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    fn affects(&self, datasource: &str) -> bool {
        self.datasources
            .as_ref()
            .map_or(true, |ids| ids.contains(datasource))
    }

    fn grants_of(&self, item: &crate::item::Item) -> Vec<Value> {
        let raw = match &item.source {
            Some(source) => resolve_property(source.as_ref(), &self.source_property),
            None => Json::Null,
        };
        let grants: Vec<Value> = match Value::from_json(&raw, &FieldType::list_of(FieldType::String)) {
            Value::List(values) => values.into_iter().filter(|v| !v.is_empty()).collect(),
            _ => Vec::new(),
        };
        if grants.is_empty() {
            vec![Value::String(ACCESS_ALL.to_string())]
        } else {
            grants
        }
    }
}

impl Processor for AccessProcessor {
    fn id(&self) -> &str {
        &self.id
    }

    fn stages(&self) -> &'static [Stage] {
        &[
            Stage::AddProperties,
            Stage::PreprocessIndex,
            Stage::PreprocessQuery,
        ]
    }

    fn alter_property_definitions(
        &self,
        datasource: Option<&str>,
        properties: &mut BTreeMap<String, FieldType>,
    ) {
        if datasource.is_some_and(|ds| self.affects(ds)) {
            properties.insert(self.field.clone(), FieldType::list_of(FieldType::String));
        }
    }

    fn preprocess_index_items(&self, index: &Index, items: &mut ItemMap) -> Result<()> {
        if index.field_type(&self.field).is_none() {
            debug!(index = %index.id(), field = %self.field, "access field not indexed");
            return Ok(());
        }
        for item in items.values_mut() {
            let affected = item
                .datasource_id
                .as_deref()
                .is_some_and(|ds| self.affects(ds));
            if !affected {
                continue;
            }
            let value = Value::List(self.grants_of(item));
            item.fields.insert(
                self.field.clone(),
                Field::new(self.field.clone(), FieldType::list_of(FieldType::String))
                    .with_value(value),
            );
        }
        Ok(())
    }

    fn preprocess_search_query(&self, query: &mut Query) -> Result<()> {
        if query.options().bypass_access {
            return Ok(());
        }
        let account = match &query.options().access_account {
            Some(account) => account.clone(),
            None => {
                debug!(index = %query.index().id(), "search without account, only public items visible");
                Account::anonymous()
            }
        };
        if account.bypass {
            return Ok(());
        }

        let index = Arc::clone(query.index());
        let (affected, unaffected): (Vec<String>, Vec<String>) = index
            .datasource_ids()
            .into_iter()
            .partition(|ds| self.affects(ds));
        if affected.is_empty() {
            return Ok(());
        }

        let field_indexed = index.field_type(&self.field).is_some();
        if !field_indexed {
            warn!(
                index = %index.id(),
                field = %self.field,
                "access field is not indexed, access-controlled datasources are hidden"
            );
        }

        if !field_indexed || !account.can_view {
            if unaffected.is_empty() {
                query.abort("no access to any of the searched content");
                return Ok(());
            }
            let mut visible = ConditionGroup::new(Conjunction::Or).with_tag("access");
            for ds in unaffected {
                visible.condition(DATASOURCE_FIELD, ds, Operator::Eq);
            }
            query.restrict(visible);
            return Ok(());
        }

        let mut grants = ConditionGroup::new(Conjunction::Or).with_tag("access_grants");
        grants.condition(self.field.clone(), ACCESS_ALL, Operator::Eq);
        for grant in &account.grants {
            grants.condition(self.field.clone(), grant.as_str(), Operator::Eq);
        }

        if unaffected.is_empty() {
            query.restrict(grants);
        } else {
            let mut visible = ConditionGroup::new(Conjunction::Or).with_tag("access");
            for ds in unaffected {
                visible.condition(DATASOURCE_FIELD, ds, Operator::Eq);
            }
            visible.filter(grants);
            query.restrict(visible);
        }
        Ok(())
    }
}

pub fn build(config: &ProcessorConfig) -> Result<Arc<dyn Processor>> {
    Ok(Arc::new(AccessProcessor::from_config(config)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::ConditionNode;
    use crate::query::QueryOptions;
    use crate::testing;
    use serde_json::json;

    fn options(account: Option<Account>) -> QueryOptions {
        QueryOptions {
            access_account: account,
            ..QueryOptions::default()
        }
    }

    #[test]
    fn property_is_added_for_affected_datasources_only() {
        let config = ProcessorConfig::new("access").with_setting("datasources", json!(["private"]));
        let processor = AccessProcessor::from_config(&config).unwrap();
        let mut props = BTreeMap::new();
        processor.alter_property_definitions(Some("public"), &mut props);
        assert!(props.is_empty());
        processor.alter_property_definitions(Some("private"), &mut props);
        assert_eq!(
            props.get("_access_grants"),
            Some(&FieldType::list_of(FieldType::String))
        );
    }

    async fn visible_ids(query: &mut Query) -> Vec<String> {
        let results = query.execute().await.unwrap();
        assert!(!query.is_aborted());
        let mut ids: Vec<String> = results.ids().into_iter().map(String::from).collect();
        ids.sort();
        ids
    }

    #[tokio::test]
    async fn missing_account_sees_public_items_only() {
        let index = testing::index_with_access(true, None);
        testing::index_everything(&index).await;
        let mut query = Query::new(index, options(None));
        assert_eq!(
            visible_ids(&mut query).await,
            vec!["docs/b", "docs/c", "notes/n1"]
        );
        let group = query.condition_group().find_tagged("access_grants").unwrap();
        assert_eq!(group.conditions.len(), 1);
    }

    #[tokio::test]
    async fn missing_account_sees_uncontrolled_datasources() {
        let index = testing::index_with_access(true, Some(vec!["docs"]));
        testing::index_everything(&index).await;
        let mut query = Query::new(index, options(None));
        assert_eq!(
            visible_ids(&mut query).await,
            vec!["docs/b", "docs/c", "notes/n1"]
        );
        assert!(query.condition_group().find_tagged("access").is_some());
    }

    #[tokio::test]
    async fn or_root_cannot_widen_grants() {
        let index = testing::index_with_access(true, None);
        testing::index_everything(&index).await;
        let mut query = Query::new(index, options(Some(Account::new("nobody"))));
        query.condition_group_mut().set_conjunction("OR");
        query.condition("views", 5i64, Operator::Eq);
        query.condition("views", 2i64, Operator::Eq);
        assert_eq!(visible_ids(&mut query).await, vec!["docs/b"]);
        assert_eq!(query.condition_group().conjunction, Conjunction::And);
    }

    #[test]
    fn bypass_skips_filtering() {
        let index = testing::index_with_access(true, None);
        let mut account = Account::new("admin");
        account.bypass = true;
        let mut query = Query::new(index, options(Some(account)));
        query.pre_execute().unwrap();
        assert!(!query.is_aborted());
        assert!(query.condition_group().is_empty());
    }

    #[test]
    fn grants_become_or_group_including_access_all() {
        let index = testing::index_with_access(true, None);
        let account = Account::new("u1").with_grants(vec!["team:a".to_string()]);
        let mut query = Query::new(index, options(Some(account)));
        query.pre_execute().unwrap();

        let group = query.condition_group().find_tagged("access_grants").unwrap();
        assert_eq!(group.conjunction, Conjunction::Or);
        let values: Vec<String> = group
            .conditions
            .iter()
            .filter_map(|n| match n {
                ConditionNode::Condition(c) => Some(c.value.to_text()),
                ConditionNode::Group(_) => None,
            })
            .collect();
        assert_eq!(values, vec![ACCESS_ALL.to_string(), "team:a".to_string()]);
    }

    #[test]
    fn unindexed_field_restricts_to_other_datasources() {
        let index = testing::index_with_access(false, Some(vec!["docs"]));
        let mut query = Query::new(index, options(Some(Account::new("u1"))));
        query.pre_execute().unwrap();
        assert!(!query.is_aborted());
        let group = query.condition_group().find_tagged("access").unwrap();
        assert_eq!(group.conditions.len(), 1);
        assert!(query.condition_group().find_tagged("access_grants").is_none());
    }

    #[test]
    fn unindexed_field_with_only_controlled_datasources_aborts() {
        let index = testing::index_with_access(false, None);
        let mut query = Query::new(index, options(Some(Account::new("u1"))));
        query.pre_execute().unwrap();
        assert!(query.is_aborted());
    }
}
