//! The search query object.
//!
//! A [`Query`] is built per request, then run through its lifecycle:
//!
//! 1. **Build**: `keys`, `fields`, `condition`/`filter`, `sort`, `range`.
//!    Illegal fields and sorts fail here with [`Error::InvalidQuery`].
//! 2. **Preprocess** ([`Query::pre_execute`], idempotent): language
//!    filter, default fields, the index's `preprocess_query` processors,
//!    then registered query alter hooks.
//! 3. **Execute**: the backend's `search`.
//! 4. **Postprocess**: the `postprocess_query` processors.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tracing::{debug, warn};

use crate::condition::{ConditionGroup, ConditionNode, Conjunction, Operator};
use crate::error::{Error, Result};
use crate::field::{FieldType, Value};
use crate::index::{Index, ID_FIELD, LANGUAGE_FIELD, LANGUAGE_NONE, RELEVANCE_FIELD};
use crate::processor::access::Account;
use crate::processor::Stage;
use crate::results::ResultSet;

/// How raw search keys are turned into a key tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseMode {
    /// Hand the raw string to the backend untouched.
    Direct,
    /// The whole string is one key.
    Single,
    /// Whitespace-separated terms with `"quoted phrases"`.
    #[default]
    Terms,
}

impl FromStr for ParseMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "direct" => Ok(ParseMode::Direct),
            "single" => Ok(ParseMode::Single),
            "terms" => Ok(ParseMode::Terms),
            other => Err(Error::invalid_query(format!("unknown parse mode '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    /// `DESC` (any case) is descending; anything else is ascending.
    pub fn normalize(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("desc") {
            SortOrder::Desc
        } else {
            SortOrder::Asc
        }
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortOrder::Asc => f.write_str("ASC"),
            SortOrder::Desc => f.write_str("DESC"),
        }
    }
}

/// A node of a parsed key tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Key {
    Term(String),
    Group(KeyGroup),
}

/// Keys joined by one conjunction, optionally negated as a whole.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct KeyGroup {
    #[serde(default)]
    pub conjunction: Conjunction,
    #[serde(default)]
    pub negation: bool,
    #[serde(default)]
    pub keys: Vec<Key>,
}

impl KeyGroup {
    pub fn new(conjunction: Conjunction) -> Self {
        Self {
            conjunction,
            ..Self::default()
        }
    }

    pub fn terms(conjunction: Conjunction, terms: impl IntoIterator<Item = String>) -> Self {
        Self {
            conjunction,
            negation: false,
            keys: terms.into_iter().map(Key::Term).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Every term in the tree, negated subtrees included.
    pub fn all_terms(&self) -> Vec<&str> {
        let mut out = Vec::new();
        for key in &self.keys {
            match key {
                Key::Term(t) => out.push(t.as_str()),
                Key::Group(g) => out.extend(g.all_terms()),
            }
        }
        out
    }

    /// Terms that contribute positively to a match.
    pub fn positive_terms(&self) -> Vec<&str> {
        if self.negation {
            return Vec::new();
        }
        let mut out = Vec::new();
        for key in &self.keys {
            match key {
                Key::Term(t) => out.push(t.as_str()),
                Key::Group(g) => out.extend(g.positive_terms()),
            }
        }
        out
    }
}

/// Parsed search keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Keys {
    Direct(String),
    Parsed(KeyGroup),
}

/// Parse raw keys per `mode`, attaching `conjunction` to the top group.
pub fn parse_keys(raw: &str, mode: ParseMode, conjunction: Conjunction) -> Keys {
    match mode {
        ParseMode::Direct => Keys::Direct(raw.to_string()),
        ParseMode::Single => {
            let raw = raw.trim();
            let terms = if raw.is_empty() {
                Vec::new()
            } else {
                vec![raw.to_string()]
            };
            Keys::Parsed(KeyGroup::terms(conjunction, terms))
        }
        ParseMode::Terms => Keys::Parsed(KeyGroup::terms(conjunction, split_terms(raw))),
    }
}

/// Split on whitespace, keeping `"quoted phrases"` together.
///
/// A token starting with `"` opens a phrase that runs until a token ending
/// with `"`; an unterminated phrase closes at end of input.
fn split_terms(raw: &str) -> Vec<String> {
    let mut terms = Vec::new();
    let mut phrase: Option<Vec<&str>> = None;

    for token in raw.split_whitespace() {
        match phrase.as_mut() {
            Some(parts) => match token.strip_suffix('"') {
                Some(last) => {
                    parts.push(last);
                    terms.push(parts.join(" "));
                    phrase = None;
                }
                None => parts.push(token),
            },
            None => match token.strip_prefix('"') {
                Some(rest) => match rest.strip_suffix('"') {
                    Some(inner) => terms.push(inner.to_string()),
                    None => phrase = Some(vec![rest]),
                },
                None => terms.push(token.to_string()),
            },
        }
    }
    if let Some(parts) = phrase {
        terms.push(parts.join(" "));
    }

    terms
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Per-query options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryOptions {
    #[serde(default)]
    pub parse_mode: ParseMode,
    #[serde(default)]
    pub conjunction: Conjunction,
    #[serde(default)]
    pub offset: Option<usize>,
    #[serde(default)]
    pub limit: Option<usize>,
    /// Restrict results to these languages (plus `und`). Empty means any.
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub search_id: Option<String>,
    #[serde(default)]
    pub bypass_access: bool,
    #[serde(default)]
    pub access_account: Option<Account>,
    #[serde(default)]
    pub extra: BTreeMap<String, Json>,
}

/// One search request against an [`Index`].
#[derive(Clone)]
pub struct Query {
    index: Arc<Index>,
    keys: Option<Keys>,
    original_keys: Option<String>,
    fields: Option<Vec<String>>,
    condition_group: ConditionGroup,
    sorts: Vec<(String, SortOrder)>,
    options: QueryOptions,
    pre_executed: bool,
    aborted: Option<String>,
    ignored: Vec<String>,
    warnings: Vec<String>,
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("index", &self.index.id())
            .field("keys", &self.keys)
            .field("fields", &self.fields)
            .field("condition_group", &self.condition_group)
            .field("sorts", &self.sorts)
            .field("options", &self.options)
            .field("pre_executed", &self.pre_executed)
            .field("aborted", &self.aborted)
            .finish()
    }
}

impl Query {
    pub fn new(index: Arc<Index>, options: QueryOptions) -> Self {
        Self {
            index,
            keys: None,
            original_keys: None,
            fields: None,
            condition_group: ConditionGroup::new(Conjunction::And),
            sorts: Vec::new(),
            options,
            pre_executed: false,
            aborted: None,
            ignored: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn index(&self) -> &Arc<Index> {
        &self.index
    }

    /// Set the search keys. `None` clears them, making this a filter-only
    /// query.
    pub fn keys(&mut self, raw: Option<&str>) -> &mut Self {
        self.original_keys = raw.map(str::to_string);
        self.keys = raw.map(|r| parse_keys(r, self.options.parse_mode, self.options.conjunction));
        self
    }

    /// Replace the parsed keys directly, keeping `original_keys`.
    pub fn set_keys(&mut self, keys: Option<Keys>) -> &mut Self {
        self.keys = keys;
        self
    }

    /// Change the parse mode, re-parsing keys that were already set.
    pub fn set_parse_mode(&mut self, mode: ParseMode) -> &mut Self {
        self.options.parse_mode = mode;
        if let Some(raw) = self.original_keys.clone() {
            self.keys(Some(&raw));
        }
        self
    }

    /// Restrict the fulltext fields searched.
    pub fn fields(&mut self, fields: Vec<String>) -> Result<&mut Self> {
        let fulltext = self.index.fulltext_fields();
        for field in &fields {
            if !fulltext.contains(field) {
                return Err(Error::invalid_query(format!(
                    "trying to search on field '{}' which is no indexed fulltext field",
                    field
                )));
            }
        }
        self.fields = Some(fields);
        Ok(self)
    }

    pub fn sort(&mut self, field: &str, order: &str) -> Result<&mut Self> {
        if field != RELEVANCE_FIELD && field != ID_FIELD {
            let field_type = self.index.field_type(field).ok_or_else(|| {
                Error::invalid_query(format!("trying to sort on unknown field '{}'", field))
            })?;
            if field_type.is_list() {
                return Err(Error::invalid_query(format!(
                    "trying to sort on multi-valued field '{}'",
                    field
                )));
            }
            if field_type.is_text() {
                return Err(Error::invalid_query(format!(
                    "trying to sort on fulltext field '{}'",
                    field
                )));
            }
        }

        let order = SortOrder::normalize(order);
        match self.sorts.iter_mut().find(|(name, _)| name == field) {
            Some(existing) => existing.1 = order,
            None => self.sorts.push((field.to_string(), order)),
        }
        Ok(self)
    }

    pub fn range(&mut self, offset: Option<usize>, limit: Option<usize>) -> &mut Self {
        self.options.offset = offset;
        self.options.limit = limit;
        self
    }

    pub fn condition(
        &mut self,
        field: impl Into<String>,
        value: impl Into<Value>,
        operator: Operator,
    ) -> &mut Self {
        self.condition_group.condition(field, value, operator);
        self
    }

    pub fn filter(&mut self, group: ConditionGroup) -> &mut Self {
        self.condition_group.filter(group);
        self
    }

    /// Add `group` as a restriction every result must satisfy, whatever
    /// the conjunction of the existing tree.
    pub fn restrict(&mut self, group: ConditionGroup) -> &mut Self {
        self.and_root().filter(group);
        self
    }

    /// Root group with an AND conjunction; an OR root moves one level down.
    fn and_root(&mut self) -> &mut ConditionGroup {
        if self.condition_group.conjunction == Conjunction::Or {
            let previous = std::mem::take(&mut self.condition_group);
            self.condition_group = ConditionGroup::new(Conjunction::And);
            self.condition_group.filter(previous);
        }
        &mut self.condition_group
    }

    /// Abort the query; `execute` will skip the backend and return an
    /// empty result set carrying `message` as warning.
    pub fn abort(&mut self, message: impl Into<String>) {
        let message = message.into();
        debug!(index = %self.index.id(), %message, "query aborted");
        self.aborted = Some(message);
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.is_some()
    }

    pub fn abort_message(&self) -> Option<&str> {
        self.aborted.as_deref()
    }

    pub fn parsed_keys(&self) -> Option<&Keys> {
        self.keys.as_ref()
    }

    pub fn parsed_keys_mut(&mut self) -> Option<&mut Keys> {
        self.keys.as_mut()
    }

    pub fn original_keys(&self) -> Option<&str> {
        self.original_keys.as_deref()
    }

    pub fn searched_fields(&self) -> Option<&[String]> {
        self.fields.as_deref()
    }

    pub fn condition_group(&self) -> &ConditionGroup {
        &self.condition_group
    }

    pub fn condition_group_mut(&mut self) -> &mut ConditionGroup {
        &mut self.condition_group
    }

    pub fn sorts(&self) -> &[(String, SortOrder)] {
        &self.sorts
    }

    pub fn options(&self) -> &QueryOptions {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut QueryOptions {
        &mut self.options
    }

    pub fn is_pre_executed(&self) -> bool {
        self.pre_executed
    }

    /// Record a search key a processor dropped.
    pub fn add_ignored(&mut self, key: impl Into<String>) {
        let key = key.into();
        if !self.ignored.contains(&key) {
            self.ignored.push(key);
        }
    }

    pub fn ignored(&self) -> &[String] {
        &self.ignored
    }

    pub fn add_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    /// Prepare the query for execution. Runs once; later calls are no-ops.
    pub fn pre_execute(&mut self) -> Result<()> {
        if self.pre_executed {
            return Ok(());
        }
        self.pre_executed = true;

        if !self.options.languages.is_empty() {
            let languages = self.options.languages.clone();
            self.add_languages(&languages)?;
        }

        if self.fields.is_none() {
            self.fields = Some(self.index.fulltext_fields());
        }

        let index = Arc::clone(&self.index);
        for processor in index.processors_for_stage(Stage::PreprocessQuery) {
            processor.preprocess_search_query(self)?;
        }
        for alter in index.query_alters() {
            alter(self)?;
        }
        Ok(())
    }

    /// Restrict results to `languages` plus the language-neutral `und`.
    ///
    /// Languages already filtered on by `=` conditions in the AND-joined
    /// part of the tree are not added again. A filter on a language
    /// outside the requested set makes the query unsatisfiable.
    pub fn add_languages(&mut self, languages: &[String]) -> Result<()> {
        let mut requested: BTreeSet<String> = languages.iter().cloned().collect();
        requested.insert(LANGUAGE_NONE.to_string());
        let to_add = self.languages_to_add(&requested)?;
        if to_add.is_empty() {
            return Ok(());
        }

        if to_add.len() == 1 {
            if let Some(lang) = to_add.into_iter().next() {
                self.and_root().condition(LANGUAGE_FIELD, lang, Operator::Eq);
            }
        } else {
            let mut group = ConditionGroup::new(Conjunction::Or).with_tag("language");
            for lang in to_add {
                group.condition(LANGUAGE_FIELD, lang, Operator::Eq);
            }
            self.restrict(group);
        }
        Ok(())
    }

    fn languages_to_add(&self, requested: &BTreeSet<String>) -> Result<BTreeSet<String>> {
        let mut to_add = requested.clone();
        let mut queue: VecDeque<&ConditionNode> = VecDeque::new();
        if self.condition_group.conjunction == Conjunction::And {
            queue.extend(self.condition_group.conditions.iter());
        }
        while !to_add.is_empty() {
            let Some(node) = queue.pop_front() else { break };
            match node {
                ConditionNode::Condition(c) => {
                    if c.field != LANGUAGE_FIELD || c.operator != Operator::Eq {
                        continue;
                    }
                    let lang = c.value.to_text();
                    if !requested.contains(&lang) {
                        return Err(Error::invalid_query(
                            "impossible combination of filters and languages",
                        ));
                    }
                    to_add.remove(&lang);
                }
                ConditionNode::Group(g) if g.conjunction == Conjunction::And => {
                    queue.extend(g.conditions.iter());
                }
                ConditionNode::Group(_) => {}
            }
        }
        Ok(to_add)
    }

    /// Run the query against the index's backend.
    ///
    /// Calling this again re-dispatches a fresh search; preprocessing is
    /// not repeated.
    pub async fn execute(&mut self) -> Result<ResultSet> {
        let start = Instant::now();
        self.pre_execute()?;
        let preprocessing = start.elapsed().as_secs_f64();

        let mut results = match &self.aborted {
            Some(message) => {
                let mut empty = ResultSet::default();
                empty.add_warning(message.clone());
                empty
            }
            None => {
                let backend = Arc::clone(self.index.backend());
                backend.search(self).await?
            }
        };

        let post_start = Instant::now();
        if self.aborted.is_none() {
            self.post_execute(&mut results);
        }
        let postprocessing = post_start.elapsed().as_secs_f64();

        for key in &self.ignored {
            results.add_ignored(key.clone());
        }
        for warning in &self.warnings {
            results.add_warning(warning.clone());
        }
        if !results.ignored.is_empty() {
            warn!(
                index = %self.index.id(),
                ignored = ?results.ignored,
                "search keys ignored"
            );
        }

        results.performance.preprocessing = preprocessing;
        results.performance.postprocessing = postprocessing;
        results.performance.processing = preprocessing + postprocessing;
        results.performance.complete = start.elapsed().as_secs_f64();
        Ok(results)
    }

    /// Run the `postprocess_query` stage over `results`.
    pub fn post_execute(&self, results: &mut ResultSet) {
        for processor in self.index.processors_for_stage(Stage::PostprocessQuery) {
            processor.postprocess_search_results(results, self);
        }
    }

    /// Type of a field as the backend sees it, including the sort pseudo
    /// fields.
    pub fn field_type(&self, field: &str) -> Option<FieldType> {
        match field {
            RELEVANCE_FIELD => Some(FieldType::Decimal),
            ID_FIELD => Some(FieldType::String),
            other => self.index.field_type(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    fn terms(keys: &Keys) -> Vec<String> {
        match keys {
            Keys::Parsed(g) => g.all_terms().into_iter().map(str::to_string).collect(),
            Keys::Direct(raw) => vec![raw.clone()],
        }
    }

    #[test]
    fn terms_mode_keeps_quoted_phrases_together() {
        let keys = parse_keys("\"bar baz\" foo", ParseMode::Terms, Conjunction::And);
        assert_eq!(terms(&keys), vec!["bar baz", "foo"]);
        match keys {
            Keys::Parsed(g) => assert_eq!(g.conjunction, Conjunction::And),
            other => panic!("unexpected keys {:?}", other),
        }
    }

    #[test]
    fn terms_mode_collapses_whitespace_and_closes_open_quotes() {
        let keys = parse_keys("  a   \"b  c   d ", ParseMode::Terms, Conjunction::Or);
        assert_eq!(terms(&keys), vec!["a", "b c d"]);
        let keys = parse_keys("\"\" x \"y\"", ParseMode::Terms, Conjunction::Or);
        assert_eq!(terms(&keys), vec!["x", "y"]);
    }

    #[test]
    fn single_and_direct_modes() {
        let keys = parse_keys(" foo bar ", ParseMode::Single, Conjunction::And);
        assert_eq!(terms(&keys), vec!["foo bar"]);
        let keys = parse_keys("title:foo", ParseMode::Direct, Conjunction::And);
        assert_eq!(keys, Keys::Direct("title:foo".into()));
    }

    #[test]
    fn fields_must_be_indexed_fulltext() {
        let index = testing::index(vec![]);
        let mut query = Query::new(index, QueryOptions::default());
        assert!(query.fields(vec!["title".into()]).is_ok());
        let err = query.fields(vec!["views".into()]).unwrap_err();
        assert!(matches!(err, Error::InvalidQuery(_)));
        assert!(query.fields(vec!["nope".into()]).is_err());
    }

    #[test]
    fn sort_rejects_text_list_and_unknown_fields() {
        let index = testing::index(vec![]);
        let mut query = Query::new(index, QueryOptions::default());
        assert!(query.sort("views", "desc").is_ok());
        assert!(query.sort(RELEVANCE_FIELD, "whatever").is_ok());
        assert!(query.sort("title", "ASC").is_err());
        assert!(query.sort("tags", "ASC").is_err());
        assert!(query.sort("missing", "ASC").is_err());
        assert_eq!(
            query.sorts(),
            &[
                ("views".to_string(), SortOrder::Desc),
                (RELEVANCE_FIELD.to_string(), SortOrder::Asc)
            ]
        );
    }

    #[test]
    fn languages_are_added_once_with_und() {
        let index = testing::index(vec![]);
        let mut query = Query::new(
            index,
            QueryOptions {
                languages: vec!["en".into()],
                ..QueryOptions::default()
            },
        );
        query.pre_execute().unwrap();
        query.pre_execute().unwrap();

        let groups: Vec<_> = query
            .condition_group()
            .conditions
            .iter()
            .filter(|n| matches!(n, ConditionNode::Group(g) if g.has_tag("language")))
            .collect();
        assert_eq!(groups.len(), 1);
        match groups[0] {
            ConditionNode::Group(g) => assert_eq!(g.conditions.len(), 2),
            other => panic!("unexpected node {:?}", other),
        }
        assert_eq!(query.searched_fields(), Some(&["body".to_string(), "title".to_string()][..]));
    }

    #[test]
    fn existing_language_filter_is_respected() {
        let index = testing::index(vec![]);
        let mut query = Query::new(index, QueryOptions::default());
        query.condition(LANGUAGE_FIELD, "en", Operator::Eq);
        query.add_languages(&["en".to_string()]).unwrap();
        // only `und` was left to add
        assert_eq!(query.condition_group().conditions.len(), 2);

        let index = testing::index(vec![]);
        let mut query = Query::new(index, QueryOptions::default());
        let mut nested = ConditionGroup::new(Conjunction::And);
        nested.condition(LANGUAGE_FIELD, "de", Operator::Eq);
        query.filter(nested);
        let err = query.add_languages(&["en".to_string()]).unwrap_err();
        assert!(err.to_string().contains("impossible combination"));
    }

    #[test]
    fn restrictions_apply_to_the_whole_or_tree() {
        let index = testing::index(vec![]);
        let mut query = Query::new(index, QueryOptions::default());
        query.condition_group_mut().set_conjunction("OR");
        query.condition("views", 5i64, Operator::Eq);
        query.condition("views", 2i64, Operator::Eq);

        let mut only_docs = ConditionGroup::new(Conjunction::Or).with_tag("scope");
        only_docs.condition("tags", "rust", Operator::Eq);
        query.restrict(only_docs);

        let root = query.condition_group();
        assert_eq!(root.conjunction, Conjunction::And);
        assert_eq!(root.conditions.len(), 2);
        match &root.conditions[0] {
            ConditionNode::Group(previous) => {
                assert_eq!(previous.conjunction, Conjunction::Or);
                assert_eq!(previous.conditions.len(), 2);
            }
            other => panic!("unexpected node {:?}", other),
        }
        assert!(root.find_tagged("scope").is_some());
    }

    #[tokio::test]
    async fn aborted_query_skips_backend() {
        let index = testing::index(vec![]);
        testing::index_everything(&index).await;
        let mut query = Query::new(index, QueryOptions::default());
        query.keys(Some("rust"));
        query.abort("nothing to see");
        let results = query.execute().await.unwrap();
        assert_eq!(results.result_count, 0);
        assert_eq!(results.warnings, vec!["nothing to see".to_string()]);
    }

    #[tokio::test]
    async fn execute_twice_searches_twice_without_repeating_preprocessing() {
        let index = testing::index(vec![]);
        testing::index_everything(&index).await;
        let mut query = Query::new(
            index,
            QueryOptions {
                languages: vec!["en".into()],
                ..QueryOptions::default()
            },
        );
        query.keys(Some("rust"));
        let first = query.execute().await.unwrap();
        let second = query.execute().await.unwrap();
        assert_eq!(first.ids(), second.ids());
        assert_eq!(query.condition_group().conditions.len(), 1);
        assert!(first.performance.complete >= first.performance.processing);
    }
}
