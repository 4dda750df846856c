//! Shared machinery for processors that transform values field by field.
//!
//! A [`FieldTransform`] only says how one scalar value changes.
//! [`FieldProcessor`] applies it consistently to indexed field values,
//! search keys and filter values, honoring the `fields` allow-list.

use std::collections::BTreeSet;

use crate::condition::{ConditionGroup, ConditionNode};
use crate::error::Result;
use crate::field::{FieldType, Token, Value};
use crate::index::Index;
use crate::item::{ItemMap, COMPUTED_PREFIX};
use crate::query::{Key, KeyGroup, Keys, Query};

use super::{Processor, ProcessorConfig, Stage};

pub trait FieldTransform: Send + Sync {
    /// Default field selection when no `fields` allow-list is configured.
    /// Receives the innermost (non-list) type.
    fn test_type(&self, field_type: &FieldType) -> bool {
        matches!(field_type, FieldType::Text | FieldType::Tokens)
    }

    /// Transform one scalar value in place. May turn it into
    /// [`Value::Tokens`].
    fn process_field_value(&self, value: &mut Value);

    /// Transform one search key. By default the key goes through
    /// [`process_field_value`](Self::process_field_value); a key turning
    /// into several tokens becomes an AND group of terms.
    fn process_key(&self, key: &mut Key) {
        let Key::Term(term) = key else { return };
        let mut value = Value::String(std::mem::take(term));
        self.process_field_value(&mut value);
        *key = key_from_value(value);
    }

    fn process_filter_value(&self, value: &mut Value) {
        self.process_field_value(value);
    }
}

fn key_from_value(value: Value) -> Key {
    match value {
        Value::Tokens(_) | Value::List(_) => {
            let terms: Vec<String> = normalize_tokens(value)
                .into_iter()
                .map(|t| t.value.to_text())
                .filter(|t| !t.is_empty())
                .collect();
            match terms.len() {
                0 => Key::Term(String::new()),
                1 => Key::Term(terms.into_iter().next().unwrap_or_default()),
                _ => Key::Group(KeyGroup::terms(Default::default(), terms)),
            }
        }
        other => Key::Term(other.to_text()),
    }
}

fn key_is_empty(key: &Key) -> bool {
    match key {
        Key::Term(t) => t.is_empty(),
        Key::Group(g) => g.is_empty(),
    }
}

/// Flatten nested token arrays into one list, multiplying scores through
/// the nesting and dropping empty tokens.
pub fn normalize_tokens(value: Value) -> Vec<Token> {
    let mut out = Vec::new();
    flatten_into(value, 1.0, &mut out);
    out
}

fn flatten_into(value: Value, score: f64, out: &mut Vec<Token>) {
    match value {
        Value::Tokens(tokens) => {
            for token in tokens {
                flatten_into(token.value, score * token.score, out);
            }
        }
        Value::List(values) => {
            for v in values {
                flatten_into(v, score, out);
            }
        }
        other => {
            if !other.is_empty() {
                out.push(Token { value: other, score });
            }
        }
    }
}

/// Run `transform` over one field value of type `field_type`, updating
/// both.
///
/// List elements are processed individually; if any of them is promoted
/// to tokens, all of them are, so the list stays homogeneous. Array-shaped
/// results are normalized to tokens for fulltext types and space-joined
/// into a string for everything else.
pub fn process_field<T: FieldTransform + ?Sized>(
    transform: &T,
    value: &mut Value,
    field_type: &mut FieldType,
) {
    if matches!(value, Value::Null) || value.as_str() == Some("") {
        return;
    }

    match field_type {
        FieldType::List(inner) => {
            let Value::List(items) = &mut *value else {
                process_field(transform, value, inner.as_mut());
                return;
            };
            let mut types = Vec::with_capacity(items.len());
            for item in items.iter_mut() {
                let mut item_type = inner.as_ref().clone();
                process_field(transform, item, &mut item_type);
                types.push(item_type);
            }
            if types.iter().any(|t| *t == FieldType::Tokens) {
                for (item, item_type) in items.iter_mut().zip(&types) {
                    if *item_type != FieldType::Tokens && !item.is_empty() {
                        let scalar = std::mem::take(item);
                        *item = Value::Tokens(vec![Token::new(scalar, 1.0)]);
                    }
                }
                **inner = FieldType::Tokens;
            } else if let Some(first) = types.into_iter().next() {
                **inner = first;
            }
            return;
        }
        FieldType::Tokens => {
            if let Value::Tokens(tokens) = &mut *value {
                for token in tokens.iter_mut() {
                    transform.process_field_value(&mut token.value);
                }
            } else {
                transform.process_field_value(value);
            }
        }
        _ => transform.process_field_value(value),
    }

    if value.is_array() {
        if field_type.is_text() {
            let tokens = normalize_tokens(std::mem::take(value));
            *value = Value::Tokens(tokens);
            *field_type = FieldType::Tokens;
        } else {
            *value = Value::String(value.to_text());
        }
    }
}

/// A [`Processor`] built from a [`FieldTransform`].
pub struct FieldProcessor<T> {
    id: String,
    fields: Option<BTreeSet<String>>,
    transform: T,
}

impl<T: FieldTransform> FieldProcessor<T> {
    pub fn new(config: &ProcessorConfig, transform: T) -> Result<Self> {
        Ok(Self {
            id: config.id.clone(),
            fields: config.settings().field_allow_list()?,
            transform,
        })
    }

    pub fn transform(&self) -> &T {
        &self.transform
    }

    /// Whether the field `name` of type `field_type` is processed.
    ///
    /// Without an allow-list, computed fields (`_` prefix: language,
    /// datasource, access grants) are left alone so their stored values
    /// keep matching the conditions other processors add for them. Listing
    /// such a field in `fields` opts it in.
    pub fn test_field(&self, name: &str, field_type: &FieldType) -> bool {
        match &self.fields {
            Some(allowed) => allowed.contains(name),
            None => {
                !name.starts_with(COMPUTED_PREFIX) && self.transform.test_type(field_type.inner())
            }
        }
    }

    fn process_keys(&self, group: &mut KeyGroup, ignored: &mut Vec<String>) {
        let keys = std::mem::take(&mut group.keys);
        for mut key in keys {
            match &mut key {
                Key::Group(nested) => {
                    self.process_keys(nested, ignored);
                }
                Key::Term(term) => {
                    let original = term.clone();
                    self.transform.process_key(&mut key);
                    if key_is_empty(&key) {
                        ignored.push(original);
                    }
                }
            }
            if !key_is_empty(&key) {
                group.keys.push(key);
            }
        }
    }

    fn process_filters(&self, group: &mut ConditionGroup, index: &Index) {
        group.conditions.retain_mut(|node| match node {
            ConditionNode::Group(nested) => {
                self.process_filters(nested, index);
                true
            }
            ConditionNode::Condition(condition) => {
                let Some(field_type) = index.field_type(&condition.field) else {
                    return true;
                };
                if !self.test_field(&condition.field, &field_type) {
                    return true;
                }
                let was_empty = condition.value.as_str() == Some("");
                match &mut condition.value {
                    Value::List(values) => {
                        for v in values.iter_mut() {
                            self.process_filter_scalar(v);
                        }
                    }
                    scalar => self.process_filter_scalar(scalar),
                }
                // a filter value processed away would match nothing
                was_empty || condition.value.as_str() != Some("")
            }
        });
    }

    fn process_filter_scalar(&self, value: &mut Value) {
        if value.is_null() {
            return;
        }
        self.transform.process_filter_value(value);
        if value.is_array() {
            *value = Value::String(value.to_text());
        }
    }
}

impl<T: FieldTransform> Processor for FieldProcessor<T> {
    fn id(&self) -> &str {
        &self.id
    }

    fn stages(&self) -> &'static [Stage] {
        &[Stage::PreprocessIndex, Stage::PreprocessQuery]
    }

    fn preprocess_index_items(&self, _index: &Index, items: &mut ItemMap) -> Result<()> {
        for item in items.values_mut() {
            for (name, field) in item.fields.iter_mut() {
                if self.test_field(name, &field.field_type) {
                    process_field(&self.transform, &mut field.value, &mut field.field_type);
                }
            }
        }
        Ok(())
    }

    fn preprocess_search_query(&self, query: &mut Query) -> Result<()> {
        let index = std::sync::Arc::clone(query.index());
        let searched: Vec<String> = match query.searched_fields() {
            Some(fields) => fields.to_vec(),
            None => index.fulltext_fields(),
        };
        let keys_affected = searched.iter().any(|name| {
            index
                .field_type(name)
                .is_some_and(|t| self.test_field(name, &t))
        });

        if keys_affected {
            let mut ignored = Vec::new();
            match query.parsed_keys_mut() {
                Some(Keys::Parsed(group)) => self.process_keys(group, &mut ignored),
                Some(Keys::Direct(raw)) => {
                    let mut value = Value::String(std::mem::take(raw));
                    self.transform.process_field_value(&mut value);
                    *raw = value.to_text();
                }
                None => {}
            }
            for key in ignored {
                query.add_ignored(key);
            }
        }

        self.process_filters(query.condition_group_mut(), &index);
        Ok(())
    }
}
