//! Brute-force query evaluation over stored items.
//!
//! Used by the reference backends. Matching is word based: field text is
//! split into lowercase words (or taken from tokens as-is) and a key
//! matches when its words occur consecutively in a searched field. The
//! score of a match is the token score times the field boost.

use std::cmp::Ordering;

use crate::condition::{Condition, ConditionGroup, ConditionNode, Conjunction, Operator};
use crate::field::Value;
use crate::index::{ID_FIELD, RELEVANCE_FIELD};
use crate::item::Item;
use crate::query::{Key, KeyGroup, Keys, Query, SortOrder};
use crate::results::ResultSet;

fn split_words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// The words of one field value with their scores.
fn field_words(value: &Value) -> Vec<(String, f64)> {
    match value {
        Value::Tokens(tokens) => tokens
            .iter()
            .flat_map(|t| {
                split_words(&t.value.to_text())
                    .into_iter()
                    .map(move |w| (w, t.score))
            })
            .collect(),
        Value::List(values) => values.iter().flat_map(field_words).collect(),
        other => split_words(&other.to_text())
            .into_iter()
            .map(|w| (w, 1.0))
            .collect(),
    }
}

struct SearchText {
    fields: Vec<(Vec<(String, f64)>, f64)>,
}

impl SearchText {
    fn new(item: &Item, fields: &[String], query: &Query) -> Self {
        let index = query.index();
        Self {
            fields: fields
                .iter()
                .filter_map(|name| {
                    item.field(name)
                        .map(|f| (field_words(&f.value), index.field_boost(name)))
                })
                .collect(),
        }
    }

    /// Summed score of every occurrence of `term`, `None` if absent.
    fn term_score(&self, term: &str) -> Option<f64> {
        let needle = split_words(term);
        if needle.is_empty() {
            return Some(0.0);
        }
        let mut total = 0.0;
        let mut found = false;
        for (words, boost) in &self.fields {
            if words.len() < needle.len() {
                continue;
            }
            for window in words.windows(needle.len()) {
                if window.iter().zip(&needle).all(|((w, _), n)| w == n) {
                    found = true;
                    let score = window.iter().map(|(_, s)| s).sum::<f64>() / needle.len() as f64;
                    total += score * boost;
                }
            }
        }
        found.then_some(total)
    }

    fn group_score(&self, group: &KeyGroup) -> Option<f64> {
        if group.keys.is_empty() {
            return Some(0.0);
        }
        let scores = group.keys.iter().map(|key| match key {
            Key::Term(term) => self.term_score(term),
            Key::Group(nested) => self.group_score(nested),
        });
        let combined = match group.conjunction {
            Conjunction::And => scores.sum::<Option<f64>>(),
            Conjunction::Or => {
                let matched: Vec<f64> = scores.flatten().collect();
                (!matched.is_empty()).then(|| matched.iter().sum())
            }
        };
        if group.negation {
            match combined {
                Some(_) => None,
                None => Some(0.0),
            }
        } else {
            combined
        }
    }

    fn score(&self, keys: &Keys) -> Option<f64> {
        match keys {
            Keys::Parsed(group) => self.group_score(group),
            Keys::Direct(raw) => {
                let group = KeyGroup::terms(
                    Conjunction::And,
                    raw.split_whitespace().map(str::to_string),
                );
                self.group_score(&group)
            }
        }
    }
}

/// Scalar members of a stored value; tokens count by their text.
fn members(value: &Value) -> Vec<Value> {
    match value {
        Value::Null => Vec::new(),
        Value::List(values) => values.iter().flat_map(members).collect(),
        Value::Tokens(tokens) => tokens.iter().flat_map(|t| members(&t.value)).collect(),
        other => vec![other.clone()],
    }
}

fn equal(a: &Value, b: &Value) -> bool {
    a.compare(b) == Some(Ordering::Equal)
}

pub fn condition_matches(item: &Item, condition: &Condition) -> bool {
    let stored = match condition.field.as_str() {
        ID_FIELD => vec![Value::String(item.id.clone())],
        field => members(item.field_value(field)),
    };
    let wanted = &condition.value;
    let wanted_list = members(wanted);

    match condition.operator {
        Operator::Eq if wanted.is_null() => stored.is_empty(),
        Operator::Ne if wanted.is_null() => !stored.is_empty(),
        Operator::Eq => stored.iter().any(|v| equal(v, wanted)),
        Operator::Ne => !stored.iter().any(|v| equal(v, wanted)),
        Operator::Lt => stored
            .iter()
            .any(|v| v.compare(wanted) == Some(Ordering::Less)),
        Operator::Le => stored.iter().any(|v| {
            matches!(v.compare(wanted), Some(Ordering::Less | Ordering::Equal))
        }),
        Operator::Gt => stored
            .iter()
            .any(|v| v.compare(wanted) == Some(Ordering::Greater)),
        Operator::Ge => stored.iter().any(|v| {
            matches!(v.compare(wanted), Some(Ordering::Greater | Ordering::Equal))
        }),
        Operator::In => stored
            .iter()
            .any(|v| wanted_list.iter().any(|w| equal(v, w))),
        Operator::NotIn => !stored
            .iter()
            .any(|v| wanted_list.iter().any(|w| equal(v, w))),
        Operator::Between | Operator::NotBetween => {
            let inside = match wanted_list.as_slice() {
                [low, high] => stored.iter().any(|v| {
                    matches!(v.compare(low), Some(Ordering::Greater | Ordering::Equal))
                        && matches!(v.compare(high), Some(Ordering::Less | Ordering::Equal))
                }),
                _ => false,
            };
            inside == (condition.operator == Operator::Between)
        }
    }
}

pub fn group_matches(item: &Item, group: &ConditionGroup) -> bool {
    let mut results = group.conditions.iter().map(|node| match node {
        ConditionNode::Condition(c) => condition_matches(item, c),
        ConditionNode::Group(g) => group_matches(item, g),
    });
    match group.conjunction {
        Conjunction::And => results.all(|m| m),
        Conjunction::Or => group.conditions.is_empty() || results.any(|m| m),
    }
}

fn sort_value(item: &Item, score: f64, field: &str) -> Value {
    match field {
        RELEVANCE_FIELD => Value::Decimal(score),
        ID_FIELD => Value::String(item.id.clone()),
        other => members(item.field_value(other))
            .into_iter()
            .next()
            .unwrap_or(Value::Null),
    }
}

fn compare_hits(a: (&Item, f64), b: (&Item, f64), sorts: &[(String, SortOrder)]) -> Ordering {
    for (field, order) in sorts {
        let left = sort_value(a.0, a.1, field);
        let right = sort_value(b.0, b.1, field);
        let ordering = match (left.is_null(), right.is_null()) {
            (true, true) => Ordering::Equal,
            // nulls last in either direction
            (true, false) => return Ordering::Greater,
            (false, true) => return Ordering::Less,
            (false, false) => left.compare(&right).unwrap_or(Ordering::Equal),
        };
        let ordering = match order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Evaluate `query` over `items`, applying filters, keys, sort and range.
pub fn evaluate<'a>(query: &Query, items: impl IntoIterator<Item = &'a Item>) -> ResultSet {
    let fields: Vec<String> = match query.searched_fields() {
        Some(fields) => fields.to_vec(),
        None => query.index().fulltext_fields(),
    };

    let mut hits: Vec<(&Item, f64)> = Vec::new();
    for item in items {
        if !group_matches(item, query.condition_group()) {
            continue;
        }
        let score = match query.parsed_keys() {
            None => 1.0,
            Some(keys) => match SearchText::new(item, &fields, query).score(keys) {
                Some(score) => score,
                None => continue,
            },
        };
        hits.push((item, score));
    }

    let mut sorts = query.sorts().to_vec();
    if sorts.is_empty() && query.parsed_keys().is_some() {
        sorts.push((RELEVANCE_FIELD.to_string(), SortOrder::Desc));
    }
    hits.sort_by(|a, b| compare_hits(*a, *b, &sorts));

    let result_count = hits.len();
    let offset = query.options().offset.unwrap_or(0);
    let limit = query.options().limit.unwrap_or(usize::MAX);
    let results = hits
        .into_iter()
        .skip(offset)
        .take(limit)
        .map(|(item, score)| {
            let mut result = item.clone();
            result.source = None;
            result.score = Some(score);
            result
        })
        .collect();

    ResultSet {
        result_count,
        results,
        ..ResultSet::default()
    }
}
