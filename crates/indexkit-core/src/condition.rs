//! Boolean filter trees.
//!
//! A [`ConditionGroup`] joins its direct children with a single
//! [`Conjunction`]; nesting groups is the only way to mix AND and OR.
//! Groups can carry tags so a processor can find and remove the
//! sub-filters it added (e.g. `language`, `access`) without inspecting
//! their contents.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::field::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Conjunction {
    #[default]
    And,
    Or,
}

impl Conjunction {
    /// `OR` (any case) is OR; anything else is AND.
    pub fn normalize(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("or") {
            Conjunction::Or
        } else {
            Conjunction::And
        }
    }
}

impl fmt::Display for Conjunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Conjunction::And => f.write_str("AND"),
            Conjunction::Or => f.write_str("OR"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Operator {
    #[default]
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "<>")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "IN")]
    In,
    #[serde(rename = "NOT IN")]
    NotIn,
    #[serde(rename = "BETWEEN")]
    Between,
    #[serde(rename = "NOT BETWEEN")]
    NotBetween,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "<>",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::In => "IN",
            Operator::NotIn => "NOT IN",
            Operator::Between => "BETWEEN",
            Operator::NotBetween => "NOT BETWEEN",
        }
    }

    /// Operators whose value must be a list.
    pub fn takes_list(&self) -> bool {
        matches!(
            self,
            Operator::In | Operator::NotIn | Operator::Between | Operator::NotBetween
        )
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.split_whitespace().collect::<Vec<_>>().join(" ");
        match normalized.to_ascii_uppercase().as_str() {
            "=" | "==" => Ok(Operator::Eq),
            "<>" | "!=" => Ok(Operator::Ne),
            "<" => Ok(Operator::Lt),
            "<=" => Ok(Operator::Le),
            ">" => Ok(Operator::Gt),
            ">=" => Ok(Operator::Ge),
            "IN" => Ok(Operator::In),
            "NOT IN" => Ok(Operator::NotIn),
            "BETWEEN" => Ok(Operator::Between),
            "NOT BETWEEN" => Ok(Operator::NotBetween),
            _ => Err(Error::invalid_query(format!("unknown operator '{}'", s))),
        }
    }
}

/// A leaf `(field, value, operator)` triple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub value: Value,
    #[serde(default)]
    pub operator: Operator,
}

impl Condition {
    pub fn new(field: impl Into<String>, value: impl Into<Value>, operator: Operator) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
            operator,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionNode {
    Condition(Condition),
    Group(ConditionGroup),
}

/// Ordered list of conditions and nested groups joined by one conjunction.
///
/// `Clone` is deep: a cloned tree shares no state with its original.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConditionGroup {
    #[serde(default)]
    pub conjunction: Conjunction,
    #[serde(default)]
    pub conditions: Vec<ConditionNode>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
}

impl ConditionGroup {
    pub fn new(conjunction: Conjunction) -> Self {
        Self {
            conjunction,
            ..Self::default()
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn condition(
        &mut self,
        field: impl Into<String>,
        value: impl Into<Value>,
        operator: Operator,
    ) -> &mut Self {
        self.conditions
            .push(ConditionNode::Condition(Condition::new(field, value, operator)));
        self
    }

    pub fn filter(&mut self, group: ConditionGroup) -> &mut Self {
        self.conditions.push(ConditionNode::Group(group));
        self
    }

    /// Live, mutable list of direct children.
    pub fn conditions_mut(&mut self) -> &mut Vec<ConditionNode> {
        &mut self.conditions
    }

    pub fn set_conjunction(&mut self, raw: &str) -> &mut Self {
        self.conjunction = Conjunction::normalize(raw);
        self
    }

    pub fn add_tag(&mut self, tag: impl Into<String>) {
        self.tags.insert(tag.into());
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Depth-first search for a nested group carrying `tag`.
    pub fn find_tagged(&self, tag: &str) -> Option<&ConditionGroup> {
        if self.has_tag(tag) {
            return Some(self);
        }
        self.conditions.iter().find_map(|node| match node {
            ConditionNode::Group(g) => g.find_tagged(tag),
            ConditionNode::Condition(_) => None,
        })
    }

    /// Remove every nested group carrying `tag`. Returns how many were removed.
    pub fn remove_tagged(&mut self, tag: &str) -> usize {
        let before = self.conditions.len();
        self.conditions
            .retain(|node| !matches!(node, ConditionNode::Group(g) if g.has_tag(tag)));
        let mut removed = before - self.conditions.len();
        for node in &mut self.conditions {
            if let ConditionNode::Group(g) = node {
                removed += g.remove_tagged(tag);
            }
        }
        removed
    }

    /// Visit every leaf condition, depth first.
    pub fn for_each_condition_mut(&mut self, f: &mut dyn FnMut(&mut Condition)) {
        for node in &mut self.conditions {
            match node {
                ConditionNode::Condition(c) => f(c),
                ConditionNode::Group(g) => g.for_each_condition_mut(f),
            }
        }
    }
}
