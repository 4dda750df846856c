//! Field types, values and extracted fields.
//!
//! A [`Field`] is one named, typed piece of data extracted from a source
//! object. Processors may rewrite both its [`Value`] and its [`FieldType`]
//! (for example a tokenizer promotes `text` to `tokens`).

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::error::{Error, Result};

/// Data type of an indexed field.
///
/// Serialized as its name (`"text"`, `"list<integer>"`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FieldType {
    Text,
    String,
    Integer,
    Decimal,
    Date,
    Boolean,
    Tokens,
    List(Box<FieldType>),
}

impl FieldType {
    pub fn list_of(inner: FieldType) -> Self {
        FieldType::List(Box::new(inner))
    }

    pub fn is_list(&self) -> bool {
        matches!(self, FieldType::List(_))
    }

    /// The innermost non-list type.
    pub fn inner(&self) -> &FieldType {
        match self {
            FieldType::List(inner) => inner.inner(),
            other => other,
        }
    }

    /// Fulltext types are `text` and `tokens`, also inside lists.
    pub fn is_text(&self) -> bool {
        matches!(self.inner(), FieldType::Text | FieldType::Tokens)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self.inner(),
            FieldType::Integer | FieldType::Decimal | FieldType::Date
        )
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Text => f.write_str("text"),
            FieldType::String => f.write_str("string"),
            FieldType::Integer => f.write_str("integer"),
            FieldType::Decimal => f.write_str("decimal"),
            FieldType::Date => f.write_str("date"),
            FieldType::Boolean => f.write_str("boolean"),
            FieldType::Tokens => f.write_str("tokens"),
            FieldType::List(inner) => write!(f, "list<{}>", inner),
        }
    }
}

impl FromStr for FieldType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Some(inner) = s.strip_prefix("list<").and_then(|r| r.strip_suffix('>')) {
            return Ok(FieldType::list_of(inner.parse()?));
        }
        match s {
            "text" => Ok(FieldType::Text),
            "string" => Ok(FieldType::String),
            "integer" => Ok(FieldType::Integer),
            "decimal" => Ok(FieldType::Decimal),
            "date" => Ok(FieldType::Date),
            "boolean" => Ok(FieldType::Boolean),
            "tokens" => Ok(FieldType::Tokens),
            other => Err(Error::configuration(format!(
                "unknown field type '{}'",
                other
            ))),
        }
    }
}

impl TryFrom<String> for FieldType {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<FieldType> for String {
    fn from(t: FieldType) -> String {
        t.to_string()
    }
}

/// One weighted token of a tokenized fulltext value.
///
/// `value` is normally a string; before normalization a processor may
/// nest another [`Value::Tokens`] in it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub value: Value,
    #[serde(default = "default_score")]
    pub score: f64,
}

fn default_score() -> f64 {
    1.0
}

impl Token {
    pub fn new(value: impl Into<Value>, score: f64) -> Self {
        Self {
            value: value.into(),
            score,
        }
    }
}

/// A field or filter value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Value {
    #[default]
    Null,
    String(String),
    Integer(i64),
    Decimal(f64),
    Boolean(bool),
    /// Unix timestamp in seconds.
    Date(i64),
    Tokens(Vec<Token>),
    List(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Null, the empty string, or an empty token/value list.
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Null => true,
            Value::String(s) => s.is_empty(),
            Value::Tokens(t) => t.is_empty(),
            Value::List(v) => v.is_empty(),
            _ => false,
        }
    }

    /// Tokens and lists are array-shaped; everything else is scalar.
    pub fn is_array(&self) -> bool {
        matches!(self, Value::Tokens(_) | Value::List(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view used for comparisons across integer/decimal/date and
    /// numeric strings.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) | Value::Date(i) => Some(*i as f64),
            Value::Decimal(d) => Some(*d),
            Value::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Plain-text rendering; token and value lists are space-joined.
    pub fn to_text(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            Value::Integer(i) | Value::Date(i) => i.to_string(),
            Value::Decimal(d) => d.to_string(),
            Value::Boolean(b) => b.to_string(),
            Value::Tokens(tokens) => tokens
                .iter()
                .map(|t| t.value.to_text())
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join(" "),
            Value::List(values) => values
                .iter()
                .map(Value::to_text)
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join(" "),
        }
    }

    /// Iterate the scalar members of a list value, or the value itself.
    pub fn members(&self) -> Vec<&Value> {
        match self {
            Value::List(values) => values.iter().flat_map(Value::members).collect(),
            Value::Null => Vec::new(),
            other => vec![other],
        }
    }

    /// Compare two scalar values. Numbers compare numerically (numeric
    /// strings included), everything else by text.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            (Value::Null, _) | (_, Value::Null) => None,
            (Value::Integer(a), Value::Integer(b))
            | (Value::Date(a), Value::Date(b))
            | (Value::Integer(a), Value::Date(b))
            | (Value::Date(a), Value::Integer(b)) => Some(a.cmp(b)),
            (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.partial_cmp(&y),
                _ => Some(a.to_text().cmp(&b.to_text())),
            },
        }
    }

    /// Convert a raw JSON property value into a value of type `ty`.
    ///
    /// Values that cannot be converted become [`Value::Null`]. A non-list
    /// type given an array keeps the first element.
    pub fn from_json(json: &Json, ty: &FieldType) -> Value {
        match ty {
            FieldType::List(inner) => {
                let values: Vec<Value> = match json {
                    Json::Null => return Value::Null,
                    Json::Array(items) => items.iter().map(|v| Value::from_json(v, inner)).collect(),
                    other => vec![Value::from_json(other, inner)],
                };
                let values: Vec<Value> = values.into_iter().filter(|v| !v.is_null()).collect();
                if values.is_empty() {
                    Value::Null
                } else {
                    Value::List(values)
                }
            }
            _ => match json {
                Json::Array(items) => items
                    .first()
                    .map(|v| Value::from_json(v, ty))
                    .unwrap_or(Value::Null),
                scalar => scalar_from_json(scalar, ty),
            },
        }
    }

    /// Parse a user-supplied string as a value of type `ty`.
    pub fn parse_as(raw: &str, ty: &FieldType) -> Value {
        Value::from_json(&Json::String(raw.to_string()), ty)
    }
}

fn scalar_from_json(json: &Json, ty: &FieldType) -> Value {
    match (ty, json) {
        (_, Json::Null) | (_, Json::Object(_)) => Value::Null,
        (FieldType::Text | FieldType::String, Json::String(s)) => Value::String(s.clone()),
        (FieldType::Text | FieldType::String, other) => Value::String(other.to_string()),
        (FieldType::Tokens, Json::String(s)) => Value::Tokens(vec![Token::new(s.as_str(), 1.0)]),
        (FieldType::Tokens, other) => Value::Tokens(vec![Token::new(other.to_string(), 1.0)]),
        (FieldType::Integer, Json::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .map(Value::Integer)
            .unwrap_or(Value::Null),
        (FieldType::Integer, Json::String(s)) => s
            .trim()
            .parse()
            .map(Value::Integer)
            .unwrap_or(Value::Null),
        (FieldType::Integer, Json::Bool(b)) => Value::Integer(i64::from(*b)),
        (FieldType::Decimal, Json::Number(n)) => {
            n.as_f64().map(Value::Decimal).unwrap_or(Value::Null)
        }
        (FieldType::Decimal, Json::String(s)) => s
            .trim()
            .parse()
            .map(Value::Decimal)
            .unwrap_or(Value::Null),
        (FieldType::Decimal, Json::Bool(b)) => Value::Decimal(if *b { 1.0 } else { 0.0 }),
        (FieldType::Boolean, Json::Bool(b)) => Value::Boolean(*b),
        (FieldType::Boolean, Json::Number(n)) => Value::Boolean(n.as_f64() != Some(0.0)),
        (FieldType::Boolean, Json::String(s)) => {
            let s = s.trim().to_ascii_lowercase();
            Value::Boolean(!(s.is_empty() || s == "0" || s == "false"))
        }
        (FieldType::Date, Json::Number(n)) => n.as_i64().map(Value::Date).unwrap_or(Value::Null),
        (FieldType::Date, Json::String(s)) => parse_date(s).map(Value::Date).unwrap_or(Value::Null),
        (FieldType::Date, Json::Bool(_)) => Value::Null,
        (_, Json::Array(_)) => Value::Null,
        (FieldType::List(_), _) => Value::Null,
    }
}

fn parse_date(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if let Ok(ts) = raw.parse::<i64>() {
        return Some(ts);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.timestamp());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp())
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Value::Decimal(d)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(values: Vec<T>) -> Self {
        Value::List(values.into_iter().map(Into::into).collect())
    }
}

/// One extracted field of an item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    /// Property path on the source object, `:`-separated for nesting.
    pub property_path: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub value: Value,
    /// The datasource's declared type, when it differs from `field_type`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_type: Option<String>,
}

impl Field {
    pub fn new(property_path: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            property_path: property_path.into(),
            field_type,
            value: Value::Null,
            original_type: None,
        }
    }

    pub fn with_value(mut self, value: impl Into<Value>) -> Self {
        self.value = value.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn field_type_round_trips_through_names() {
        let t: FieldType = "list<list<text>>".parse().unwrap();
        assert_eq!(t, FieldType::list_of(FieldType::list_of(FieldType::Text)));
        assert_eq!(t.to_string(), "list<list<text>>");
        assert!(t.is_text());
        assert!(t.is_list());
        assert_eq!(t.inner(), &FieldType::Text);
    }

    #[test]
    fn unknown_field_type_is_a_configuration_error() {
        let err = "blob".parse::<FieldType>().unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn from_json_converts_by_type() {
        assert_eq!(
            Value::from_json(&json!("42"), &FieldType::Integer),
            Value::Integer(42)
        );
        assert_eq!(
            Value::from_json(&json!("2024-01-02T00:00:00Z"), &FieldType::Date),
            Value::Date(1704153600)
        );
        assert_eq!(
            Value::from_json(&json!(["a", "b"]), &FieldType::String),
            Value::String("a".into())
        );
        assert_eq!(
            Value::from_json(&json!(["a", null, "b"]), &FieldType::list_of(FieldType::String)),
            Value::List(vec!["a".into(), "b".into()])
        );
        assert_eq!(
            Value::from_json(&json!({"nested": 1}), &FieldType::Text),
            Value::Null
        );
    }

    #[test]
    fn compare_mixes_numeric_representations() {
        assert_eq!(
            Value::Integer(3).compare(&Value::Decimal(2.5)),
            Some(Ordering::Greater)
        );
        assert_eq!(
            Value::String("10".into()).compare(&Value::Integer(9)),
            Some(Ordering::Greater)
        );
        assert_eq!(Value::Null.compare(&Value::Integer(1)), None);
    }

    #[test]
    fn emptiness_covers_null_and_empty_containers() {
        assert!(Value::Null.is_empty());
        assert!(Value::String(String::new()).is_empty());
        assert!(Value::Tokens(vec![]).is_empty());
        assert!(!Value::Integer(0).is_empty());
    }

    #[test]
    fn to_text_flattens_tokens() {
        let v = Value::Tokens(vec![
            Token::new("foo", 1.0),
            Token::new(Value::Tokens(vec![Token::new("bar", 2.0)]), 1.0),
            Token::new("", 1.0),
        ]);
        assert_eq!(v.to_text(), "foo bar");
    }
}
