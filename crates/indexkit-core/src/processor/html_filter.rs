//! `html_filter`: strips HTML from field values.
//!
//! With boosted `tags` configured, text inside those tags becomes tokens
//! whose score is the product of all enclosing tag boosts. A boost of 0
//! suppresses a tag's own text; tags nested inside it are still scanned.
//!
//! Settings: `title` (index `title=""` attributes, default false), `alt`
//! (index image `alt=""` text, default true), `tags` (tag name to boost).

use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};

use html_escape::decode_html_entities;
use regex::Regex;
use serde_json::Value as Json;

use crate::error::{Error, Result};
use crate::field::{FieldType, Token, Value};

use super::field::{FieldProcessor, FieldTransform};
use super::{Processor, ProcessorConfig};

static TITLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(<[-a-z_]+[^>]+)\btitle\s?=\s?"([^"]+)"([^>]*>)"#)
        .expect("TITLE_RE: hardcoded regex is valid")
});

static ALT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<img\b[^>]+\balt\s?=\s?"([^"]+)"[^>]*>"#)
        .expect("ALT_RE: hardcoded regex is valid")
});

static COMMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<!--.*?-->").expect("COMMENT_RE: hardcoded regex is valid")
});

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<(/?)([a-zA-Z][-:_a-zA-Z0-9]*)[^<>]*>").expect("TAG_RE: hardcoded regex is valid")
});

static TAG_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(/?)([-:_a-zA-Z0-9]+)").expect("TAG_NAME_RE: hardcoded regex is valid")
});

fn default_tags() -> BTreeMap<String, f64> {
    [
        ("h1", 5.0),
        ("h2", 3.0),
        ("h3", 2.0),
        ("strong", 2.0),
        ("b", 2.0),
        ("em", 1.5),
        ("u", 1.5),
    ]
    .into_iter()
    .map(|(tag, boost)| (tag.to_string(), boost))
    .collect()
}

pub struct HtmlFilter {
    title: bool,
    alt: bool,
    tags: BTreeMap<String, f64>,
}

impl HtmlFilter {
    pub fn from_config(config: &ProcessorConfig) -> Result<Self> {
        let settings = config.settings();
        let tags = match settings.get("tags") {
            None => default_tags(),
            Some(Json::Object(map)) => {
                let mut tags = BTreeMap::new();
                for (tag, boost) in map {
                    let boost = boost.as_f64().filter(|b| *b >= 0.0).ok_or_else(|| {
                        Error::configuration(format!(
                            "html_filter: boost for tag '{}' must be a non-negative number",
                            tag
                        ))
                    })?;
                    tags.insert(tag.to_lowercase(), boost);
                }
                tags
            }
            Some(_) => {
                return Err(Error::configuration(
                    "html_filter: 'tags' must map tag names to boosts",
                ))
            }
        };
        Ok(Self::new(
            settings.bool("title", false)?,
            settings.bool("alt", true)?,
            tags,
        ))
    }

    pub fn new(title: bool, alt: bool, mut tags: BTreeMap<String, f64>) -> Self {
        // void elements never enclose text
        tags.remove("br");
        tags.remove("hr");
        Self { title, alt, tags }
    }

    /// Filter one HTML string into plain text or weighted tokens.
    pub fn filter(&self, html: &str) -> Value {
        let mut text = html.replace('<', " <").replace('>', "> ");
        if self.title {
            text = TITLE_RE.replace_all(&text, "$2 $1$3").into_owned();
        }
        if self.alt {
            text = ALT_RE.replace_all(&text, " <img>$1</img> ").into_owned();
        }

        let stripped = self.strip_tags(&text);
        if self.tags.is_empty() {
            return Value::String(decode_html_entities(stripped.trim()).into_owned());
        }

        let mut rest = stripped.as_str();
        let mut tokens = Vec::new();
        self.parse_text(&mut rest, None, 1.0, &mut tokens);
        Value::Tokens(tokens)
    }

    /// Remove every tag that carries no boost. Boosted tags are kept
    /// without their attributes; stray angle brackets become entities.
    fn strip_tags(&self, text: &str) -> String {
        let text = COMMENT_RE.replace_all(text, " ");
        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for caps in TAG_RE.captures_iter(&text) {
            let Some(whole) = caps.get(0) else { continue };
            push_escaped(&mut out, &text[last..whole.start()]);
            last = whole.end();

            let name = caps.get(2).map_or("", |m| m.as_str()).to_lowercase();
            if self.tags.contains_key(&name) {
                let closing = caps.get(1).map_or("", |m| m.as_str());
                out.push('<');
                out.push_str(closing);
                out.push_str(&name);
                out.push('>');
            }
        }
        push_escaped(&mut out, &text[last..]);
        out
    }

    fn parse_text<'t>(
        &self,
        text: &mut &'t str,
        active_tag: Option<&str>,
        boost: f64,
        out: &mut Vec<Token>,
    ) {
        while let Some(pos) = text.find('<') {
            let current: &'t str = *text;
            if pos > 0 {
                push_token(out, &current[..pos], boost);
            }
            let after = &current[pos + 1..];
            let (closing, name) = match TAG_NAME_RE.captures(after) {
                Some(caps) => (
                    caps.get(1).is_some_and(|m| !m.as_str().is_empty()),
                    caps.get(2).map_or(String::new(), |m| m.as_str().to_lowercase()),
                ),
                None => (false, String::new()),
            };
            *text = match after.find('>') {
                Some(end) => &after[end + 1..],
                None => "",
            };

            if closing {
                if active_tag == Some(name.as_str()) {
                    return;
                }
            } else {
                let inner = boost * self.tags.get(&name).copied().unwrap_or(1.0);
                self.parse_text(text, Some(&name), inner, out);
            }
        }
        if !text.is_empty() {
            push_token(out, text, boost);
            *text = "";
        }
    }
}

fn push_escaped(out: &mut String, text: &str) {
    for c in text.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            c => out.push(c),
        }
    }
}

fn push_token(out: &mut Vec<Token>, raw: &str, boost: f64) {
    if boost == 0.0 {
        return;
    }
    let decoded = decode_html_entities(raw);
    let trimmed = decoded.trim();
    if !trimmed.is_empty() {
        out.push(Token::new(trimmed, boost));
    }
}

impl FieldTransform for HtmlFilter {
    fn test_type(&self, field_type: &FieldType) -> bool {
        matches!(field_type, FieldType::Text | FieldType::String)
    }

    fn process_field_value(&self, value: &mut Value) {
        if let Value::String(s) = value {
            *value = self.filter(s);
        }
    }

    fn process_filter_value(&self, value: &mut Value) {
        if let Value::String(s) = value {
            *value = Value::String(self.filter(s).to_text());
        }
    }
}

pub fn build(config: &ProcessorConfig) -> Result<Arc<dyn Processor>> {
    let filter = HtmlFilter::from_config(config)?;
    Ok(Arc::new(FieldProcessor::new(config, filter)?))
}
