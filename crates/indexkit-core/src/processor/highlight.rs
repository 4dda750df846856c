//! `highlight`: excerpts and highlighted field values for search results.
//!
//! Settings: `prefix` / `suffix` wrapped around matches (default
//! `<strong>` / `</strong>`), `excerpt` (default true), `excerpt_length`
//! (default 256), `highlight` (`always`, `server` or `never`; `server`
//! leaves field highlighting to backends supporting it).

use std::sync::Arc;

use html_escape::encode_text;
use regex::Regex;
use serde_json::{Map, Value as Json};
use tracing::warn;

use crate::error::{Error, Result};
use crate::query::{Keys, Query};
use crate::results::ResultSet;

use super::{Processor, ProcessorConfig, Stage};

/// Characters of context kept around each match in an excerpt.
const CONTEXT: usize = 60;
const ELLIPSIS: &str = " … ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HighlightMode {
    Always,
    Server,
    Never,
}

pub struct Highlight {
    id: String,
    prefix: String,
    suffix: String,
    excerpt: bool,
    excerpt_length: usize,
    mode: HighlightMode,
}

impl Highlight {
    pub fn from_config(config: &ProcessorConfig) -> Result<Self> {
        let settings = config.settings();
        let mode = match settings.string("highlight", "always")?.as_str() {
            "always" => HighlightMode::Always,
            "server" => HighlightMode::Server,
            "never" => HighlightMode::Never,
            other => {
                return Err(Error::configuration(format!(
                    "highlight: unknown highlight mode '{}'",
                    other
                )))
            }
        };
        Ok(Self {
            id: config.id.clone(),
            prefix: settings.string("prefix", "<strong>")?,
            suffix: settings.string("suffix", "</strong>")?,
            excerpt: settings.bool("excerpt", true)?,
            excerpt_length: settings.usize("excerpt_length", 256)?,
            mode,
        })
    }

    /// Case-insensitive whole-word pattern over all `keys`.
    fn keys_pattern(keys: &[String]) -> Option<Regex> {
        if keys.is_empty() {
            return None;
        }
        let alternatives: Vec<String> = keys.iter().map(|k| regex::escape(k)).collect();
        match Regex::new(&format!(r"(?i)\b(?:{})\b", alternatives.join("|"))) {
            Ok(re) => Some(re),
            Err(e) => {
                warn!(error = %e, "could not build highlight pattern");
                None
            }
        }
    }

    /// HTML-escape `text`, wrapping every match in prefix/suffix.
    pub fn highlight_text(&self, text: &str, pattern: &Regex) -> String {
        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for m in pattern.find_iter(text) {
            out.push_str(&encode_text(&text[last..m.start()]));
            out.push_str(&self.prefix);
            out.push_str(&encode_text(m.as_str()));
            out.push_str(&self.suffix);
            last = m.end();
        }
        out.push_str(&encode_text(&text[last..]));
        out
    }

    /// Snippets of `text` around matches, joined by ellipses, with matches
    /// highlighted. `None` if nothing matches.
    pub fn create_excerpt(&self, text: &str, pattern: &Regex) -> Option<String> {
        let mut windows: Vec<(usize, usize)> = Vec::new();
        let mut covered = 0;
        for m in pattern.find_iter(text) {
            if covered >= self.excerpt_length {
                break;
            }
            let start = word_start(text, m.start().saturating_sub(CONTEXT), m.start());
            let end = word_end(text, (m.end() + CONTEXT).min(text.len()), m.end());
            match windows.last_mut() {
                Some(last) if start <= last.1 => {
                    covered += end.saturating_sub(last.1);
                    last.1 = last.1.max(end);
                }
                _ => {
                    covered += end - start;
                    windows.push((start, end));
                }
            }
        }
        if windows.is_empty() {
            return None;
        }

        let mut excerpt = String::new();
        if windows[0].0 > 0 {
            excerpt.push_str(ELLIPSIS.trim_start());
        }
        for (i, (start, end)) in windows.iter().enumerate() {
            if i > 0 {
                excerpt.push_str(ELLIPSIS);
            }
            excerpt.push_str(&self.highlight_text(text[*start..*end].trim(), pattern));
        }
        if windows.last().is_some_and(|(_, end)| *end < text.len()) {
            excerpt.push_str(ELLIPSIS.trim_end());
        }
        Some(excerpt)
    }
}

fn floor_boundary(text: &str, mut i: usize) -> usize {
    while i > 0 && !text.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Move `i` forward to the start of the next word, unless at text start.
/// Never moves past `limit`; without whitespace before it `i` is kept.
fn word_start(text: &str, i: usize, limit: usize) -> usize {
    let i = floor_boundary(text, i).min(limit);
    if i == 0 {
        return 0;
    }
    match text[i..limit].find(char::is_whitespace) {
        Some(offset) => i + offset,
        None => i,
    }
}

/// Move `i` back to the end of the previous word, unless at text end.
/// Never moves before `limit`; without whitespace after it `i` is kept.
fn word_end(text: &str, i: usize, limit: usize) -> usize {
    let i = floor_boundary(text, i).max(limit);
    if i >= text.len() {
        return text.len();
    }
    match text[limit..i].rfind(char::is_whitespace) {
        Some(pos) => limit + pos,
        None => i,
    }
}

fn query_keys(query: &Query) -> Vec<String> {
    match query.parsed_keys() {
        Some(Keys::Parsed(group)) => group
            .positive_terms()
            .into_iter()
            .map(str::to_string)
            .collect(),
        Some(Keys::Direct(raw)) => raw.split_whitespace().map(str::to_string).collect(),
        None => Vec::new(),
    }
}

impl Processor for Highlight {
    fn id(&self) -> &str {
        &self.id
    }

    fn stages(&self) -> &'static [Stage] {
        &[Stage::PostprocessQuery]
    }

    fn postprocess_search_results(&self, results: &mut ResultSet, query: &Query) {
        let Some(pattern) = Self::keys_pattern(&query_keys(query)) else {
            return;
        };
        let index = query.index();
        let fields: Vec<String> = match query.searched_fields() {
            Some(fields) => fields.to_vec(),
            None => index.fulltext_fields(),
        };
        let highlight_fields = match self.mode {
            HighlightMode::Always => true,
            HighlightMode::Never => false,
            HighlightMode::Server => !index.backend().supports_feature("highlight"),
        };

        for item in &mut results.results {
            let texts: Vec<(String, String)> = fields
                .iter()
                .filter_map(|name| item.field(name).map(|f| (name.clone(), f.value.to_text())))
                .filter(|(_, text)| !text.is_empty())
                .collect();

            if self.excerpt && item.excerpt.is_none() {
                let joined = texts
                    .iter()
                    .map(|(_, text)| text.as_str())
                    .collect::<Vec<_>>()
                    .join(" ");
                item.excerpt = self.create_excerpt(&joined, &pattern);
            }

            if highlight_fields {
                let highlighted: Map<String, Json> = texts
                    .iter()
                    .filter(|(_, text)| pattern.is_match(text))
                    .map(|(name, text)| {
                        (name.clone(), Json::String(self.highlight_text(text, &pattern)))
                    })
                    .collect();
                if !highlighted.is_empty() {
                    item.extra
                        .insert("highlighted_fields".into(), Json::Object(highlighted));
                }
            }
        }
    }
}

pub fn build(config: &ProcessorConfig) -> Result<Arc<dyn Processor>> {
    Ok(Arc::new(Highlight::from_config(config)?))
}
