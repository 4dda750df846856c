//! `tokenizer`: splits fulltext values into word tokens.
//!
//! Settings:
//! - `spaces`: regex matching word separators (default: anything that is
//!   not a letter or number)
//! - `ignorable`: regex of characters removed before splitting
//! - `minimum_word_size`: shorter words are dropped (default 1)

use std::sync::Arc;

use regex::Regex;

use crate::error::{Error, Result};
use crate::field::{Token, Value};

use super::field::{FieldProcessor, FieldTransform};
use super::{Processor, ProcessorConfig};

const DEFAULT_SPACES: &str = r"[^\p{L}\p{N}]";
const DEFAULT_IGNORABLE: &str = r"['¿¡!?,.:;]";

pub struct Tokenizer {
    spaces: Regex,
    ignorable: Option<Regex>,
    minimum_word_size: usize,
}

impl Tokenizer {
    pub fn from_config(config: &ProcessorConfig) -> Result<Self> {
        let settings = config.settings();
        let spaces = settings.string("spaces", DEFAULT_SPACES)?;
        let ignorable = settings.string("ignorable", DEFAULT_IGNORABLE)?;
        let compile = |pattern: &str, key: &str| {
            Regex::new(pattern).map_err(|e| {
                Error::configuration(format!("tokenizer: invalid '{}' pattern: {}", key, e))
            })
        };
        Ok(Self {
            spaces: compile(&spaces, "spaces")?,
            ignorable: if ignorable.is_empty() {
                None
            } else {
                Some(compile(&ignorable, "ignorable")?)
            },
            minimum_word_size: settings.usize("minimum_word_size", 1)?,
        })
    }

    pub fn tokenize(&self, text: &str) -> Vec<String> {
        let cleaned = match &self.ignorable {
            Some(re) => re.replace_all(text, "").into_owned(),
            None => text.to_string(),
        };
        self.spaces
            .split(&cleaned)
            .filter(|w| !w.is_empty() && w.chars().count() >= self.minimum_word_size)
            .map(str::to_string)
            .collect()
    }
}

impl FieldTransform for Tokenizer {
    fn process_field_value(&self, value: &mut Value) {
        if let Value::String(s) = value {
            let tokens = self
                .tokenize(s)
                .into_iter()
                .map(|w| Token::new(w, 1.0))
                .collect();
            *value = Value::Tokens(tokens);
        }
    }
}

pub fn build(config: &ProcessorConfig) -> Result<Arc<dyn Processor>> {
    let tokenizer = Tokenizer::from_config(config)?;
    Ok(Arc::new(FieldProcessor::new(config, tokenizer)?))
}
