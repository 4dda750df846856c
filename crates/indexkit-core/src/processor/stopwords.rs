//! `stopwords`: drops configured stopwords from fulltext values and keys.
//!
//! Dropped search keys end up in the result set's `ignored` list.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::field::{Token, Value};

use super::field::{FieldProcessor, FieldTransform};
use super::{Processor, ProcessorConfig};

pub struct Stopwords {
    words: BTreeSet<String>,
}

impl Stopwords {
    pub fn from_config(config: &ProcessorConfig) -> Result<Self> {
        let words = config
            .settings()
            .string_list("stopwords")?
            .ok_or_else(|| Error::configuration("stopwords: 'stopwords' list is required"))?;
        Ok(Self::new(words))
    }

    pub fn new(words: impl IntoIterator<Item = String>) -> Self {
        Self {
            words: words
                .into_iter()
                .map(|w| w.trim().to_lowercase())
                .filter(|w| !w.is_empty())
                .collect(),
        }
    }

    pub fn is_stopword(&self, word: &str) -> bool {
        self.words.contains(&word.to_lowercase())
    }
}

impl FieldTransform for Stopwords {
    fn process_field_value(&self, value: &mut Value) {
        let Value::String(s) = value else { return };
        if self.is_stopword(s) {
            s.clear();
            return;
        }
        // untokenized text: drop stopwords between whitespace
        if s.contains(char::is_whitespace) {
            let kept: Vec<Token> = s
                .split_whitespace()
                .filter(|w| !self.is_stopword(w))
                .map(|w| Token::new(w, 1.0))
                .collect();
            *value = Value::Tokens(kept);
        }
    }
}

pub fn build(config: &ProcessorConfig) -> Result<Arc<dyn Processor>> {
    let stopwords = Stopwords::from_config(config)?;
    Ok(Arc::new(FieldProcessor::new(config, stopwords)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldType;
    use crate::processor::field::process_field;

    fn stopwords() -> Stopwords {
        Stopwords::new(vec!["the".to_string(), "A".to_string()])
    }

    #[test]
    fn removes_stopword_tokens() {
        let mut value = Value::Tokens(vec![
            Token::new("The", 1.0),
            Token::new("quick", 1.0),
            Token::new("a", 2.0),
        ]);
        let mut field_type = FieldType::Tokens;
        process_field(&stopwords(), &mut value, &mut field_type);
        assert_eq!(value, Value::Tokens(vec![Token::new("quick", 1.0)]));
    }

    #[test]
    fn removes_stopwords_from_plain_text() {
        let mut value = Value::String("the fox and a hound".into());
        let mut field_type = FieldType::Text;
        process_field(&stopwords(), &mut value, &mut field_type);
        assert_eq!(value.to_text(), "fox and hound");
    }

    #[test]
    fn requires_a_word_list() {
        assert!(Stopwords::from_config(&ProcessorConfig::new("stopwords")).is_err());
    }
}
