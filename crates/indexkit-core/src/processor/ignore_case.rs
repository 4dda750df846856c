//! `ignore_case`: lowercases field values, search keys and filter values.

use std::sync::Arc;

use crate::error::Result;
use crate::field::{FieldType, Value};

use super::field::{FieldProcessor, FieldTransform};
use super::{Processor, ProcessorConfig};

pub struct IgnoreCase;

impl FieldTransform for IgnoreCase {
    fn test_type(&self, field_type: &FieldType) -> bool {
        matches!(
            field_type,
            FieldType::Text | FieldType::Tokens | FieldType::String
        )
    }

    fn process_field_value(&self, value: &mut Value) {
        if let Value::String(s) = value {
            *s = s.to_lowercase();
        }
    }
}

pub fn build(config: &ProcessorConfig) -> Result<Arc<dyn Processor>> {
    Ok(Arc::new(FieldProcessor::new(config, IgnoreCase)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::field::process_field;

    #[test]
    fn lowercases_strings_and_tokens() {
        let mut value = Value::String("HeLLo Wörld".into());
        let mut field_type = FieldType::String;
        process_field(&IgnoreCase, &mut value, &mut field_type);
        assert_eq!(value, Value::String("hello wörld".into()));

        let mut value = Value::Tokens(vec![crate::field::Token::new("ABC", 3.0)]);
        let mut field_type = FieldType::Tokens;
        process_field(&IgnoreCase, &mut value, &mut field_type);
        assert_eq!(
            value,
            Value::Tokens(vec![crate::field::Token::new("abc", 3.0)])
        );
    }

    #[test]
    fn integers_are_not_selected() {
        assert!(!IgnoreCase.test_type(&FieldType::Integer));
    }
}
