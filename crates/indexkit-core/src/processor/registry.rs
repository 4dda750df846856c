//! Processor registry: a static table from processor id to factory.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::error::{Error, Result};

use super::{
    access, highlight, html_filter, ignore_case, stopwords, tokenizer, transliteration,
    Processor, ProcessorConfig, ProcessorPipeline,
};

/// Builds a processor from its configuration, validating the settings.
pub type ProcessorFactory = fn(&ProcessorConfig) -> Result<Arc<dyn Processor>>;

#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    factories: BTreeMap<String, ProcessorFactory>,
}

impl ProcessorRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every built-in processor.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("access", access::build);
        registry.register("highlight", highlight::build);
        registry.register("html_filter", html_filter::build);
        registry.register("ignore_case", ignore_case::build);
        registry.register("stopwords", stopwords::build);
        registry.register("tokenizer", tokenizer::build);
        registry.register("transliteration", transliteration::build);
        registry
    }

    /// Register (or replace) a factory.
    pub fn register(&mut self, id: &str, factory: ProcessorFactory) {
        self.factories.insert(id.to_string(), factory);
    }

    pub fn ids(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Build one processor.
    pub fn create(&self, config: &ProcessorConfig) -> Result<Arc<dyn Processor>> {
        let factory = self.factories.get(&config.id).ok_or_else(|| {
            Error::configuration(format!(
                "unknown processor '{}' (available: {})",
                config.id,
                self.ids().join(", ")
            ))
        })?;
        factory(config)
    }

    /// Build a pipeline from ordered configuration. Disabled entries are
    /// skipped.
    pub fn build(&self, configs: &[ProcessorConfig]) -> Result<ProcessorPipeline> {
        let mut pipeline = ProcessorPipeline::new();
        for config in configs.iter().filter(|c| c.enabled) {
            let processor = self.create(config)?;
            debug!(processor = %config.id, weight = config.weight, "processor enabled");
            pipeline.push(config.weight, processor);
        }
        Ok(pipeline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::Stage;

    #[test]
    fn builds_pipeline_in_weight_order() {
        let registry = ProcessorRegistry::with_builtins();
        let pipeline = registry
            .build(&[
                ProcessorConfig::new("tokenizer").with_weight(10),
                ProcessorConfig::new("ignore_case").with_weight(-10),
                ProcessorConfig::new("html_filter").with_weight(0),
            ])
            .unwrap();
        let ids: Vec<String> = pipeline
            .for_stage(Stage::PreprocessIndex)
            .iter()
            .map(|p| p.id().to_string())
            .collect();
        assert_eq!(ids, vec!["ignore_case", "html_filter", "tokenizer"]);
    }

    #[test]
    fn unknown_processor_is_a_configuration_error() {
        let registry = ProcessorRegistry::with_builtins();
        let err = registry
            .build(&[ProcessorConfig::new("stemmer")])
            .err()
            .unwrap();
        assert!(matches!(err, Error::Configuration(_)));
        assert!(err.to_string().contains("stemmer"));
    }

    #[test]
    fn disabled_entries_are_skipped() {
        let registry = ProcessorRegistry::with_builtins();
        let mut config = ProcessorConfig::new("ignore_case");
        config.enabled = false;
        assert!(registry.build(&[config]).unwrap().is_empty());
    }
}
