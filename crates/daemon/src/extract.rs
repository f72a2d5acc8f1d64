// Text extractors: doc-class hooks used by downstream consumers
// (search pushers and the like) to turn a stored payload into
// indexable text. Resolved by name so doc classes stay pure data.

use std::collections::HashMap;
use std::sync::Arc;

use limpet_common::TrackedDocument;

pub type TextExtractor =
    Arc<dyn Fn(&TrackedDocument, &[u8]) -> anyhow::Result<String> + Send + Sync>;

/// Name → extractor registry, populated once at startup.
#[derive(Clone, Default)]
pub struct ExtractorRegistry {
    extractors: HashMap<String, TextExtractor>,
}

impl ExtractorRegistry {
    /// Registry carrying the built-in `plaintext` extractor.
    pub fn with_defaults() -> Self {
        let mut registry = Self::default();
        registry.register(
            "plaintext",
            Arc::new(|_doc: &TrackedDocument, data: &[u8]| -> anyhow::Result<String> {
                Ok(String::from_utf8_lossy(data).into_owned())
            }),
        );
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, extractor: TextExtractor) {
        self.extractors.insert(name.into(), extractor);
    }

    pub fn get(&self, name: &str) -> Option<TextExtractor> {
        self.extractors.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.extractors.contains_key(name)
    }
}
