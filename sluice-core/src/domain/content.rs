//! Content item domain types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// What the data source wants done with a content item
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentAction {
    #[default]
    AddOrUpdate,
    Remove,
}

/// A piece of source content supplied to a pipeline run
///
/// Produced by a data-source connector and immutable for the lifetime of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    /// Stable identifier across runs (e.g. a relative path or a document key)
    pub canonical_id: String,
    /// Where the raw bytes live, interpreted by the content source
    pub content_id: String,
    pub action: ContentAction,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ContentItem {
    /// Creates a content item to be added or updated
    pub fn new(canonical_id: impl Into<String>, content_id: impl Into<String>) -> Self {
        Self {
            canonical_id: canonical_id.into(),
            content_id: content_id.into(),
            action: ContentAction::AddOrUpdate,
            metadata: HashMap::new(),
        }
    }

    pub fn with_action(mut self, action: ContentAction) -> Self {
        self.action = action;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}
