//! Content sources
//!
//! Where the starting stage reads the raw bytes of a content item from.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

/// Supplies the raw content of content items
///
/// Content is addressed by the content item's `content_id`, which need not
/// match its canonical id.
#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn read(&self, content_id: &str) -> anyhow::Result<Vec<u8>>;
}

/// Content source backed by a map, for tests and embedding
#[derive(Default)]
pub struct InMemoryContentSource {
    contents: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryContentSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, content_id: impl Into<String>, content: impl Into<Vec<u8>>) {
        self.contents
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(content_id.into(), content.into());
    }
}

#[async_trait]
impl ContentSource for InMemoryContentSource {
    async fn read(&self, content_id: &str) -> anyhow::Result<Vec<u8>> {
        self.contents
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(content_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Content '{}' not found", content_id))
    }
}
