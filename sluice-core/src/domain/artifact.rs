//! Artifact domain types

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::hash::{ContentHash, ContentHasher};

/// Opaque identifier of a stage output
///
/// The engine never looks inside an artifact; it only hands these ids from one
/// stage to the next.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactId(String);

impl ArtifactId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derives a content-addressed id
    ///
    /// The same content item, artifact name and content always map to the same id,
    /// so reprocessing a work item rewrites its artifacts instead of duplicating them.
    pub fn content_addressed(
        content_item_canonical_id: &str,
        name: &str,
        content_hash: &ContentHash,
    ) -> Self {
        let key = ContentHasher::new().hash_parts([
            content_item_canonical_id,
            name,
            content_hash.as_str(),
        ]);
        Self(format!("artifact-{}", key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ArtifactId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for ArtifactId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// A stored stage output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub id: ArtifactId,
    /// Content item the artifact was derived from
    pub content_item_canonical_id: String,
    /// Role of the artifact within its content item (e.g. "text", "chunk-0003")
    pub name: String,
    pub content: Vec<u8>,
    pub content_hash: ContentHash,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl Artifact {
    /// Creates an artifact with a content-addressed id
    pub fn new(
        content_item_canonical_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<Vec<u8>>,
    ) -> Self {
        let content_item_canonical_id = content_item_canonical_id.into();
        let name = name.into();
        let content = content.into();
        let content_hash = ContentHasher::new().hash(&content);
        let id = ArtifactId::content_addressed(&content_item_canonical_id, &name, &content_hash);

        Self {
            id,
            content_item_canonical_id,
            name,
            content,
            content_hash,
            created_at: chrono::Utc::now(),
        }
    }

    /// Returns the content as UTF-8 text, if it is valid UTF-8
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.content).ok()
    }
}
