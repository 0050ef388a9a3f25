//! Artifact store
//!
//! Holds the outputs stage plugins hand from one stage to the next. The
//! engine itself only passes artifact ids around; plugins load and save the
//! content through this trait.

use async_trait::async_trait;
use sluice_core::domain::artifact::{Artifact, ArtifactId};
use std::collections::HashMap;
use std::sync::RwLock;

use crate::repository::StateError;

/// Storage interface for stage artifacts
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Saves an artifact, replacing any artifact with the same id
    async fn save(&self, artifact: Artifact) -> Result<ArtifactId, StateError>;

    /// Loads an artifact by id
    async fn load(&self, id: &ArtifactId) -> Result<Option<Artifact>, StateError>;

    /// Checks whether an artifact exists
    async fn exists(&self, id: &ArtifactId) -> Result<bool, StateError>;
}

/// In-memory implementation of ArtifactStore
#[derive(Default)]
pub struct InMemoryArtifactStore {
    artifacts: RwLock<HashMap<ArtifactId, Artifact>>,
}

impl InMemoryArtifactStore {
    /// Creates an empty artifact store
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.artifacts
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn save(&self, artifact: Artifact) -> Result<ArtifactId, StateError> {
        let id = artifact.id.clone();
        self.artifacts
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.clone(), artifact);
        Ok(id)
    }

    async fn load(&self, id: &ArtifactId) -> Result<Option<Artifact>, StateError> {
        Ok(self
            .artifacts
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned())
    }

    async fn exists(&self, id: &ArtifactId) -> Result<bool, StateError> {
        Ok(self
            .artifacts
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(id))
    }
}
