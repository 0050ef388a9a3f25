//! Dedup bookkeeping
//!
//! Remembers which content hashes have been processed and what they produced,
//! so a stage plugin can skip work for content it has already seen. The ledger
//! only lives in memory; persisting it is up to the plugin that owns it.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::domain::artifact::ArtifactId;
use crate::hash::ContentHash;

/// Outcome of checking a content hash against the ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DedupCheck {
    /// Never seen before
    New,
    /// Same content item with the same content as last time
    Unchanged(Vec<ArtifactId>),
    /// Identical content was first recorded under another content item
    DuplicateOf(String),
}

#[derive(Debug, Default)]
struct LedgerState {
    /// Latest hash and artifacts per canonical id
    by_canonical: HashMap<String, (ContentHash, Vec<ArtifactId>)>,
    /// First canonical id that produced each hash
    by_hash: HashMap<ContentHash, String>,
}

/// Thread-safe map of content hashes to the content items that produced them
#[derive(Debug, Default)]
pub struct DedupLedger {
    state: RwLock<LedgerState>,
}

impl DedupLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classifies `hash` for `canonical_id` without recording anything
    pub fn check(&self, canonical_id: &str, hash: &ContentHash) -> DedupCheck {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());

        if let Some((_, artifacts)) = state
            .by_canonical
            .get(canonical_id)
            .filter(|(previous, _)| previous == hash)
        {
            return DedupCheck::Unchanged(artifacts.clone());
        }

        match state.by_hash.get(hash) {
            Some(owner) if owner != canonical_id => DedupCheck::DuplicateOf(owner.clone()),
            _ => DedupCheck::New,
        }
    }

    /// Records the artifacts produced for `canonical_id` at `hash`
    pub fn record(&self, canonical_id: &str, hash: ContentHash, artifact_ids: Vec<ArtifactId>) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());

        state
            .by_hash
            .entry(hash.clone())
            .or_insert_with(|| canonical_id.to_string());
        state
            .by_canonical
            .insert(canonical_id.to_string(), (hash, artifact_ids));
    }

    /// Drops everything recorded for `canonical_id`
    ///
    /// Returns false if the content item was never recorded. A hash owned by the
    /// removed item is released, so the next item with that content is new.
    pub fn forget(&self, canonical_id: &str) -> bool {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());

        let Some((hash, _)) = state.by_canonical.remove(canonical_id) else {
            return false;
        };
        if state.by_hash.get(&hash).is_some_and(|owner| owner == canonical_id) {
            state.by_hash.remove(&hash);
        }
        true
    }

    /// Number of distinct content items recorded
    pub fn len(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .by_canonical
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
