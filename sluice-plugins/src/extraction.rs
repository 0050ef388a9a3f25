//! Text extraction stage
//!
//! Starting stage that turns each added or updated content item into a
//! `text` artifact. Content is read through a [`ContentSource`] by content
//! id, decoded as UTF-8 and line-ending normalized. Items whose text has not
//! changed since they were last extracted reuse their previous artifact.
//!
//! Content items marked for removal are dropped from the dedup ledger and
//! produce no artifact, so nothing flows downstream for them.

use async_trait::async_trait;
use sluice_core::domain::artifact::Artifact;
use sluice_core::domain::content::ContentItem;
use sluice_core::domain::pipeline::PipelineDefinition;
use sluice_core::domain::run::PipelineRun;
use sluice_core::domain::work_item::WorkItem;
use sluice_core::{ContentHasher, DedupCheck, DedupLedger};
use sluice_engine::plugin::params;
use sluice_engine::{
    ArtifactStore, PluginCapabilities, PluginError, PluginParameters, PluginResult, StagePlugin,
};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::source::ContentSource;

pub const TEXT_EXTRACTION: &str = "text-extraction";

/// Default limit on extracted text, in characters
pub const DEFAULT_MAX_CONTENT_SIZE: usize = 10_000_000;

/// Name of the artifact holding the extracted text
pub const TEXT_ARTIFACT: &str = "text";

pub struct TextExtractionPlugin {
    source: Arc<dyn ContentSource>,
    artifacts: Arc<dyn ArtifactStore>,
    ledger: Arc<DedupLedger>,
    hasher: ContentHasher,
    max_content_size: usize,
}

impl TextExtractionPlugin {
    pub fn new(
        source: Arc<dyn ContentSource>,
        artifacts: Arc<dyn ArtifactStore>,
        ledger: Arc<DedupLedger>,
        max_content_size: usize,
    ) -> Result<Self, PluginError> {
        if max_content_size == 0 {
            return Err(PluginError::invalid_parameter(
                "max_content_size",
                "must be greater than 0",
            ));
        }

        Ok(Self {
            source,
            artifacts,
            ledger,
            hasher: ContentHasher::new(),
            max_content_size,
        })
    }

    /// Builds the plugin from stage parameters (`max_content_size`)
    pub fn from_parameters(
        source: Arc<dyn ContentSource>,
        artifacts: Arc<dyn ArtifactStore>,
        ledger: Arc<DedupLedger>,
        parameters: &PluginParameters,
    ) -> Result<Self, PluginError> {
        let max_content_size =
            params::get_usize(parameters, "max_content_size", DEFAULT_MAX_CONTENT_SIZE)?;
        Self::new(source, artifacts, ledger, max_content_size)
    }

    /// Reuses the previous artifacts of an unchanged item, if they are still stored
    async fn unchanged_artifacts(
        &self,
        canonical_id: &str,
        hash: &sluice_core::ContentHash,
    ) -> Result<Option<PluginResult>, PluginError> {
        let DedupCheck::Unchanged(previous) = self.ledger.check(canonical_id, hash) else {
            return Ok(None);
        };

        for id in &previous {
            let exists = self
                .artifacts
                .exists(id)
                .await
                .map_err(|e| PluginError::from(anyhow::Error::new(e)))?;
            if !exists {
                return Ok(None);
            }
        }

        Ok(Some(
            PluginResult::succeeded(previous).with_message("Content unchanged since last extraction"),
        ))
    }
}

/// Normalizes `\r\n` and lone `\r` line endings to `\n`
pub fn normalize_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

#[async_trait]
impl StagePlugin for TextExtractionPlugin {
    fn name(&self) -> &str {
        TEXT_EXTRACTION
    }

    fn capabilities(&self) -> PluginCapabilities {
        PluginCapabilities::STARTING
    }

    async fn get_starting_work_items(
        &self,
        content_items: &[ContentItem],
        run_id: Uuid,
        stage: &str,
    ) -> Result<Vec<WorkItem>, PluginError> {
        let items: Vec<WorkItem> = content_items
            .iter()
            .map(|c| WorkItem::starting(run_id, stage, c))
            .collect();

        let removals = items.iter().filter(|i| i.is_removal()).count();
        if removals > 0 {
            debug!("{} content item(s) marked for removal", removals);
        }

        Ok(items)
    }

    async fn process_work_item(
        &self,
        _definition: &PipelineDefinition,
        _run: &PipelineRun,
        item: &WorkItem,
    ) -> Result<PluginResult, PluginError> {
        if item.previous_stage.is_some() {
            return Err(PluginError::NotDownstreamStage {
                plugin: TEXT_EXTRACTION.to_string(),
            });
        }

        let canonical_id = item.content_item_canonical_id.as_str();

        if item.is_removal() {
            if self.ledger.forget(canonical_id) {
                info!("Content item '{}' removed from the dedup ledger", canonical_id);
            }
            return Ok(PluginResult::succeeded(Vec::new()).with_message("Content item removed"));
        }

        let content_id = item.content_id.as_deref().unwrap_or(canonical_id);
        let raw = match self.source.read(content_id).await {
            Ok(raw) => raw,
            Err(e) => {
                return Ok(PluginResult::failed(format!(
                    "Could not read content item '{}': {:#}",
                    canonical_id, e
                )));
            }
        };

        let text = match String::from_utf8(raw) {
            Ok(text) => normalize_line_endings(&text),
            Err(_) => {
                return Ok(PluginResult::stop(format!(
                    "The content of '{}' is not UTF-8 text and is not supported by the {} plugin",
                    canonical_id, TEXT_EXTRACTION
                )));
            }
        };

        let size = text.chars().count();
        if size > self.max_content_size {
            warn!(
                "Work item {} ignored: {} exceeds {} characters",
                item.id, canonical_id, self.max_content_size
            );
            return Ok(PluginResult::failed(format!(
                "The extracted text ({} characters) exceeds the maximum allowed size of {} characters",
                size, self.max_content_size
            )));
        }

        let hash = self.hasher.hash(&text);
        if let Some(result) = self.unchanged_artifacts(canonical_id, &hash).await? {
            info!("Content item '{}' unchanged, reusing its text artifact", canonical_id);
            return Ok(result);
        }

        if let DedupCheck::DuplicateOf(owner) = self.ledger.check(canonical_id, &hash) {
            debug!("Content item '{}' has the same text as '{}'", canonical_id, owner);
        }

        let artifact = Artifact::new(canonical_id, TEXT_ARTIFACT, text);
        let artifact_id = match self.artifacts.save(artifact).await {
            Ok(id) => id,
            Err(e) => {
                return Ok(PluginResult::failed(format!(
                    "Could not save text of '{}': {}",
                    canonical_id, e
                )));
            }
        };

        self.ledger.record(canonical_id, hash, vec![artifact_id.clone()]);
        debug!("Extracted {} character(s) from '{}'", size, canonical_id);

        Ok(PluginResult::succeeded(vec![artifact_id]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::InMemoryContentSource;
    use sluice_core::domain::content::ContentAction;
    use sluice_core::domain::pipeline::StageDefinition;
    use sluice_engine::InMemoryArtifactStore;
    use std::collections::HashMap;

    struct Fixture {
        source: Arc<InMemoryContentSource>,
        artifacts: Arc<InMemoryArtifactStore>,
        plugin: TextExtractionPlugin,
        definition: PipelineDefinition,
        run: PipelineRun,
    }

    fn fixture(max_content_size: usize) -> Fixture {
        let source = Arc::new(InMemoryContentSource::new());
        let artifacts = Arc::new(InMemoryArtifactStore::new());
        let plugin = TextExtractionPlugin::new(
            source.clone(),
            artifacts.clone(),
            Arc::new(DedupLedger::new()),
            max_content_size,
        )
        .unwrap();
        let definition = PipelineDefinition::new(
            "ingest",
            vec![StageDefinition::new("extract", TEXT_EXTRACTION)],
        );
        let run = PipelineRun::new(&definition, HashMap::new());
        Fixture {
            source,
            artifacts,
            plugin,
            definition,
            run,
        }
    }

    impl Fixture {
        async fn process(&self, canonical_id: &str) -> PluginResult {
            self.process_content(&ContentItem::new(canonical_id, canonical_id))
                .await
        }

        async fn process_content(&self, content: &ContentItem) -> PluginResult {
            let item = WorkItem::starting(self.run.id, "extract", content);
            self.plugin
                .process_work_item(&self.definition, &self.run, &item)
                .await
                .unwrap()
        }
    }

    #[tokio::test]
    async fn test_removed_items_get_work_items() {
        let f = fixture(DEFAULT_MAX_CONTENT_SIZE);
        let content = vec![
            ContentItem::new("a", "a"),
            ContentItem::new("b", "b").with_action(ContentAction::Remove),
        ];

        let items = f
            .plugin
            .get_starting_work_items(&content, f.run.id, "extract")
            .await
            .unwrap();

        assert_eq!(items.len(), 2);
        assert!(!items[0].is_removal());
        assert!(items[1].is_removal());
    }

    #[tokio::test]
    async fn test_reads_content_by_content_id() {
        let f = fixture(DEFAULT_MAX_CONTENT_SIZE);
        f.source.insert("blobs/7f3a", "stored under a blob key");

        let content = ContentItem::new("docs/a.md", "blobs/7f3a");
        let result = f.process_content(&content).await;

        assert!(result.success, "{:?}", result.message);
        let artifact = f.artifacts.load(&result.artifact_ids[0]).await.unwrap().unwrap();
        assert_eq!(artifact.content_item_canonical_id, "docs/a.md");
        assert_eq!(artifact.text(), Some("stored under a blob key"));
    }

    #[tokio::test]
    async fn test_removal_evicts_dedup_entry() {
        let f = fixture(DEFAULT_MAX_CONTENT_SIZE);
        f.source.insert("a.txt", "same text");

        let first = f.process("a.txt").await;
        assert!(f.process("a.txt").await.message.unwrap().contains("unchanged"));

        let removal = ContentItem::new("a.txt", "a.txt").with_action(ContentAction::Remove);
        let removed = f.process_content(&removal).await;
        assert!(removed.success);
        assert!(removed.artifact_ids.is_empty());
        assert_eq!(removed.message.as_deref(), Some("Content item removed"));

        // Re-adding the same content is extracted again rather than reused
        let readded = f.process("a.txt").await;
        assert!(readded.success);
        assert!(readded.message.is_none());
        assert_eq!(readded.artifact_ids, first.artifact_ids);
    }

    #[tokio::test]
    async fn test_extracts_normalized_text() {
        let f = fixture(DEFAULT_MAX_CONTENT_SIZE);
        f.source.insert("docs/a.md", "line one\r\nline two\rline three");

        let result = f.process("docs/a.md").await;

        assert!(result.success);
        assert_eq!(result.artifact_ids.len(), 1);
        let artifact = f.artifacts.load(&result.artifact_ids[0]).await.unwrap().unwrap();
        assert_eq!(artifact.name, TEXT_ARTIFACT);
        assert_eq!(artifact.text(), Some("line one\nline two\nline three"));
    }

    #[tokio::test]
    async fn test_oversized_text_fails_without_stopping() {
        let f = fixture(5);
        f.source.insert("big.txt", "0123456789");

        let result = f.process("big.txt").await;

        assert!(!result.success);
        assert!(!result.stop_processing);
        assert!(result.message.unwrap().contains("maximum allowed size of 5"));
        assert!(f.artifacts.is_empty());
    }

    #[tokio::test]
    async fn test_binary_content_stops_processing() {
        let f = fixture(DEFAULT_MAX_CONTENT_SIZE);
        f.source.insert("image.png", vec![0xff, 0xfe, 0x00, 0x80]);

        let result = f.process("image.png").await;

        assert!(!result.success);
        assert!(result.stop_processing);
    }

    #[tokio::test]
    async fn test_missing_content_fails_item() {
        let f = fixture(DEFAULT_MAX_CONTENT_SIZE);

        let result = f.process("nowhere.txt").await;

        assert!(!result.success);
        assert!(!result.stop_processing);
    }

    #[tokio::test]
    async fn test_unchanged_content_reuses_artifact() {
        let f = fixture(DEFAULT_MAX_CONTENT_SIZE);
        f.source.insert("a.txt", "same text");

        let first = f.process("a.txt").await;
        let second = f.process("a.txt").await;

        assert_eq!(first.artifact_ids, second.artifact_ids);
        assert!(first.message.is_none());
        assert!(second.message.unwrap().contains("unchanged"));
        assert_eq!(f.artifacts.len(), 1);
    }

    #[tokio::test]
    async fn test_changed_content_gets_new_artifact() {
        let f = fixture(DEFAULT_MAX_CONTENT_SIZE);
        f.source.insert("a.txt", "first version");
        let first = f.process("a.txt").await;

        f.source.insert("a.txt", "second version");
        let second = f.process("a.txt").await;

        assert_ne!(first.artifact_ids, second.artifact_ids);
        assert_eq!(f.artifacts.len(), 2);
    }

    #[test]
    fn test_invalid_max_size_is_rejected() {
        let mut parameters = PluginParameters::new();
        parameters.insert("max_content_size".to_string(), serde_json::json!(0));

        let err = TextExtractionPlugin::from_parameters(
            Arc::new(InMemoryContentSource::new()),
            Arc::new(InMemoryArtifactStore::new()),
            Arc::new(DedupLedger::new()),
            &parameters,
        )
        .err()
        .unwrap();

        assert!(err.is_configuration());
    }
}
