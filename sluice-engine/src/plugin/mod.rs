//! Stage plugin contract
//!
//! A stage plugin supplies the behavior of one pipeline stage. The engine
//! calls it to create the stage's work items and to process each of them:
//!
//! - `get_starting_work_items`: first stage only, one item per content item
//!   (or fewer, if the plugin filters)
//! - `get_work_items`: later stages, maps the previous stage's artifacts
//!   into new items (1:1 by default)
//! - `process_work_item`: does the actual work for one item
//!
//! Whether a plugin may run as a starting or a downstream stage is declared
//! through [`PluginCapabilities`] and checked when a run's stages are resolved,
//! before anything executes.

mod error;
pub mod params;
mod registry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sluice_core::domain::artifact::ArtifactId;
use sluice_core::domain::content::ContentItem;
use sluice_core::domain::pipeline::PipelineDefinition;
use sluice_core::domain::run::PipelineRun;
use sluice_core::domain::work_item::WorkItem;
use uuid::Uuid;

use crate::repository::ArtifactStore;

pub use error::PluginError;
pub use params::PluginParameters;
pub use registry::{PluginDescriptor, PluginFactory, PluginRegistry, PluginResolver};

/// Position a stage occupies in a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageRole {
    Starting,
    Downstream,
}

/// Stage positions a plugin supports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginCapabilities {
    pub starting: bool,
    pub downstream: bool,
}

impl PluginCapabilities {
    pub const STARTING: Self = Self {
        starting: true,
        downstream: false,
    };
    pub const DOWNSTREAM: Self = Self {
        starting: false,
        downstream: true,
    };
    pub const ANY: Self = Self {
        starting: true,
        downstream: true,
    };

    pub fn supports(&self, role: StageRole) -> bool {
        match role {
            StageRole::Starting => self.starting,
            StageRole::Downstream => self.downstream,
        }
    }
}

impl std::fmt::Display for PluginCapabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.starting, self.downstream) {
            (true, true) => write!(f, "starting, downstream"),
            (true, false) => write!(f, "starting"),
            (false, true) => write!(f, "downstream"),
            (false, false) => write!(f, "none"),
        }
    }
}

/// Outcome of processing one work item
#[derive(Debug, Clone, PartialEq)]
pub struct PluginResult {
    pub success: bool,
    /// Fails the whole run; only meaningful together with `success = false`
    pub stop_processing: bool,
    /// Artifacts handed to the next stage on success
    pub artifact_ids: Vec<ArtifactId>,
    /// Failure reason or warning, attached to the work item
    pub message: Option<String>,
}

impl PluginResult {
    pub fn succeeded(artifact_ids: Vec<ArtifactId>) -> Self {
        Self {
            success: true,
            stop_processing: false,
            artifact_ids,
            message: None,
        }
    }

    /// Item failure that leaves the rest of the run alone
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            stop_processing: false,
            artifact_ids: Vec::new(),
            message: Some(message.into()),
        }
    }

    /// Item failure that also fails the run
    pub fn stop(message: impl Into<String>) -> Self {
        Self {
            stop_processing: true,
            ..Self::failed(message)
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Behavior of one pipeline stage
///
/// Implementations must be safe to call concurrently: the engine processes the
/// items of a stage in parallel against a single plugin instance.
#[async_trait]
pub trait StagePlugin: Send + Sync {
    /// Name the plugin is registered under
    fn name(&self) -> &str;

    /// Stage positions this plugin supports
    fn capabilities(&self) -> PluginCapabilities {
        PluginCapabilities::DOWNSTREAM
    }

    /// Creates the work items of a starting stage
    async fn get_starting_work_items(
        &self,
        content_items: &[ContentItem],
        run_id: Uuid,
        stage: &str,
    ) -> Result<Vec<WorkItem>, PluginError> {
        let _ = (content_items, run_id, stage);
        Err(PluginError::NotStartingStage {
            plugin: self.name().to_string(),
        })
    }

    /// Creates the work items of a downstream stage from the previous stage's artifacts
    ///
    /// Defaults to one item per inbound artifact, via [`one_work_item_per_artifact`].
    /// Without an artifact store the artifact id stands in for the content item
    /// canonical id; plugins holding one should map with
    /// [`one_work_item_per_stored_artifact`] instead.
    async fn get_work_items(
        &self,
        inbound_artifact_ids: &[ArtifactId],
        run_id: Uuid,
        stage: &str,
        previous_stage: &str,
    ) -> Result<Vec<WorkItem>, PluginError> {
        Ok(one_work_item_per_artifact(
            inbound_artifact_ids,
            run_id,
            stage,
            previous_stage,
        ))
    }

    /// Processes one work item
    ///
    /// Return `Ok` with `success = false` for an item-level failure. An `Err` is
    /// treated as unhandled and fails the run.
    async fn process_work_item(
        &self,
        definition: &PipelineDefinition,
        run: &PipelineRun,
        item: &WorkItem,
    ) -> Result<PluginResult, PluginError>;
}

/// The default 1:1 mapping from inbound artifacts to downstream work items
///
/// Each item's canonical id is the artifact id.
pub fn one_work_item_per_artifact(
    inbound_artifact_ids: &[ArtifactId],
    run_id: Uuid,
    stage: &str,
    previous_stage: &str,
) -> Vec<WorkItem> {
    inbound_artifact_ids
        .iter()
        .map(|artifact_id| {
            WorkItem::downstream(
                run_id,
                stage,
                previous_stage,
                artifact_id.clone(),
                artifact_id.as_str(),
            )
        })
        .collect()
}

/// The 1:1 mapping, with each item's canonical id read from its stored artifact
///
/// Artifacts missing from the store keep their id as the canonical id.
pub async fn one_work_item_per_stored_artifact(
    artifacts: &dyn ArtifactStore,
    inbound_artifact_ids: &[ArtifactId],
    run_id: Uuid,
    stage: &str,
    previous_stage: &str,
) -> Result<Vec<WorkItem>, PluginError> {
    let mut items = Vec::with_capacity(inbound_artifact_ids.len());
    for artifact_id in inbound_artifact_ids {
        let stored = artifacts
            .load(artifact_id)
            .await
            .map_err(|e| PluginError::from(anyhow::Error::new(e)))?;
        let canonical_id = match stored {
            Some(artifact) => artifact.content_item_canonical_id,
            None => artifact_id.as_str().to_string(),
        };
        items.push(WorkItem::downstream(
            run_id,
            stage,
            previous_stage,
            artifact_id.clone(),
            canonical_id,
        ));
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryArtifactStore;
    use sluice_core::domain::artifact::Artifact;
    use std::collections::HashMap;

    struct Passthrough;

    #[async_trait]
    impl StagePlugin for Passthrough {
        fn name(&self) -> &str {
            "passthrough"
        }

        async fn process_work_item(
            &self,
            _definition: &PipelineDefinition,
            _run: &PipelineRun,
            item: &WorkItem,
        ) -> Result<PluginResult, PluginError> {
            Ok(PluginResult::succeeded(
                item.input_artifact_id.clone().into_iter().collect(),
            ))
        }
    }

    #[tokio::test]
    async fn test_default_starting_work_items_is_a_configuration_error() {
        let plugin = Passthrough;
        let content = vec![ContentItem::new("doc", "blob")];

        let err = plugin
            .get_starting_work_items(&content, Uuid::new_v4(), "extract")
            .await
            .unwrap_err();

        assert!(matches!(err, PluginError::NotStartingStage { .. }));
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn test_default_work_items_map_one_to_one() {
        let plugin = Passthrough;
        let run_id = Uuid::new_v4();
        let inbound = vec![ArtifactId::new("a-1"), ArtifactId::new("a-2")];

        let items = plugin
            .get_work_items(&inbound, run_id, "partition", "extract")
            .await
            .unwrap();

        assert_eq!(items.len(), 2);
        for (item, artifact) in items.iter().zip(&inbound) {
            assert_eq!(item.run_id, run_id);
            assert_eq!(item.stage, "partition");
            assert_eq!(item.previous_stage.as_deref(), Some("extract"));
            assert_eq!(item.input_artifact_id.as_ref(), Some(artifact));
        }
        assert_ne!(items[0].id, items[1].id);
    }

    #[tokio::test]
    async fn test_stored_artifacts_keep_their_canonical_id() {
        let store = InMemoryArtifactStore::new();
        let stored = store
            .save(Artifact::new("docs/readme.md", "text", "hello"))
            .await
            .unwrap();
        let unknown = ArtifactId::new("artifact-elsewhere");

        let items = one_work_item_per_stored_artifact(
            &store,
            &[stored.clone(), unknown.clone()],
            Uuid::new_v4(),
            "partition",
            "extract",
        )
        .await
        .unwrap();

        assert_eq!(items[0].content_item_canonical_id, "docs/readme.md");
        assert_eq!(items[0].input_artifact_id, Some(stored));
        assert_eq!(items[1].content_item_canonical_id, unknown.as_str());
    }

    #[tokio::test]
    async fn test_process_passthrough() {
        let definition = PipelineDefinition::new(
            "p",
            vec![sluice_core::domain::pipeline::StageDefinition::new(
                "s",
                "passthrough",
            )],
        );
        let run = PipelineRun::new(&definition, HashMap::new());
        let item = WorkItem::downstream(run.id, "s", "prev", ArtifactId::new("a-1"), "doc");

        let result = Passthrough
            .process_work_item(&definition, &run, &item)
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.artifact_ids, vec![ArtifactId::new("a-1")]);
    }

    #[test]
    fn test_result_constructors() {
        assert!(!PluginResult::failed("x").stop_processing);
        let stop = PluginResult::stop("unsupported");
        assert!(!stop.success);
        assert!(stop.stop_processing);
        assert_eq!(stop.message.as_deref(), Some("unsupported"));
    }

    #[test]
    fn test_capabilities() {
        assert!(PluginCapabilities::STARTING.supports(StageRole::Starting));
        assert!(!PluginCapabilities::STARTING.supports(StageRole::Downstream));
        assert!(PluginCapabilities::ANY.supports(StageRole::Downstream));
        assert_eq!(PluginCapabilities::ANY.to_string(), "starting, downstream");
    }
}
