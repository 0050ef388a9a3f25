//! Text partitioning stage
//!
//! Downstream stage that splits each inbound text artifact into fixed-size,
//! overlapping chunks and stores one artifact per chunk.

use async_trait::async_trait;
use sluice_core::domain::artifact::{Artifact, ArtifactId};
use sluice_core::domain::pipeline::PipelineDefinition;
use sluice_core::domain::run::PipelineRun;
use sluice_core::domain::work_item::WorkItem;
use sluice_engine::plugin::{one_work_item_per_stored_artifact, params};
use sluice_engine::{ArtifactStore, PluginError, PluginParameters, PluginResult, StagePlugin};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

pub const TEXT_PARTITIONING: &str = "text-partitioning";

pub const DEFAULT_CHUNK_SIZE: usize = 2000;
pub const DEFAULT_OVERLAP: usize = 100;

pub struct TextPartitioningPlugin {
    artifacts: Arc<dyn ArtifactStore>,
    chunk_size: usize,
    overlap: usize,
}

impl TextPartitioningPlugin {
    pub fn new(
        artifacts: Arc<dyn ArtifactStore>,
        chunk_size: usize,
        overlap: usize,
    ) -> Result<Self, PluginError> {
        if chunk_size == 0 {
            return Err(PluginError::invalid_parameter(
                "chunk_size",
                "must be greater than 0",
            ));
        }
        if overlap >= chunk_size {
            return Err(PluginError::invalid_parameter(
                "overlap",
                format!("must be smaller than chunk_size ({})", chunk_size),
            ));
        }

        Ok(Self {
            artifacts,
            chunk_size,
            overlap,
        })
    }

    /// Builds the plugin from stage parameters (`chunk_size`, `overlap`)
    pub fn from_parameters(
        artifacts: Arc<dyn ArtifactStore>,
        parameters: &PluginParameters,
    ) -> Result<Self, PluginError> {
        let chunk_size = params::get_usize(parameters, "chunk_size", DEFAULT_CHUNK_SIZE)?;
        let overlap = params::get_usize(parameters, "overlap", DEFAULT_OVERLAP)?;
        Self::new(artifacts, chunk_size, overlap)
    }
}

/// Splits text into windows of `chunk_size` characters, each starting
/// `chunk_size - overlap` characters after the previous one
pub fn split_chunks(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let total = chars.len();
    let step = chunk_size.saturating_sub(overlap).max(1);

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < total {
        let end = (start + chunk_size).min(total);
        chunks.push(chars[start..end].iter().collect());
        if end == total {
            break;
        }
        start += step;
    }

    chunks
}

#[async_trait]
impl StagePlugin for TextPartitioningPlugin {
    fn name(&self) -> &str {
        TEXT_PARTITIONING
    }

    async fn get_work_items(
        &self,
        inbound_artifact_ids: &[ArtifactId],
        run_id: Uuid,
        stage: &str,
        previous_stage: &str,
    ) -> Result<Vec<WorkItem>, PluginError> {
        one_work_item_per_stored_artifact(
            self.artifacts.as_ref(),
            inbound_artifact_ids,
            run_id,
            stage,
            previous_stage,
        )
        .await
    }

    async fn process_work_item(
        &self,
        _definition: &PipelineDefinition,
        _run: &PipelineRun,
        item: &WorkItem,
    ) -> Result<PluginResult, PluginError> {
        let Some(input_id) = &item.input_artifact_id else {
            return Ok(PluginResult::failed("Work item has no input artifact"));
        };

        let input = match self.artifacts.load(input_id).await {
            Ok(Some(input)) => input,
            Ok(None) => {
                return Ok(PluginResult::failed(format!(
                    "Input artifact {} not found",
                    input_id
                )));
            }
            Err(e) => {
                return Ok(PluginResult::failed(format!(
                    "Could not load input artifact {}: {}",
                    input_id, e
                )));
            }
        };

        let Some(text) = input.text() else {
            return Err(PluginError::content(format!(
                "Input artifact {} is not text",
                input_id
            )));
        };

        if text.is_empty() {
            return Ok(PluginResult::succeeded(Vec::new())
                .with_message("The content item has no content"));
        }

        let chunks = split_chunks(text, self.chunk_size, self.overlap);
        let mut artifact_ids = Vec::with_capacity(chunks.len());
        for (index, chunk) in chunks.into_iter().enumerate() {
            let artifact = Artifact::new(
                input.content_item_canonical_id.as_str(),
                format!("chunk-{:04}", index),
                chunk,
            );
            match self.artifacts.save(artifact).await {
                Ok(id) => artifact_ids.push(id),
                Err(e) => {
                    return Ok(PluginResult::failed(format!(
                        "Could not save chunk {} of {}: {}",
                        index, input.content_item_canonical_id, e
                    )));
                }
            }
        }

        debug!(
            "Partitioned '{}' into {} chunk(s)",
            input.content_item_canonical_id,
            artifact_ids.len()
        );

        Ok(PluginResult::succeeded(artifact_ids))
    }
}
