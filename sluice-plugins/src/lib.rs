//! Sluice Plugins
//!
//! Built-in stage plugins for Sluice pipelines:
//! - `text-extraction`: starting stage, content item to text artifact
//! - `text-partitioning`: downstream stage, text artifact to chunk artifacts

pub mod extraction;
pub mod partitioning;
pub mod source;

use sluice_core::DedupLedger;
use sluice_engine::{
    ArtifactStore, PluginCapabilities, PluginDescriptor, PluginError, PluginParameters,
    PluginRegistry, StagePlugin,
};
use std::sync::Arc;

pub use extraction::{TEXT_EXTRACTION, TextExtractionPlugin};
pub use partitioning::{TEXT_PARTITIONING, TextPartitioningPlugin};
pub use source::{ContentSource, InMemoryContentSource};

/// Registers the built-in plugins
///
/// The extraction plugin keeps its dedup ledger across runs resolved from
/// this registry.
pub fn register_builtin_plugins(
    registry: &mut PluginRegistry,
    source: Arc<dyn ContentSource>,
    artifacts: Arc<dyn ArtifactStore>,
) -> Result<(), PluginError> {
    let ledger = Arc::new(DedupLedger::new());
    let extraction_artifacts = Arc::clone(&artifacts);
    registry.register(
        PluginDescriptor::new(
            TEXT_EXTRACTION,
            "Reads content items as UTF-8 text",
            PluginCapabilities::STARTING,
        ),
        move |parameters: &PluginParameters| {
            let plugin = TextExtractionPlugin::from_parameters(
                Arc::clone(&source),
                Arc::clone(&extraction_artifacts),
                Arc::clone(&ledger),
                parameters,
            )?;
            Ok(Arc::new(plugin) as Arc<dyn StagePlugin>)
        },
    )?;

    registry.register(
        PluginDescriptor::new(
            TEXT_PARTITIONING,
            "Splits text into overlapping fixed-size chunks",
            PluginCapabilities::DOWNSTREAM,
        ),
        move |parameters: &PluginParameters| {
            let plugin = TextPartitioningPlugin::from_parameters(Arc::clone(&artifacts), parameters)?;
            Ok(Arc::new(plugin) as Arc<dyn StagePlugin>)
        },
    )?;

    Ok(())
}
