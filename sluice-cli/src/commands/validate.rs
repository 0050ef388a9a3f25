//! `sluice validate`: parses a pipeline and resolves each stage's plugin

use anyhow::{Context, Result};
use colored::*;
use sluice_engine::{
    EngineConfig, InMemoryArtifactStore, InMemoryStateService, PipelineOrchestrator,
};
use sluice_plugins::InMemoryContentSource;
use std::path::Path;
use std::sync::Arc;

use super::build_registry;
use crate::pipeline::load_pipeline;

pub fn validate_pipeline(path: &Path) -> Result<()> {
    let definition = load_pipeline(path)?;

    let registry = build_registry(
        Arc::new(InMemoryContentSource::new()),
        Arc::new(InMemoryArtifactStore::new()),
    )?;
    let orchestrator = PipelineOrchestrator::new(
        Arc::new(InMemoryStateService::new()),
        Arc::new(registry),
        EngineConfig::default(),
    );
    orchestrator
        .validate_definition(&definition)
        .with_context(|| format!("Pipeline '{}' is not runnable", definition.name))?;

    println!("{}", "✓ Pipeline is valid".green().bold());
    println!("  Name:    {}", definition.name.bold());
    println!("  Version: {}", definition.version.dimmed());
    for (idx, stage) in definition.stages.iter().enumerate() {
        println!(
            "  {}. {} {}",
            idx + 1,
            stage.name.cyan(),
            format!("({})", stage.plugin).dimmed()
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_validate_resolves_stages() {
        let dir = tempfile::tempdir().unwrap();
        let valid = dir.path().join("valid.lua");
        fs::write(
            &valid,
            r#"
            return {
                name = "ingest",
                stages = {
                    { name = "extract", plugin = "text-extraction" },
                    { name = "partition", plugin = "text-partitioning" },
                },
            }
        "#,
        )
        .unwrap();
        assert!(validate_pipeline(&valid).is_ok());

        let reversed = dir.path().join("reversed.lua");
        fs::write(
            &reversed,
            r#"
            return {
                name = "reversed",
                stages = {
                    { name = "partition", plugin = "text-partitioning" },
                    { name = "extract", plugin = "text-extraction" },
                },
            }
        "#,
        )
        .unwrap();
        assert!(validate_pipeline(&reversed).is_err());
    }
}
