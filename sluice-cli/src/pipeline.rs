//! Pipeline definition loading

use anyhow::{Context, Result};
use sluice_core::domain::pipeline::PipelineDefinition;
use std::path::Path;

/// Loads a pipeline definition from a `.lua` or `.json` file
pub fn load_pipeline(path: &Path) -> Result<PipelineDefinition> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read pipeline file: {}", path.display()))?;

    match path.extension().and_then(|e| e.to_str()) {
        Some("lua") => sluice_lua::parse_pipeline_definition(&source)
            .with_context(|| format!("Failed to parse Lua pipeline: {}", path.display())),
        Some("json") => {
            let definition: PipelineDefinition = serde_json::from_str(&source)
                .with_context(|| format!("Failed to parse JSON pipeline: {}", path.display()))?;
            definition
                .validate()
                .with_context(|| format!("Invalid pipeline '{}'", definition.name))?;
            Ok(definition)
        }
        _ => anyhow::bail!(
            "Unsupported pipeline file '{}': expected a .lua or .json file",
            path.display()
        ),
    }
}
