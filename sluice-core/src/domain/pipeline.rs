//! Pipeline definition domain types

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::error::DomainError;

/// Immutable, versioned description of a pipeline
///
/// Authored in Lua or JSON and read-only to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
    pub stages: Vec<StageDefinition>,
}

/// One named step of a pipeline, backed by a stage plugin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageDefinition {
    pub name: String,
    /// Name the plugin is registered under
    pub plugin: String,
    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

impl PipelineDefinition {
    pub fn new(name: impl Into<String>, stages: Vec<StageDefinition>) -> Self {
        Self {
            name: name.into(),
            version: default_version(),
            description: None,
            stages,
        }
    }

    /// Checks the structural invariants of the definition
    ///
    /// Plugin names are only checked for presence here. Whether they resolve is
    /// decided by the engine's plugin resolver.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.name.trim().is_empty() {
            return Err(DomainError::EmptyPipelineName);
        }

        if self.stages.is_empty() {
            return Err(DomainError::NoStages(self.name.clone()));
        }

        let mut seen = HashSet::new();
        for (idx, stage) in self.stages.iter().enumerate() {
            if stage.name.trim().is_empty() {
                return Err(DomainError::EmptyStageName(idx));
            }
            if stage.plugin.trim().is_empty() {
                return Err(DomainError::MissingPlugin(stage.name.clone()));
            }
            if !seen.insert(stage.name.as_str()) {
                return Err(DomainError::DuplicateStage(stage.name.clone()));
            }
        }

        Ok(())
    }

    pub fn starting_stage(&self) -> Option<&StageDefinition> {
        self.stages.first()
    }

    pub fn stage(&self, name: &str) -> Option<&StageDefinition> {
        self.stages.iter().find(|s| s.name == name)
    }

    pub fn stage_index(&self, name: &str) -> Option<usize> {
        self.stages.iter().position(|s| s.name == name)
    }

    /// Returns the stage that follows `name`, if any
    pub fn next_stage(&self, name: &str) -> Option<&StageDefinition> {
        self.stage_index(name)
            .and_then(|idx| self.stages.get(idx + 1))
    }

    pub fn stage_names(&self) -> Vec<String> {
        self.stages.iter().map(|s| s.name.clone()).collect()
    }
}

impl StageDefinition {
    pub fn new(name: impl Into<String>, plugin: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            plugin: plugin.into(),
            parameters: HashMap::new(),
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }
}
