//! Error types for the engine

use sluice_core::DomainError;
use thiserror::Error;
use uuid::Uuid;

use crate::plugin::PluginError;
use crate::repository::StateError;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors surfaced by the orchestrator
#[derive(Debug, Error)]
pub enum EngineError {
    /// Bad pipeline definition, unresolvable plugin or misplaced plugin.
    /// The run never leaves `Created` because of one of these.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// No run with this id in the state service
    #[error("Pipeline run not found: {0}")]
    RunNotFound(Uuid),

    /// State service failure that outlived its retries
    #[error("State service error: {0}")]
    State(#[from] StateError),

    /// Unhandled plugin failure while creating a stage's work items
    #[error("Plugin error in stage '{stage}': {source}")]
    Plugin {
        stage: String,
        #[source]
        source: PluginError,
    },

    /// Rejected status transition
    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl EngineError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Wraps a plugin error, promoting configuration problems to `Configuration`
    pub fn from_plugin(stage: &str, source: PluginError) -> Self {
        if source.is_configuration() {
            Self::Configuration(format!("stage '{}': {}", stage, source))
        } else {
            Self::Plugin {
                stage: stage.to_string(),
                source,
            }
        }
    }

    /// Check if this error is a configuration error
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    /// Check if the underlying state failure may go away on its own
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::State(e) if e.is_transient())
    }

    /// Check if this error is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::RunNotFound(_))
    }
}
