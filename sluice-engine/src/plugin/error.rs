//! Stage plugin errors

use thiserror::Error;

/// Errors raised by stage plugins and plugin resolution
#[derive(Debug, Error)]
pub enum PluginError {
    /// Plugin asked to produce starting work items without supporting it
    #[error("The {plugin} data pipeline stage plugin cannot be used for a starting stage")]
    NotStartingStage { plugin: String },

    /// Plugin asked to consume upstream artifacts without supporting it
    #[error("The {plugin} data pipeline stage plugin cannot be used for a downstream stage")]
    NotDownstreamStage { plugin: String },

    /// Stage parameter missing or malformed
    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    /// No plugin registered under this name
    #[error("No stage plugin is registered under the name '{0}'")]
    UnknownPlugin(String),

    /// A plugin with this name is already registered
    #[error("A stage plugin named '{0}' is already registered")]
    AlreadyRegistered(String),

    /// Content could not be read or decoded
    #[error("Content error: {0}")]
    Content(String),

    /// Anything else that went wrong inside the plugin
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PluginError {
    pub fn invalid_parameter(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn content(message: impl Into<String>) -> Self {
        Self::Content(message.into())
    }

    /// Check if this error is a pipeline configuration problem rather than a runtime failure
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::NotStartingStage { .. }
                | Self::NotDownstreamStage { .. }
                | Self::InvalidParameter { .. }
                | Self::UnknownPlugin(_)
                | Self::AlreadyRegistered(_)
        )
    }
}
