//! Domain validation errors

use thiserror::Error;

/// Errors raised when a domain invariant would be violated
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    /// Pipeline definition has no name
    #[error("Pipeline definition must have a name")]
    EmptyPipelineName,

    /// Pipeline definition has no stages
    #[error("Pipeline '{0}' must have at least one stage")]
    NoStages(String),

    /// Two stages share a name
    #[error("Stage name '{0}' is used more than once")]
    DuplicateStage(String),

    /// Stage has an empty name
    #[error("Stage at position {0} has an empty name")]
    EmptyStageName(usize),

    /// Stage does not name a plugin
    #[error("Stage '{0}' does not name a plugin")]
    MissingPlugin(String),

    /// Status change that the state machine does not allow
    #[error("Invalid {entity} status transition from {from} to {to}")]
    InvalidTransition {
        /// Kind of record being transitioned
        entity: &'static str,
        /// Current status
        from: String,
        /// Requested status
        to: String,
    },
}
