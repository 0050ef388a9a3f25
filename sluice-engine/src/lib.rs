//! Sluice Engine
//!
//! The stage execution engine for Sluice data pipelines.
//!
//! Architecture:
//! - Configuration: Engine settings from code or environment
//! - Repositories: State service and artifact store traits with in-memory backends
//! - Plugins: The stage plugin contract and the name-to-factory registry
//! - Services: Bounded-concurrency dispatch of one stage's work items
//! - Scheduler: Stage-by-stage run orchestration and stale item recovery
//!
//! A run is executed as a sequence of waves, one per stage. A stage's work
//! items are only created once every item of the previous stage is terminal.

pub mod config;
pub mod error;
pub mod plugin;
pub mod repository;
pub mod retry;
pub mod scheduler;
pub mod service;

pub use config::{EngineConfig, FailureThreshold, StalePolicy};
pub use error::{EngineError, Result};
pub use plugin::{
    PluginCapabilities, PluginDescriptor, PluginError, PluginParameters, PluginRegistry,
    PluginResolver, PluginResult, StagePlugin,
};
pub use repository::{
    ArtifactStore, InMemoryArtifactStore, InMemoryStateService, PipelineStateService, StateError,
};
pub use retry::RetryPolicy;
pub use scheduler::PipelineOrchestrator;
