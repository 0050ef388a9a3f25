//! Repository layer
//!
//! Repositories abstract the external stores the engine depends on: the
//! pipeline state service and the artifact store. They contain no
//! business logic.
//!
//! All repositories are trait-based so other backends can be plugged in.

mod artifacts;
mod state;

// Re-export traits
pub use artifacts::ArtifactStore;
pub use state::PipelineStateService;

// Re-export implementations
pub use artifacts::InMemoryArtifactStore;
pub use state::InMemoryStateService;

pub use state::StateError;
