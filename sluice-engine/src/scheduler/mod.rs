//! Scheduler layer for the engine
//!
//! This layer drives pipeline runs across their stages, one fully drained
//! wave at a time, and recovers work items abandoned by a crashed process.

pub mod orchestrator;
pub mod recovery;

pub use orchestrator::PipelineOrchestrator;
pub use recovery::{MAX_PROCESSING_ATTEMPTS, RecoveryReport, recover_stale_items};
