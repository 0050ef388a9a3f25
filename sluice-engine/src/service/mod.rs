//! Service layer
//!
//! Services contain the execution logic of the engine. The wave dispatcher
//! runs the work items of one stage against the stage's plugin and records
//! every outcome through the state service.

mod dispatch;

pub use dispatch::{StageContext, WaveDispatcher, WaveOutcome, collect_artifacts};
