//! Modules available to stage scripts

pub mod artifact;
pub mod content;
pub mod log;
pub mod params;

pub use artifact::{ArtifactModule, EmittedArtifacts};
pub use content::ContentModule;
pub use log::{LogLevel, LogModule, LogSink, TracingLogSink};
pub use params::ParamsModule;
