//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod plugins;
mod run;
mod validate;

pub use run::RunArgs;

use anyhow::{Context, Result};
use clap::Subcommand;
use sluice_engine::{ArtifactStore, PluginRegistry};
use sluice_plugins::ContentSource;
use std::path::PathBuf;
use std::sync::Arc;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run a pipeline over a directory of content
    Run(RunArgs),
    /// Check that a pipeline parses and every stage resolves
    Validate {
        /// Pipeline definition (.lua or .json)
        #[arg(short, long)]
        pipeline: PathBuf,
    },
    /// List the available stage plugins
    Plugins,
}

pub async fn handle_command(command: Commands) -> Result<()> {
    match command {
        Commands::Run(args) => run::run_pipeline(args).await,
        Commands::Validate { pipeline } => validate::validate_pipeline(&pipeline),
        Commands::Plugins => plugins::list_plugins(),
    }
}

/// Registry with every plugin the CLI ships
pub fn build_registry(
    source: Arc<dyn ContentSource>,
    artifacts: Arc<dyn ArtifactStore>,
) -> Result<PluginRegistry> {
    let mut registry = PluginRegistry::new();
    sluice_plugins::register_builtin_plugins(&mut registry, source, Arc::clone(&artifacts))
        .context("Failed to register built-in plugins")?;
    sluice_lua::register_lua_plugin(&mut registry, artifacts)
        .context("Failed to register the Lua plugin")?;
    Ok(registry)
}
