//! `sluice plugins`: lists the registered stage plugins

use anyhow::Result;
use colored::*;
use sluice_engine::InMemoryArtifactStore;
use sluice_plugins::InMemoryContentSource;
use std::sync::Arc;

use super::build_registry;

pub fn list_plugins() -> Result<()> {
    let registry = build_registry(
        Arc::new(InMemoryContentSource::new()),
        Arc::new(InMemoryArtifactStore::new()),
    )?;

    println!(
        "{:<20} {:<22} {}",
        "NAME".bold(),
        "CAPABILITIES".bold(),
        "DESCRIPTION".bold()
    );
    for descriptor in registry.descriptors() {
        println!(
            "{:<20} {:<22} {}",
            descriptor.name.cyan(),
            descriptor.capabilities.to_string(),
            descriptor.description.dimmed()
        );
    }

    Ok(())
}
