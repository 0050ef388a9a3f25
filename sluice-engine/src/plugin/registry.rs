//! Plugin registry
//!
//! Maps plugin names to factories. The registry is filled once at start-up
//! and then used to resolve each stage's plugin by name when a run starts.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::plugin::{PluginCapabilities, PluginError, PluginParameters, StagePlugin};

/// Builds a plugin instance from its merged stage parameters
pub type PluginFactory =
    Arc<dyn Fn(&PluginParameters) -> Result<Arc<dyn StagePlugin>, PluginError> + Send + Sync>;

/// Locates and instantiates stage plugins by name
pub trait PluginResolver: Send + Sync {
    /// Resolves a plugin, failing with a configuration error if it is unknown
    /// or its parameters are invalid
    fn resolve(
        &self,
        plugin_name: &str,
        parameters: &PluginParameters,
    ) -> Result<Arc<dyn StagePlugin>, PluginError>;
}

/// Description of a registered plugin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginDescriptor {
    pub name: String,
    pub description: String,
    pub capabilities: PluginCapabilities,
}

impl PluginDescriptor {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        capabilities: PluginCapabilities,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            capabilities,
        }
    }
}

struct Registration {
    descriptor: PluginDescriptor,
    factory: PluginFactory,
}

/// Name to factory table of available stage plugins
#[derive(Default)]
pub struct PluginRegistry {
    plugins: BTreeMap<String, Registration>,
}

impl PluginRegistry {
    /// Creates an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a plugin factory
    ///
    /// # Errors
    /// Returns `AlreadyRegistered` if the name is taken
    pub fn register<F>(&mut self, descriptor: PluginDescriptor, factory: F) -> Result<(), PluginError>
    where
        F: Fn(&PluginParameters) -> Result<Arc<dyn StagePlugin>, PluginError>
            + Send
            + Sync
            + 'static,
    {
        if self.plugins.contains_key(&descriptor.name) {
            return Err(PluginError::AlreadyRegistered(descriptor.name));
        }

        self.plugins.insert(
            descriptor.name.clone(),
            Registration {
                descriptor,
                factory: Arc::new(factory),
            },
        );
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.plugins.contains_key(name)
    }

    pub fn descriptor(&self, name: &str) -> Option<&PluginDescriptor> {
        self.plugins.get(name).map(|r| &r.descriptor)
    }

    /// Descriptors of all registered plugins, sorted by name
    pub fn descriptors(&self) -> Vec<&PluginDescriptor> {
        self.plugins.values().map(|r| &r.descriptor).collect()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

impl PluginResolver for PluginRegistry {
    fn resolve(
        &self,
        plugin_name: &str,
        parameters: &PluginParameters,
    ) -> Result<Arc<dyn StagePlugin>, PluginError> {
        let registration = self
            .plugins
            .get(plugin_name)
            .ok_or_else(|| PluginError::UnknownPlugin(plugin_name.to_string()))?;

        (registration.factory)(parameters)
    }
}
