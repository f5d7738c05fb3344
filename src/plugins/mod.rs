//! The plugin registry and the built-in filter set.
//!
//! Plugins are looked up by name during graph construction. Each entry
//! pairs a factory with the plugin's published property schema; the
//! registry resolves user-supplied properties against the schema (warning
//! on unknown keys) before handing them to the factory.
//!
//! Discovery of shared-object plugins from a directory list happens in the
//! front-end; the engine only consumes registered factories.

mod clip;
mod memory;
mod opencl;
mod reinterpret;
mod sino;

pub use self::clip::ClipTask;
pub use self::memory::{Collected, CollectedFrame, CollectSink, Frame, MemSource, NullSink};
pub use self::opencl::OpenClTask;
pub use self::reinterpret::ReinterpretTask;
pub use self::sino::SinoGenerator;

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::task::{resolve_properties, Properties, PropertySpec, Task};

type Factory = Box<dyn Fn(&Properties) -> Result<Box<dyn Task>> + Send + Sync>;

struct PluginEntry {
    schema: Vec<PropertySpec>,
    factory: Factory,
}

/// Maps plugin names to task factories and their property schemas.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: HashMap<String, PluginEntry>,
}

impl PluginRegistry {
    /// An empty registry. Useful when every task is added programmatically.
    pub fn new() -> PluginRegistry {
        PluginRegistry::default()
    }

    /// A registry pre-loaded with the built-in filters.
    pub fn with_builtins() -> PluginRegistry {
        let mut registry = PluginRegistry::new();
        registry.register("mem-source", MemSource::schema(), |props| {
            Ok(Box::new(MemSource::from_properties(props)))
        });
        registry.register("null-sink", Vec::new(), |_| Ok(Box::new(NullSink::new())));
        registry.register("clip", ClipTask::schema(), |props| {
            Ok(Box::new(ClipTask::from_properties(props)))
        });
        registry.register("reinterpret", ReinterpretTask::schema(), |props| {
            Ok(Box::new(ReinterpretTask::from_properties(props)))
        });
        registry.register("opencl", OpenClTask::schema(), |props| {
            Ok(Box::new(OpenClTask::from_properties(props)))
        });
        registry.register("sino-generator", SinoGenerator::schema(), |props| {
            Ok(Box::new(SinoGenerator::from_properties(props)))
        });
        registry
    }

    /// Registers a plugin under `name`, replacing any previous entry.
    pub fn register<F>(&mut self, name: &str, schema: Vec<PropertySpec>, factory: F)
    where
        F: Fn(&Properties) -> Result<Box<dyn Task>> + Send + Sync + 'static,
    {
        self.plugins.insert(
            name.to_string(),
            PluginEntry {
                schema,
                factory: Box::new(factory),
            },
        );
    }

    pub fn contains(&self, name: &str) -> bool {
        self.plugins.contains_key(name)
    }

    /// The property schema published by `name`.
    pub fn schema(&self, name: &str) -> Option<&[PropertySpec]> {
        self.plugins.get(name).map(|entry| entry.schema.as_slice())
    }

    /// Builds a task instance, returning it together with the resolved
    /// property set (schema defaults overlaid with the given values).
    pub fn instantiate(
        &self,
        name: &str,
        properties: &Properties,
    ) -> Result<(Box<dyn Task>, Properties)> {
        let entry = self
            .plugins
            .get(name)
            .ok_or_else(|| Error::PluginNotFound(name.to_string()))?;
        let resolved = resolve_properties(name, &entry.schema, properties);
        let task = (entry.factory)(&resolved)?;
        Ok((task, resolved))
    }
}
