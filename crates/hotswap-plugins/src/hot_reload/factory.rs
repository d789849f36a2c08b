//! Plugin factory registry
//!
//! Maps plugin names to constructors resolved at call time. Picking up new
//! plugin code means registering a new constructor under the same name and
//! then reloading the plugin.

use std::collections::HashMap;
use std::sync::Arc;

use hotswap_kernel::plugin::{PluginConfig, PluginResult, RuntimePlugin};
use parking_lot::RwLock;
use tracing::{debug, info};

/// Constructor for plugin instances
///
/// Called on a blocking worker thread for every load and reload, with the
/// configuration currently held for the plugin name.
pub trait PluginFactory: Send + Sync {
    fn create(&self, config: &PluginConfig) -> PluginResult<Box<dyn RuntimePlugin>>;
}

impl<F> PluginFactory for F
where
    F: Fn(&PluginConfig) -> PluginResult<Box<dyn RuntimePlugin>> + Send + Sync,
{
    fn create(&self, config: &PluginConfig) -> PluginResult<Box<dyn RuntimePlugin>> {
        self(config)
    }
}

/// Name-keyed registry of plugin factories
#[derive(Default)]
pub struct FactoryRegistry {
    factories: RwLock<HashMap<String, Arc<dyn PluginFactory>>>,
}

impl FactoryRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory, returning the one it replaced
    pub fn register<F: PluginFactory + 'static>(
        &self,
        name: &str,
        factory: F,
    ) -> Option<Arc<dyn PluginFactory>> {
        self.register_arc(name, Arc::new(factory))
    }

    /// Register a constructor closure, returning the factory it replaced
    pub fn register_fn<F>(&self, name: &str, constructor: F) -> Option<Arc<dyn PluginFactory>>
    where
        F: Fn(&PluginConfig) -> PluginResult<Box<dyn RuntimePlugin>> + Send + Sync + 'static,
    {
        self.register_arc(name, Arc::new(constructor))
    }

    /// Register a shared factory, returning the one it replaced
    pub fn register_arc(
        &self,
        name: &str,
        factory: Arc<dyn PluginFactory>,
    ) -> Option<Arc<dyn PluginFactory>> {
        let previous = self.factories.write().insert(name.to_string(), factory);
        if previous.is_some() {
            info!("Replaced factory for plugin: {}", name);
        } else {
            debug!("Registered factory for plugin: {}", name);
        }
        previous
    }

    /// Remove a factory
    pub fn unregister(&self, name: &str) -> Option<Arc<dyn PluginFactory>> {
        self.factories.write().remove(name)
    }

    /// Look up a factory
    pub fn get(&self, name: &str) -> Option<Arc<dyn PluginFactory>> {
        self.factories.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.read().contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for FactoryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactoryRegistry")
            .field("names", &self.names())
            .finish()
    }
}
