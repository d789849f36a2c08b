//! Hot-reload manager
//!
//! Owns the live instance table and keeps the dependency resolver in sync
//! with it. Lifecycle operations are serialized per plugin name; operations
//! on different names run concurrently.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use hotswap_kernel::plugin::{
    HotReloadConfig, LifecycleState, PluginConfig, PluginError, PluginMetadata, PluginResult,
    ReloadEvent, RuntimePlugin,
};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedMutexGuard, broadcast};
use tracing::{debug, error, info, warn};

use super::constraint::ConstraintParseError;
use super::factory::{FactoryRegistry, PluginFactory};
use super::resolver::{CycleError, DependencyReport, DependencyResolver, PluginDescriptor};
use super::state::StateSnapshot;

/// Shared handle to a live plugin instance.
///
/// A successful reload swaps the instance behind the handle, so handles
/// obtained before the reload observe the new instance.
pub type SharedPlugin = Arc<tokio::sync::Mutex<Box<dyn RuntimePlugin>>>;

/// Error-stack–backed result alias for batch lifecycle operations.
pub type ReloadReport<T> = Result<T, error_stack::Report<ReloadError>>;

/// Extension trait to convert `Result<T, ReloadError>` into [`ReloadReport<T>`].
pub trait IntoReloadReport<T> {
    /// Wrap the error in an `error_stack::Report`.
    fn into_report(self) -> ReloadReport<T>;
}

impl<T> IntoReloadReport<T> for Result<T, ReloadError> {
    #[inline]
    fn into_report(self) -> ReloadReport<T> {
        self.map_err(error_stack::Report::new)
    }
}

/// Failure raised by plugin code during construction or a lifecycle hook
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("{hook} failed: {source}")]
    Failed {
        hook: &'static str,
        #[source]
        source: PluginError,
    },

    #[error("{hook} panicked: {message}")]
    Panicked { hook: &'static str, message: String },

    #[error("{hook} timed out after {timeout:?}")]
    TimedOut {
        hook: &'static str,
        timeout: Duration,
    },
}

impl HookError {
    /// Name of the hook that failed (`construct`, `on_load`, ...)
    pub fn hook(&self) -> &'static str {
        match self {
            Self::Failed { hook, .. } | Self::Panicked { hook, .. } | Self::TimedOut { hook, .. } => {
                *hook
            }
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }
}

/// Reload error types
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ReloadError {
    #[error("already installed: {0}")]
    AlreadyLoaded(String),

    #[error("not found: {0} (no factory registered)")]
    NoFactory(String),

    #[error("invalid dependency specifier in {name}: {source}")]
    InvalidDependency {
        name: String,
        #[source]
        source: ConstraintParseError,
    },

    #[error("dependency unsatisfied: {}", .missing.join("; "))]
    DependencyUnsatisfied { name: String, missing: Vec<String> },

    #[error(transparent)]
    Cycle(#[from] CycleError),

    #[error("load failed: {name}: {source}")]
    LoadFailed {
        name: String,
        #[source]
        source: HookError,
    },

    #[error("reload failed: {name}: {source}")]
    ReloadFailed {
        name: String,
        #[source]
        source: HookError,
    },

    #[error("unload failed: {name}: {source}")]
    UnloadFailed {
        name: String,
        #[source]
        source: HookError,
    },
}

/// Outcome of a successful reload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReloadResult {
    /// Plugin name
    pub name: String,
    /// Version of the retired instance; `None` when the reload was a fresh load
    pub previous_version: Option<String>,
    /// Version of the instance now live
    pub version: String,
    /// Reload duration
    pub duration: Duration,
    /// Whether state was carried over
    pub state_preserved: bool,
    /// Whether the plugin was absent and got loaded instead
    pub fresh_load: bool,
}

/// Summary of a live plugin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginRecord {
    pub name: String,
    pub version: String,
    /// Dependency specifiers as declared
    pub dependencies: Vec<String>,
    pub capabilities: Vec<String>,
    pub status: LifecycleState,
    pub reload_count: u32,
    /// Load timestamp (seconds since the Unix epoch)
    pub loaded_at: u64,
}

/// Loaded plugin entry
struct LoadedPlugin {
    /// The live instance
    plugin: SharedPlugin,
    /// Metadata of the live instance
    metadata: PluginMetadata,
    /// Current lifecycle state
    status: LifecycleState,
    /// Successful reload counter
    reload_count: u32,
    /// Load timestamp
    loaded_at: u64,
}

impl LoadedPlugin {
    fn record(&self, name: &str) -> PluginRecord {
        PluginRecord {
            name: name.to_string(),
            version: self.metadata.version.clone(),
            dependencies: self.metadata.dependencies.clone(),
            capabilities: self.metadata.capabilities.clone(),
            status: self.status,
            reload_count: self.reload_count,
            loaded_at: self.loaded_at,
        }
    }
}

/// Instance table and resolver, always mutated together
#[derive(Default)]
struct PluginTables {
    instances: HashMap<String, LoadedPlugin>,
    resolver: DependencyResolver,
    /// Names with a load in progress
    loading: HashMap<String, LifecycleState>,
}

/// Successor instance built during a reload, not yet live
struct Successor {
    plugin: Box<dyn RuntimePlugin>,
    descriptor: PluginDescriptor,
    state_preserved: bool,
}

/// Lifecycle operation whose status must be undone if its future is dropped
#[derive(Clone, Copy)]
enum Pending {
    Load,
    Reload { prior: LifecycleState },
}

/// Clears the transient status of an in-flight operation on drop.
///
/// A load always removes its `Loading` marker. A reload that was not
/// settled puts the entry back to the status it had before `Reloading`;
/// the old instance stays in the table at every cancellation point.
struct PendingStatus<'a> {
    tables: &'a RwLock<PluginTables>,
    name: &'a str,
    pending: Pending,
    settled: bool,
}

impl<'a> PendingStatus<'a> {
    fn new(tables: &'a RwLock<PluginTables>, name: &'a str, pending: Pending) -> Self {
        Self {
            tables,
            name,
            pending,
            settled: false,
        }
    }

    fn settle(mut self) {
        self.settled = true;
    }
}

impl Drop for PendingStatus<'_> {
    fn drop(&mut self) {
        match self.pending {
            Pending::Load => {
                self.tables.write().loading.remove(self.name);
            }
            Pending::Reload { .. } if self.settled => {}
            Pending::Reload { prior } => {
                let mut tables = self.tables.write();
                if let Some(entry) = tables.instances.get_mut(self.name)
                    && entry.status == LifecycleState::Reloading
                {
                    warn!("Reload of {} was cancelled, keeping the live instance", self.name);
                    entry.status = prior;
                }
            }
        }
    }
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Hot-reload manager
pub struct HotReloadManager {
    /// Configuration
    config: HotReloadConfig,
    /// Plugin constructors
    factories: Arc<FactoryRegistry>,
    /// Configuration handed to each plugin's factory
    plugin_configs: RwLock<HashMap<String, PluginConfig>>,
    /// Live instances and registered descriptors
    tables: RwLock<PluginTables>,
    /// Per-name lifecycle locks
    name_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    /// Event broadcaster
    event_tx: broadcast::Sender<ReloadEvent>,
}

impl HotReloadManager {
    /// Create a new hot-reload manager
    pub fn new(config: HotReloadConfig) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));
        let tables = PluginTables {
            resolver: DependencyResolver::new().with_policy(config.unknown_operator_policy),
            ..PluginTables::default()
        };

        Self {
            factories: Arc::new(FactoryRegistry::new()),
            plugin_configs: RwLock::new(HashMap::new()),
            tables: RwLock::new(tables),
            name_locks: Mutex::new(HashMap::new()),
            event_tx,
            config,
        }
    }

    /// Use a shared factory registry
    pub fn with_factories(mut self, factories: Arc<FactoryRegistry>) -> Self {
        self.factories = factories;
        self
    }

    pub fn config(&self) -> &HotReloadConfig {
        &self.config
    }

    /// Get the factory registry
    pub fn factories(&self) -> Arc<FactoryRegistry> {
        self.factories.clone()
    }

    /// Register (or replace) the constructor for a plugin name
    pub fn register_factory<F>(&self, name: &str, constructor: F) -> Option<Arc<dyn PluginFactory>>
    where
        F: Fn(&PluginConfig) -> PluginResult<Box<dyn RuntimePlugin>> + Send + Sync + 'static,
    {
        self.factories.register_fn(name, constructor)
    }

    /// Set the configuration used for the next construction of `name`
    pub fn set_plugin_config(&self, name: &str, config: PluginConfig) {
        self.plugin_configs.write().insert(name.to_string(), config);
    }

    /// Configuration currently held for `name`
    pub fn plugin_config(&self, name: &str) -> PluginConfig {
        self.plugin_configs
            .read()
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    /// Subscribe to reload events
    pub fn subscribe(&self) -> broadcast::Receiver<ReloadEvent> {
        self.event_tx.subscribe()
    }

    fn emit(&self, event: ReloadEvent) {
        let _ = self.event_tx.send(event);
    }

    async fn lock_name(&self, name: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.name_locks.lock();
            locks.entry(name.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Release a name lock, dropping its map entry when nobody else holds or awaits it.
    fn release_name(&self, name: &str, guard: OwnedMutexGuard<()>) {
        drop(guard);
        let mut locks = self.name_locks.lock();
        if let Some(lock) = locks.get(name)
            && Arc::strong_count(lock) == 1
        {
            locks.remove(name);
        }
    }

    fn set_status(&self, name: &str, status: LifecycleState) {
        if let Some(entry) = self.tables.write().instances.get_mut(name) {
            debug!("Plugin {} state: {} -> {}", name, entry.status, status);
            entry.status = status;
        }
    }

    /// Run plugin code under the hook timeout, translating errors and panics.
    async fn run_hook<T, F>(&self, hook: &'static str, fut: F) -> Result<T, HookError>
    where
        F: Future<Output = PluginResult<T>>,
    {
        let timeout = self.config.hook_timeout();
        match tokio::time::timeout(timeout, AssertUnwindSafe(fut).catch_unwind()).await {
            Err(_) => Err(HookError::TimedOut { hook, timeout }),
            Ok(Err(payload)) => Err(HookError::Panicked {
                hook,
                message: panic_message(payload),
            }),
            Ok(Ok(Err(source))) => Err(HookError::Failed { hook, source }),
            Ok(Ok(Ok(value))) => Ok(value),
        }
    }

    fn factory_for(&self, name: &str) -> Result<Arc<dyn PluginFactory>, ReloadError> {
        self.factories
            .get(name)
            .ok_or_else(|| ReloadError::NoFactory(name.to_string()))
    }

    /// Construct a fresh instance on a blocking worker.
    ///
    /// A construction that outlives the timeout keeps running on its worker;
    /// its result is discarded.
    async fn construct(
        &self,
        name: &str,
        factory: Arc<dyn PluginFactory>,
    ) -> Result<Box<dyn RuntimePlugin>, HookError> {
        let hook = "construct";
        let timeout = self.config.hook_timeout();
        let config = self.plugin_config(name);
        let task = tokio::task::spawn_blocking(move || factory.create(&config));

        match tokio::time::timeout(timeout, task).await {
            Err(_) => Err(HookError::TimedOut { hook, timeout }),
            Ok(Err(join_error)) => {
                let message = if join_error.is_panic() {
                    panic_message(join_error.into_panic())
                } else {
                    join_error.to_string()
                };
                Err(HookError::Panicked { hook, message })
            }
            Ok(Ok(Err(source))) => Err(HookError::Failed { hook, source }),
            Ok(Ok(Ok(plugin))) => {
                if plugin.name() != name {
                    warn!(
                        "Factory for {} built a plugin named {}; registering it as {}",
                        name,
                        plugin.name(),
                        name
                    );
                }
                Ok(plugin)
            }
        }
    }

    fn describe(name: &str, plugin: &dyn RuntimePlugin) -> Result<PluginDescriptor, ReloadError> {
        let metadata = plugin.metadata();
        PluginDescriptor::new(name, &metadata.version, &metadata.dependencies).map_err(|source| {
            ReloadError::InvalidDependency {
                name: name.to_string(),
                source,
            }
        })
    }

    fn check_candidate(&self, descriptor: &PluginDescriptor) -> Result<(), ReloadError> {
        let report = self.tables.read().resolver.check_descriptor(descriptor);
        if report.satisfied {
            Ok(())
        } else {
            Err(ReloadError::DependencyUnsatisfied {
                name: descriptor.name.clone(),
                missing: report.missing,
            })
        }
    }

    // ========================================================================
    // Load
    // ========================================================================

    /// Load a plugin through its registered factory
    pub async fn load(&self, name: &str) -> Result<PluginRecord, ReloadError> {
        let guard = self.lock_name(name).await;
        let result = self.load_locked(name, None).await;
        self.release_name(name, guard);
        result
    }

    async fn load_locked(
        &self,
        name: &str,
        prebuilt: Option<Box<dyn RuntimePlugin>>,
    ) -> Result<PluginRecord, ReloadError> {
        {
            let mut tables = self.tables.write();
            if tables.instances.contains_key(name) {
                return Err(ReloadError::AlreadyLoaded(name.to_string()));
            }
            tables
                .loading
                .insert(name.to_string(), LifecycleState::Loading);
        }

        let pending = PendingStatus::new(&self.tables, name, Pending::Load);

        info!("Loading plugin: {}", name);
        let result = self.try_load(name, prebuilt).await;
        drop(pending);

        match &result {
            Ok(record) => {
                info!("Plugin {} v{} loaded", name, record.version);
                self.emit(ReloadEvent::Loaded {
                    name: name.to_string(),
                    version: record.version.clone(),
                });
            }
            Err(e) => {
                error!("Failed to load plugin {}: {}", name, e);
                self.emit(ReloadEvent::LoadFailed {
                    name: name.to_string(),
                    error: e.to_string(),
                });
            }
        }

        result
    }

    async fn try_load(
        &self,
        name: &str,
        prebuilt: Option<Box<dyn RuntimePlugin>>,
    ) -> Result<PluginRecord, ReloadError> {
        let load_failed = |source| ReloadError::LoadFailed {
            name: name.to_string(),
            source,
        };

        let mut plugin = match prebuilt {
            Some(plugin) => plugin,
            None => {
                let factory = self.factory_for(name)?;
                self.construct(name, factory).await.map_err(load_failed)?
            }
        };

        // Registration waits until dependencies and on_load have passed.
        let descriptor = Self::describe(name, plugin.as_ref())?;
        self.check_candidate(&descriptor)?;

        self.run_hook("on_load", plugin.on_load())
            .await
            .map_err(load_failed)?;

        let entry = LoadedPlugin {
            metadata: plugin.metadata().clone(),
            plugin: Arc::new(tokio::sync::Mutex::new(plugin)),
            status: LifecycleState::Loaded,
            reload_count: 0,
            loaded_at: unix_now(),
        };
        let record = entry.record(name);

        let mut tables = self.tables.write();
        tables.resolver.register_descriptor(descriptor);
        tables.instances.insert(name.to_string(), entry);

        Ok(record)
    }

    /// Load every factory-registered plugin that is not live, in dependency order.
    ///
    /// Stops at the first failure; plugins loaded before it stay loaded.
    pub async fn load_all(&self) -> ReloadReport<Vec<String>> {
        use error_stack::ResultExt;

        let pending: Vec<String> = {
            let tables = self.tables.read();
            self.factories
                .names()
                .into_iter()
                .filter(|name| !tables.instances.contains_key(name))
                .collect()
        };

        let mut planner = self.tables.read().resolver.clone();
        let mut candidates: HashMap<String, Box<dyn RuntimePlugin>> = HashMap::new();

        for name in pending {
            let factory = self
                .factory_for(&name)
                .into_report()
                .attach(format!("resolving factory for {name}"))?;
            let plugin = self
                .construct(&name, factory)
                .await
                .map_err(|source| ReloadError::LoadFailed {
                    name: name.clone(),
                    source,
                })
                .into_report()
                .attach(format!("constructing {name} for batch load"))?;
            let descriptor = Self::describe(&name, plugin.as_ref())
                .into_report()
                .attach(format!("describing {name}"))?;

            planner.register_descriptor(descriptor);
            candidates.insert(name, plugin);
        }

        let order = planner
            .resolve_load_order()
            .map_err(ReloadError::from)
            .into_report()
            .attach("ordering plugins for batch load")?;

        let mut loaded = Vec::with_capacity(candidates.len());
        for name in order {
            let Some(plugin) = candidates.remove(&name) else {
                continue;
            };
            let guard = self.lock_name(&name).await;
            let result = self.load_locked(&name, Some(plugin)).await;
            self.release_name(&name, guard);
            result
                .into_report()
                .attach(format!("loading {name} in dependency order"))?;
            loaded.push(name);
        }

        info!("Batch load complete: {:?}", loaded);
        Ok(loaded)
    }

    // ========================================================================
    // Unload
    // ========================================================================

    /// Unload a plugin.
    ///
    /// Returns `Ok(false)` if the plugin is not live. If `on_unload` fails the
    /// instance stays live and registered.
    pub async fn unload(&self, name: &str) -> Result<bool, ReloadError> {
        let guard = self.lock_name(name).await;
        let result = self.unload_locked(name).await;
        self.release_name(name, guard);
        result
    }

    async fn unload_locked(&self, name: &str) -> Result<bool, ReloadError> {
        let (plugin, dependents) = {
            let tables = self.tables.read();
            match tables.instances.get(name) {
                Some(entry) => (entry.plugin.clone(), tables.resolver.dependents_of(name)),
                None => return Ok(false),
            }
        };

        info!("Unloading plugin: {}", name);
        if !dependents.is_empty() {
            warn!("Unloading {} while {:?} depend on it", name, dependents);
        }

        {
            let mut instance = plugin.lock().await;
            self.run_hook("on_unload", instance.on_unload())
                .await
                .map_err(|source| {
                    error!("Failed to unload plugin {}: {}", name, source);
                    ReloadError::UnloadFailed {
                        name: name.to_string(),
                        source,
                    }
                })?;
        }

        {
            let mut tables = self.tables.write();
            tables.instances.remove(name);
            tables.resolver.unregister(name);
        }

        self.emit(ReloadEvent::Unloaded {
            name: name.to_string(),
        });
        Ok(true)
    }

    /// Unload every live plugin, dependents first, and clear both tables.
    ///
    /// Returns the names whose `on_unload` failed; they are dropped anyway.
    pub async fn shutdown(&self) -> Vec<String> {
        info!("Shutting down hot-reload manager");

        let mut order = {
            let tables = self.tables.read();
            tables
                .resolver
                .resolve_load_order()
                .unwrap_or_else(|_| tables.resolver.names())
        };
        order.reverse();

        let mut failed = Vec::new();
        for name in order {
            let guard = self.lock_name(&name).await;
            let plugin = self
                .tables
                .read()
                .instances
                .get(&name)
                .map(|entry| entry.plugin.clone());

            if let Some(plugin) = plugin {
                let mut instance = plugin.lock().await;
                match self.run_hook("on_unload", instance.on_unload()).await {
                    Ok(()) => self.emit(ReloadEvent::Unloaded { name: name.clone() }),
                    Err(e) => {
                        warn!("Failed to unload plugin {} during shutdown: {}", name, e);
                        failed.push(name.clone());
                    }
                }
            }
            self.release_name(&name, guard);
        }

        let mut tables = self.tables.write();
        tables.instances.clear();
        tables.resolver.clear();

        failed
    }

    // ========================================================================
    // Reload
    // ========================================================================

    /// Replace a live plugin with a freshly constructed instance.
    ///
    /// The new instance is built, given the old instance's state and loaded
    /// while the old one stays live. Only then is the old instance retired
    /// and swapped out. On failure the old instance remains authoritative
    /// and the plugin is marked [`LifecycleState::RolledBack`]. Reloading a
    /// plugin that is not live loads it.
    ///
    /// Dropping the returned future before it completes leaves the previous
    /// instance live with its prior status.
    pub async fn reload(&self, name: &str) -> Result<ReloadResult, ReloadError> {
        let guard = self.lock_name(name).await;
        let result = self.reload_locked(name).await;
        self.release_name(name, guard);
        result
    }

    async fn reload_locked(&self, name: &str) -> Result<ReloadResult, ReloadError> {
        let live = self.tables.read().instances.get(name).map(|entry| {
            (
                entry.plugin.clone(),
                entry.metadata.version.clone(),
                entry.status,
            )
        });

        let Some((plugin, previous_version, prior)) = live else {
            let start = Instant::now();
            let record = self.load_locked(name, None).await?;
            return Ok(ReloadResult {
                name: name.to_string(),
                previous_version: None,
                version: record.version,
                duration: start.elapsed(),
                state_preserved: false,
                fresh_load: true,
            });
        };

        info!("Reloading plugin: {}", name);
        let start = Instant::now();
        self.set_status(name, LifecycleState::Reloading);
        let pending = PendingStatus::new(&self.tables, name, Pending::Reload { prior });
        self.emit(ReloadEvent::ReloadStarted {
            name: name.to_string(),
        });

        // Held for the whole attempt so the snapshot stays consistent.
        let mut current = plugin.lock().await;

        let successor = match self.build_successor(name, &**current).await {
            Ok(successor) => successor,
            Err(e) => {
                drop(current);
                error!("Reload of {} failed, keeping v{}: {}", name, previous_version, e);
                self.set_status(name, LifecycleState::RolledBack);
                pending.settle();
                self.emit(ReloadEvent::ReloadFailed {
                    name: name.to_string(),
                    error: e.to_string(),
                });
                self.emit(ReloadEvent::RollbackTriggered {
                    name: name.to_string(),
                    reason: e.to_string(),
                });
                return Err(e);
            }
        };

        if let Err(e) = self.run_hook("on_unload", current.on_unload()).await {
            warn!("Retiring previous instance of {} failed: {}", name, e);
        }

        let Successor {
            plugin: new_plugin,
            descriptor,
            state_preserved,
        } = successor;
        let metadata = new_plugin.metadata().clone();
        let retired = std::mem::replace(&mut *current, new_plugin);
        drop(current);
        drop(retired);

        {
            let mut guard = self.tables.write();
            let tables = &mut *guard;
            if let Some(entry) = tables.instances.get_mut(name) {
                entry.metadata = metadata.clone();
                entry.status = LifecycleState::Loaded;
                entry.reload_count += 1;
                tables.resolver.register_descriptor(descriptor);
            }
        }
        pending.settle();

        let duration = start.elapsed();
        info!(
            "Plugin {} reloaded v{} -> v{} in {:?}",
            name, previous_version, metadata.version, duration
        );
        self.emit(ReloadEvent::ReloadCompleted {
            name: name.to_string(),
            previous_version: previous_version.clone(),
            version: metadata.version.clone(),
            duration,
        });

        Ok(ReloadResult {
            name: name.to_string(),
            previous_version: Some(previous_version),
            version: metadata.version,
            duration,
            state_preserved,
            fresh_load: false,
        })
    }

    /// Snapshot → construct → check → restore → on_load, leaving `current` untouched.
    async fn build_successor(
        &self,
        name: &str,
        current: &dyn RuntimePlugin,
    ) -> Result<Successor, ReloadError> {
        let reload_failed = |source| ReloadError::ReloadFailed {
            name: name.to_string(),
            source,
        };

        let snapshot = if self.config.preserve_state {
            let data = self
                .run_hook("get_state", current.get_state())
                .await
                .map_err(reload_failed)?;
            let snapshot = StateSnapshot::new(name, current.version(), data);
            self.emit(ReloadEvent::StatePreserved {
                name: name.to_string(),
                keys: snapshot.len(),
            });
            Some(snapshot)
        } else {
            None
        };

        let factory = self.factory_for(name)?;
        let mut plugin = self
            .construct(name, factory)
            .await
            .map_err(reload_failed)?;

        let descriptor = Self::describe(name, plugin.as_ref())?;
        self.check_candidate(&descriptor)?;

        let broken = self.tables.read().resolver.broken_dependents(&descriptor);
        if !broken.is_empty() {
            warn!(
                "{} v{} no longer satisfies dependents {:?}",
                name, descriptor.version, broken
            );
        }

        let state_preserved = snapshot.is_some();
        if let Some(snapshot) = snapshot {
            if !snapshot.is_compatible(plugin.version()) {
                warn!(
                    "Carrying state of {} across a major version change ({} -> {})",
                    name,
                    snapshot.plugin_version,
                    plugin.version()
                );
            }
            self.run_hook("restore_state", plugin.restore_state(snapshot.into_data()))
                .await
                .map_err(reload_failed)?;
            self.emit(ReloadEvent::StateRestored {
                name: name.to_string(),
            });
        }

        self.run_hook("on_load", plugin.on_load())
            .await
            .map_err(reload_failed)?;

        Ok(Successor {
            plugin,
            descriptor,
            state_preserved,
        })
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Check the direct dependencies of a live plugin
    pub fn check_dependencies(&self, name: &str) -> DependencyReport {
        self.tables.read().resolver.check_dependencies(name)
    }

    /// Initialization order of the live plugins
    pub fn load_order(&self) -> Result<Vec<String>, CycleError> {
        self.tables.read().resolver.resolve_load_order()
    }

    /// Direct dependencies of every plugin reachable from `name`
    pub fn dependency_tree(&self, name: &str) -> std::collections::BTreeMap<String, Vec<String>> {
        self.tables.read().resolver.dependency_tree(name)
    }

    /// Records of all live plugins, sorted by name
    pub fn list(&self) -> Vec<PluginRecord> {
        let tables = self.tables.read();
        let mut records: Vec<PluginRecord> = tables
            .instances
            .iter()
            .map(|(name, entry)| entry.record(name))
            .collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        records
    }

    /// Names of all live plugins, sorted
    pub fn list_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.read().instances.keys().cloned().collect();
        names.sort();
        names
    }

    /// Record of a live plugin
    pub fn record(&self, name: &str) -> Option<PluginRecord> {
        self.tables
            .read()
            .instances
            .get(name)
            .map(|entry| entry.record(name))
    }

    /// Shared handle to a live plugin
    pub fn get(&self, name: &str) -> Option<SharedPlugin> {
        self.tables
            .read()
            .instances
            .get(name)
            .map(|entry| entry.plugin.clone())
    }

    /// Lifecycle state of a plugin name
    pub fn status(&self, name: &str) -> LifecycleState {
        let tables = self.tables.read();
        if let Some(entry) = tables.instances.get(name) {
            return entry.status;
        }
        tables
            .loading
            .get(name)
            .copied()
            .unwrap_or(LifecycleState::Unloaded)
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.tables.read().instances.contains_key(name)
    }

    /// Whether the resolver table holds `name`
    pub fn is_registered(&self, name: &str) -> bool {
        self.tables.read().resolver.contains(name)
    }

    pub fn len(&self) -> usize {
        self.tables.read().instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.read().instances.is_empty()
    }
}

impl Default for HotReloadManager {
    fn default() -> Self {
        Self::new(HotReloadConfig::default())
    }
}
