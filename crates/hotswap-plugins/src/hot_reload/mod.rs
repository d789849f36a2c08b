//! Hot-reload plugin support module
//!
//! Provides hot-reload capabilities for plugins:
//! - Dependency specifier parsing and version checks
//! - Dependency resolution and load ordering
//! - Factory-based plugin construction
//! - State preservation during reload
//! - Atomic replacement with rollback on failure

mod constraint;
mod factory;
mod manager;
mod resolver;
mod state;

pub use constraint::{
    ConstraintOp, ConstraintParseError, VersionConstraint, compare_versions, parse_version,
};
pub use factory::{FactoryRegistry, PluginFactory};
pub use manager::{
    HookError, HotReloadManager, IntoReloadReport, PluginRecord, ReloadError, ReloadReport,
    ReloadResult, SharedPlugin,
};
pub use resolver::{CycleError, DependencyReport, DependencyResolver, PluginDescriptor};
pub use state::StateSnapshot;

// Re-export kernel hot reload definitions
pub use hotswap_kernel::plugin::{
    HotReloadConfig, LifecycleState, ReloadEvent, UnknownOperatorPolicy,
};
