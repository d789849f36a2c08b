//! Typed errors for the plugin sub-system.

use thiserror::Error;

/// Errors raised by plugin code (construction and lifecycle hooks).
///
/// The hot-reload manager never lets these escape untranslated; each one
/// is wrapped into a load, reload or unload failure naming the plugin.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PluginError {
    /// Plugin could not be constructed by its factory.
    #[error("Plugin construction failed: {0}")]
    ConstructionFailed(String),

    /// Plugin failed inside `on_load`.
    #[error("Plugin load failed: {0}")]
    LoadFailed(String),

    /// Plugin failed inside `on_unload`.
    #[error("Plugin unload failed: {0}")]
    UnloadFailed(String),

    /// Exporting or importing restartable state failed.
    #[error("Plugin state error: {0}")]
    StateError(String),

    /// Plugin configuration is invalid or missing.
    #[error("Plugin configuration error: {0}")]
    ConfigError(String),

    /// A (de)serialization error surfaced during a plugin operation.
    #[error("Plugin serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },

    /// Catch-all for errors that don't fit the above categories.
    #[error("{0}")]
    Other(String),
}
