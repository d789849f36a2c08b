//! Crate-level error types for `hotswap-kernel`.
//!
//! Provides a unified [`KernelError`] that composes errors from every
//! sub-module (plugin, config, IO, serialization) together with
//! [`error_stack::Report`] for rich, context-carrying error propagation.
//!
//! # Usage
//!
//! ```rust,ignore
//! use hotswap_kernel::error::{IntoKernelReport, KernelError, KernelResult};
//! use error_stack::ResultExt;
//!
//! fn read_manifest() -> KernelResult<String> {
//!     std::fs::read_to_string("plugins.toml")
//!         .map_err(KernelError::from)
//!         .into_report()
//!         .attach("reading plugins.toml")
//! }
//! ```

use error_stack::Report;
use thiserror::Error;

/// Crate-level error type for `hotswap-kernel`.
///
/// Wraps each sub-module's typed error via `#[from]` so that the `?`
/// operator converts them automatically.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KernelError {
    /// A plugin sub-system error.
    #[error("Plugin error: {0}")]
    Plugin(#[from] crate::plugin::PluginError),

    /// A configuration-related error (requires the `config` feature).
    #[cfg(feature = "config")]
    #[error("Config error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// An error raised by the hot-reload runtime.
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// A low-level I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A JSON (de)serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An internal / untyped error described by a message string.
    #[error("{0}")]
    Internal(String),
}

/// Convenience result alias using [`error_stack::Report`].
///
/// Equivalent to `Result<T, error_stack::Report<KernelError>>`.
pub type KernelResult<T> = Result<T, Report<KernelError>>;

/// Extension trait to convert `Result<T, KernelError>` into [`KernelResult<T>`].
pub trait IntoKernelReport<T> {
    /// Wrap the error in an `error_stack::Report`.
    fn into_report(self) -> KernelResult<T>;
}

impl<T> IntoKernelReport<T> for Result<T, KernelError> {
    #[inline]
    fn into_report(self) -> KernelResult<T> {
        self.map_err(Report::new)
    }
}
