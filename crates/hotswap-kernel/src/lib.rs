// plugin module
pub mod plugin;
pub use plugin::*;

// error module
pub mod error;

// config module (file loading, env substitution)
#[cfg(feature = "config")]
pub mod config;
