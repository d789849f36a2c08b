//! Plugin state snapshots
//!
//! Carries restartable state from a live instance to its successor during
//! hot-reload. A snapshot lives only for the duration of one reload attempt.

use hotswap_kernel::plugin::StateMap;
use serde::{Deserialize, Serialize};

/// State exported by a plugin instance at the start of a reload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Plugin name
    pub plugin_name: String,
    /// Version of the instance that produced the snapshot
    pub plugin_version: String,
    /// Capture timestamp (seconds since the Unix epoch)
    pub timestamp: u64,
    /// Exported state
    pub data: StateMap,
}

impl StateSnapshot {
    /// Create a snapshot from exported state
    pub fn new(plugin_name: &str, plugin_version: &str, data: StateMap) -> Self {
        Self {
            plugin_name: plugin_name.to_string(),
            plugin_version: plugin_version.to_string(),
            timestamp: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            data,
        }
    }

    /// Empty snapshot, used when state preservation is disabled
    pub fn empty(plugin_name: &str, plugin_version: &str) -> Self {
        Self::new(plugin_name, plugin_version, StateMap::new())
    }

    /// Add state data
    pub fn with_data<T: Serialize>(mut self, key: &str, value: &T) -> Self {
        if let Ok(json_value) = serde_json::to_value(value) {
            self.data.insert(key.to_string(), json_value);
        }
        self
    }

    /// Get state data
    pub fn get<T: for<'de> Deserialize<'de>>(&self, key: &str) -> Option<T> {
        self.data
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Check if snapshot is compatible with a plugin version (same major)
    pub fn is_compatible(&self, plugin_version: &str) -> bool {
        let snapshot_major = self.plugin_version.split('.').next();
        let plugin_major = plugin_version.split('.').next();
        snapshot_major == plugin_major
    }

    /// Hand the captured state to the successor instance
    pub fn into_data(self) -> StateMap {
        self.data
    }
}
