//! Built-in plugins
//!
//! Small stateful plugins that implement the full runtime contract and
//! carry their state across hot-reloads.

use std::any::Any;
use std::collections::HashMap;

use hotswap_kernel::plugin::{
    PluginConfig, PluginError, PluginMetadata, PluginResult, RuntimePlugin, StateMap,
};
use serde_json::json;
use tracing::{info, warn};

// ============================================================================
// 缓存插件
// ============================================================================

/// In-memory key-value cache with hit/miss accounting
pub struct CachePlugin {
    metadata: PluginMetadata,
    capacity: usize,
    entries: HashMap<String, serde_json::Value>,
    hits: u64,
    misses: u64,
    loaded: bool,
}

impl CachePlugin {
    pub const DEFAULT_CAPACITY: usize = 128;

    pub fn new(name: &str) -> Self {
        Self::from_config(name, &PluginConfig::new())
    }

    /// Build from configuration keys `version` and `capacity`.
    pub fn from_config(name: &str, config: &PluginConfig) -> Self {
        let version = config.get_or("version", "1.0.0".to_string());
        let mut capacity = config.get_or("capacity", Self::DEFAULT_CAPACITY);
        if capacity == 0 {
            warn!("Cache plugin {}: capacity 0 is invalid, using {}", name, Self::DEFAULT_CAPACITY);
            capacity = Self::DEFAULT_CAPACITY;
        }

        let metadata = PluginMetadata::new(name, &version)
            .with_description("In-memory key-value cache")
            .with_capability("cache")
            .with_capability("storage");

        Self {
            metadata,
            capacity,
            entries: HashMap::new(),
            hits: 0,
            misses: 0,
            loaded: false,
        }
    }

    pub fn with_dependency(mut self, spec: &str) -> Self {
        self.metadata = self.metadata.with_dependency(spec);
        self
    }

    pub fn get(&mut self, key: &str) -> Option<serde_json::Value> {
        match self.entries.get(key) {
            Some(value) => {
                self.hits += 1;
                Some(value.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Insert a value; returns false when the cache is full and the key is new.
    pub fn put(&mut self, key: &str, value: serde_json::Value) -> bool {
        if self.entries.len() >= self.capacity && !self.entries.contains_key(key) {
            return false;
        }
        self.entries.insert(key.to_string(), value);
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }
}

#[async_trait::async_trait]
impl RuntimePlugin for CachePlugin {
    fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    async fn on_load(&mut self) -> PluginResult<()> {
        self.loaded = true;
        info!(
            "Cache plugin {} v{} loaded ({} entries)",
            self.metadata.name,
            self.metadata.version,
            self.entries.len()
        );
        Ok(())
    }

    async fn on_unload(&mut self) -> PluginResult<()> {
        self.loaded = false;
        self.entries.clear();
        info!("Cache plugin {} unloaded", self.metadata.name);
        Ok(())
    }

    async fn get_state(&self) -> PluginResult<StateMap> {
        let mut state = StateMap::new();
        state.insert("entries".to_string(), serde_json::to_value(&self.entries)?);
        state.insert("hits".to_string(), json!(self.hits));
        state.insert("misses".to_string(), json!(self.misses));
        Ok(state)
    }

    async fn restore_state(&mut self, mut state: StateMap) -> PluginResult<()> {
        if let Some(entries) = state.remove("entries") {
            let mut entries: HashMap<String, serde_json::Value> = serde_json::from_value(entries)?;
            if entries.len() > self.capacity {
                warn!(
                    "Cache plugin {}: dropping {} entries above capacity",
                    self.metadata.name,
                    entries.len() - self.capacity
                );
                let mut keys: Vec<String> = entries.keys().cloned().collect();
                keys.sort();
                for key in keys.into_iter().skip(self.capacity) {
                    entries.remove(&key);
                }
            }
            self.entries = entries;
        }
        self.hits = state.get("hits").and_then(|v| v.as_u64()).unwrap_or(0);
        self.misses = state.get("misses").and_then(|v| v.as_u64()).unwrap_or(0);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ============================================================================
// 音频增益插件
// ============================================================================

/// Audio gain stage; counts processed frames across reloads
pub struct AudioGainPlugin {
    metadata: PluginMetadata,
    gain_db: f32,
    frames_processed: u64,
    loaded: bool,
}

impl AudioGainPlugin {
    pub const MIN_GAIN_DB: f32 = -60.0;
    pub const MAX_GAIN_DB: f32 = 24.0;

    pub fn new(name: &str) -> Self {
        Self::from_config(name, &PluginConfig::new())
    }

    /// Build from configuration keys `version` and `gain_db`.
    pub fn from_config(name: &str, config: &PluginConfig) -> Self {
        let version = config.get_or("version", "1.0.0".to_string());
        let requested = config.get_or("gain_db", 0.0f32);
        let gain_db = requested.clamp(Self::MIN_GAIN_DB, Self::MAX_GAIN_DB);
        if gain_db != requested {
            warn!(
                "Audio plugin {}: gain {} dB out of range, clamped to {} dB",
                name, requested, gain_db
            );
        }

        let metadata = PluginMetadata::new(name, &version)
            .with_description("Linear gain stage for PCM frames")
            .with_capability("audio");

        Self {
            metadata,
            gain_db,
            frames_processed: 0,
            loaded: false,
        }
    }

    pub fn with_dependency(mut self, spec: &str) -> Self {
        self.metadata = self.metadata.with_dependency(spec);
        self
    }

    pub fn gain_db(&self) -> f32 {
        self.gain_db
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    /// Apply the gain in place.
    pub fn process(&mut self, samples: &mut [f32]) -> PluginResult<()> {
        if !self.loaded {
            return Err(PluginError::Other(format!(
                "Audio plugin {} is not loaded",
                self.metadata.name
            )));
        }

        let factor = 10f32.powf(self.gain_db / 20.0);
        for sample in samples.iter_mut() {
            *sample = (*sample * factor).clamp(-1.0, 1.0);
        }
        self.frames_processed += samples.len() as u64;
        Ok(())
    }
}

#[async_trait::async_trait]
impl RuntimePlugin for AudioGainPlugin {
    fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    async fn on_load(&mut self) -> PluginResult<()> {
        self.loaded = true;
        info!("Audio plugin {} loaded at {} dB", self.metadata.name, self.gain_db);
        Ok(())
    }

    async fn on_unload(&mut self) -> PluginResult<()> {
        self.loaded = false;
        info!("Audio plugin {} unloaded", self.metadata.name);
        Ok(())
    }

    async fn get_state(&self) -> PluginResult<StateMap> {
        let mut state = StateMap::new();
        state.insert("frames_processed".to_string(), json!(self.frames_processed));
        Ok(state)
    }

    async fn restore_state(&mut self, state: StateMap) -> PluginResult<()> {
        // Gain always comes from the new configuration.
        self.frames_processed = state
            .get("frames_processed")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
