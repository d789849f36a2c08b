use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::time::Duration;

pub mod error;
pub use error::PluginError;

/// Plugin execution result type using the typed [`PluginError`].
pub type PluginResult<T> = Result<T, PluginError>;

/// 插件可重启状态（热加载时跨实例传递）
/// Restartable plugin state carried across instances during hot-reload
pub type StateMap = HashMap<String, serde_json::Value>;

// ============================================================================
// 热加载相关定义 (Hot-reload related definitions)
// ============================================================================

/// 未知版本运算符的处理策略
/// Policy applied when a version constraint cannot be evaluated
///
/// Covers unrecognized comparison operators as well as version strings
/// whose components are not integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum UnknownOperatorPolicy {
    /// 视为满足
    /// Treat the constraint as satisfied
    #[default]
    PermitAlways,
    /// 视为不满足
    /// Treat the constraint as unsatisfied
    DenyAlways,
}

impl UnknownOperatorPolicy {
    /// Outcome of a constraint that could not be evaluated.
    pub fn outcome(self) -> bool {
        matches!(self, Self::PermitAlways)
    }
}

fn default_hook_timeout_ms() -> u64 {
    30_000
}

fn default_preserve_state() -> bool {
    true
}

fn default_event_capacity() -> usize {
    1024
}

/// 热加载配置
/// Hot-reload configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotReloadConfig {
    /// 插件钩子与构造的超时时间（毫秒）
    /// Timeout for plugin construction and lifecycle hooks, in milliseconds
    #[serde(default = "default_hook_timeout_ms")]
    pub hook_timeout_ms: u64,
    /// 是否在热加载时保存状态
    /// Whether reload carries state from the old instance to the new one
    #[serde(default = "default_preserve_state")]
    pub preserve_state: bool,
    /// 未知运算符策略
    /// Policy for constraints that cannot be evaluated
    #[serde(default)]
    pub unknown_operator_policy: UnknownOperatorPolicy,
    /// 事件通道容量
    /// Capacity of the reload event broadcast channel
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for HotReloadConfig {
    fn default() -> Self {
        Self {
            hook_timeout_ms: default_hook_timeout_ms(),
            preserve_state: default_preserve_state(),
            unknown_operator_policy: UnknownOperatorPolicy::default(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl HotReloadConfig {
    /// 创建新配置
    /// Create new configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// 钩子超时时间
    /// Hook timeout as a [`Duration`]
    pub fn hook_timeout(&self) -> Duration {
        Duration::from_millis(self.hook_timeout_ms)
    }

    /// 设置钩子超时时间
    /// Set hook timeout
    pub fn with_hook_timeout(mut self, timeout: Duration) -> Self {
        self.hook_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// 设置是否保存状态
    /// Set whether to preserve state
    pub fn with_preserve_state(mut self, preserve: bool) -> Self {
        self.preserve_state = preserve;
        self
    }

    /// 设置未知运算符策略
    /// Set unknown operator policy
    pub fn with_unknown_operator_policy(mut self, policy: UnknownOperatorPolicy) -> Self {
        self.unknown_operator_policy = policy;
        self
    }

    /// 设置事件通道容量
    /// Set event channel capacity
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }
}

/// 热加载事件
/// Hot-reload event
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum ReloadEvent {
    /// 插件已加载
    /// Plugin loaded
    Loaded { name: String, version: String },
    /// 插件加载失败
    /// Plugin load failed
    LoadFailed { name: String, error: String },
    /// 插件已卸载
    /// Plugin unloaded
    Unloaded { name: String },
    /// 热加载开始
    /// Hot-reload started
    ReloadStarted { name: String },
    /// 插件状态已保存
    /// Plugin state preserved
    StatePreserved { name: String, keys: usize },
    /// 插件状态已恢复
    /// Plugin state restored
    StateRestored { name: String },
    /// 热加载完成
    /// Hot-reload completed
    ReloadCompleted {
        name: String,
        previous_version: String,
        version: String,
        duration: Duration,
    },
    /// 热加载失败
    /// Hot-reload failed
    ReloadFailed { name: String, error: String },
    /// 回滚已触发
    /// Rollback triggered
    RollbackTriggered { name: String, reason: String },
}

/// 插件生命周期状态
/// Plugin lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[non_exhaustive]
pub enum LifecycleState {
    /// 未加载
    /// Not loaded
    #[default]
    Unloaded,
    /// 正在加载
    /// Loading in progress
    Loading,
    /// 已加载（就绪）
    /// Loaded and ready
    Loaded,
    /// 正在热加载
    /// Reload in progress, previous instance still live
    Reloading,
    /// 热加载失败，已回滚到旧实例
    /// Last reload failed, previous instance kept live
    RolledBack,
}

impl LifecycleState {
    /// 是否有存活实例
    /// Whether a live instance exists in this state
    pub fn is_live(self) -> bool {
        matches!(self, Self::Loaded | Self::Reloading | Self::RolledBack)
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleState::Unloaded => write!(f, "Unloaded"),
            LifecycleState::Loading => write!(f, "Loading"),
            LifecycleState::Loaded => write!(f, "Loaded"),
            LifecycleState::Reloading => write!(f, "Reloading"),
            LifecycleState::RolledBack => write!(f, "RolledBack"),
        }
    }
}

/// 可热加载插件 trait
/// Runtime contract every hot-reloadable plugin implements
///
/// The manager drives the hooks in a fixed order:
///
/// - load: construct → `on_load`
/// - reload: `get_state` (old) → construct → `restore_state` (new) →
///   `on_load` (new) → `on_unload` (old)
/// - unload: `on_unload`
///
/// `get_state` and `restore_state` have no-op defaults for plugins without
/// meaningful state.
#[async_trait::async_trait]
pub trait RuntimePlugin: Send + Sync {
    /// 获取插件元数据
    /// Get plugin metadata
    fn metadata(&self) -> &PluginMetadata;

    /// 获取插件名称（便捷方法）
    /// Get plugin name (convenience method)
    fn name(&self) -> &str {
        &self.metadata().name
    }

    /// 获取插件版本（便捷方法）
    /// Get plugin version (convenience method)
    fn version(&self) -> &str {
        &self.metadata().version
    }

    /// 插件加载（分配资源）
    /// Called once per instance before it becomes visible through the manager
    async fn on_load(&mut self) -> PluginResult<()>;

    /// 插件卸载（释放资源）
    /// Called once per instance when it is retired
    async fn on_unload(&mut self) -> PluginResult<()>;

    /// 导出可重启状态
    /// Export restartable state
    async fn get_state(&self) -> PluginResult<StateMap> {
        Ok(StateMap::new())
    }

    /// 导入可重启状态
    /// Import state exported by a predecessor instance
    async fn restore_state(&mut self, state: StateMap) -> PluginResult<()> {
        let _ = state;
        Ok(())
    }

    /// 转换为 Any（用于向下转型）
    /// Convert to Any (for downcasting)
    fn as_any(&self) -> &dyn Any;

    /// 转换为可变 Any
    /// Convert to mutable Any
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

// ============================================================================
// 插件元数据
// ============================================================================

/// 插件元数据
/// Plugin metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginMetadata {
    /// 插件唯一名称
    /// Unique plugin name
    pub name: String,
    /// 插件版本（点分整数）
    /// Plugin version, dotted integers
    pub version: String,
    /// 插件描述
    /// Plugin description
    pub description: String,
    /// 依赖声明，例如 `"storage>=1.2.0"`
    /// Dependency specifiers, e.g. `"storage>=1.2.0"`
    pub dependencies: Vec<String>,
    /// 插件能力标签
    /// Plugin capability tags
    pub capabilities: Vec<String>,
}

impl PluginMetadata {
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            description: String::new(),
            dependencies: Vec::new(),
            capabilities: Vec::new(),
        }
    }

    pub fn with_description(mut self, desc: &str) -> Self {
        self.description = desc.to_string();
        self
    }

    pub fn with_dependency(mut self, spec: &str) -> Self {
        self.dependencies.push(spec.to_string());
        self
    }

    pub fn with_capability(mut self, cap: &str) -> Self {
        self.capabilities.push(cap.to_string());
        self
    }

    pub fn has_capability(&self, cap: &str) -> bool {
        self.capabilities.iter().any(|c| c == cap)
    }
}

// ============================================================================
// 插件配置
// ============================================================================

/// 插件配置
/// Plugin configuration store handed to a factory at construction time
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginConfig {
    /// 配置项
    /// Configuration items
    pub settings: HashMap<String, serde_json::Value>,
}

impl PluginConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<T: Serialize>(mut self, key: &str, value: T) -> Self {
        self.set(key, value);
        self
    }

    pub fn get<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.settings
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// 获取配置，缺失或类型不符时返回默认值
    /// Get a value, falling back to `default` when absent or mistyped
    pub fn get_or<T: serde::de::DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.get(key).unwrap_or(default)
    }

    pub fn set<T: Serialize>(&mut self, key: &str, value: T) {
        if let Ok(v) = serde_json::to_value(value) {
            self.settings.insert(key.to_string(), v);
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.settings.contains_key(key)
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.get(key)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key)
    }
}
