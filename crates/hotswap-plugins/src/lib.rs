//! 插件热重载模块
//!
//! 在 `hotswap-kernel` 的插件契约之上提供：
//! - 依赖声明解析与版本约束检查
//! - 依赖拓扑排序与循环检测
//! - 插件加载、卸载与原子热重载
//! - 重载期间的状态保存与回滚
//! - 内置示例插件

pub mod builtin;
pub mod hot_reload;

mod error_conversions;

pub use hotswap_kernel::{
    PluginConfig, PluginError, PluginMetadata, PluginResult, RuntimePlugin, StateMap,
};
pub use hot_reload::{HotReloadManager, ReloadError, ReloadResult};
