//! 守护进程配置文件
//!
//! TOML 格式，所有字段可选（缺省取库的默认值），时长以毫秒为单位：
//!
//! ```toml
//! [lifecycle]
//! poll_interval_ms = 2000
//! brightness = 80
//!
//! [coordinator]
//! render_interval_ms = 500
//!
//! [wake]
//! enabled = true
//! ```
//!
//! 查找顺序：`--config` 参数 → `$STRIPDECK_CONFIG` → `<config_dir>/stripdeck/config.toml`。

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use stripdeck_coordinator::CoordinatorConfig;
use stripdeck_lifecycle::LifecycleConfig;

/// 覆盖配置文件路径的环境变量
pub const CONFIG_ENV: &str = "STRIPDECK_CONFIG";

/// 默认配置文件路径
pub fn default_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_ENV)
        && !path.is_empty()
    {
        return Some(PathBuf::from(path));
    }
    dirs::config_dir().map(|dir| dir.join("stripdeck").join("config.toml"))
}

fn ms(duration: Duration) -> u64 {
    duration.as_millis() as u64
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleSection {
    pub acquire_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub wake_retry_count: u32,
    pub wake_retry_interval_ms: u64,
    pub stabilize_delay_ms: u64,
    pub coordinator_stop_timeout_ms: u64,
    pub close_drain_delay_ms: u64,
    pub close_timeout_ms: u64,
    pub brightness: u8,
}

impl Default for LifecycleSection {
    fn default() -> Self {
        let config = LifecycleConfig::default();
        Self {
            acquire_timeout_ms: ms(config.acquire_timeout),
            poll_interval_ms: ms(config.poll_interval),
            wake_retry_count: config.wake_retry_count,
            wake_retry_interval_ms: ms(config.wake_retry_interval),
            stabilize_delay_ms: ms(config.stabilize_delay),
            coordinator_stop_timeout_ms: ms(config.coordinator_stop_timeout),
            close_drain_delay_ms: ms(config.close_drain_delay),
            close_timeout_ms: ms(config.close_timeout),
            brightness: config.brightness,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorSection {
    pub render_interval_ms: u64,
    pub overlay_clear_on_exit: bool,
}

impl Default for CoordinatorSection {
    fn default() -> Self {
        let config = CoordinatorConfig::default();
        Self {
            render_interval_ms: ms(config.render_interval),
            overlay_clear_on_exit: config.overlay_clear_on_exit,
        }
    }
}

/// 休眠唤醒检测
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WakeSection {
    pub enabled: bool,
    pub check_interval_ms: u64,
    /// 墙上时钟比单调时钟多走超过该值即视为唤醒
    pub threshold_ms: u64,
}

impl Default for WakeSection {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_ms: 2000,
            threshold_ms: 5000,
        }
    }
}

/// 虚拟设备（无硬件时的默认设备来源）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VirtualDeckSection {
    pub model_name: String,
    /// 通过热插拔注册表投递到达通知（否则依赖轮询）
    pub hotplug: bool,
    /// 周期性模拟拔插，0 表示关闭
    pub replug_interval_ms: u64,
}

impl Default for VirtualDeckSection {
    fn default() -> Self {
        Self {
            model_name: "Virtual Deck Plus".to_string(),
            hotplug: true,
            replug_interval_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// 日志文件目录（每日轮转），缺省只输出到 stderr
    pub dir: Option<PathBuf>,
}

/// 守护进程配置
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub lifecycle: LifecycleSection,
    pub coordinator: CoordinatorSection,
    pub wake: WakeSection,
    pub virtual_deck: VirtualDeckSection,
    pub log: LogSection,
}

impl DaemonConfig {
    /// 读取配置文件；文件不存在时返回默认配置
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// 写入配置文件（自动创建父目录）
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        fs::write(path, self.to_toml()?)
            .with_context(|| format!("Failed to write config file {}", path.display()))?;
        Ok(())
    }

    pub fn lifecycle_config(&self) -> LifecycleConfig {
        let section = &self.lifecycle;
        LifecycleConfig {
            acquire_timeout: Duration::from_millis(section.acquire_timeout_ms),
            poll_interval: Duration::from_millis(section.poll_interval_ms),
            wake_retry_count: section.wake_retry_count,
            wake_retry_interval: Duration::from_millis(section.wake_retry_interval_ms),
            stabilize_delay: Duration::from_millis(section.stabilize_delay_ms),
            coordinator_stop_timeout: Duration::from_millis(section.coordinator_stop_timeout_ms),
            close_drain_delay: Duration::from_millis(section.close_drain_delay_ms),
            close_timeout: Duration::from_millis(section.close_timeout_ms),
            brightness: section.brightness.min(100),
        }
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            render_interval: Duration::from_millis(self.coordinator.render_interval_ms.max(1)),
            overlay_clear_on_exit: self.coordinator.overlay_clear_on_exit,
        }
    }

    pub fn replug_interval(&self) -> Option<Duration> {
        match self.virtual_deck.replug_interval_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}
