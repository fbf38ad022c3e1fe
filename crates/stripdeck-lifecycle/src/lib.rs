//! # StripDeck Device Lifecycle
//!
//! 负责检测、打开并在断开、休眠唤醒、枚举卡死等情况下恢复与设备的连接。
//!
//! ## 状态机
//!
//! ```text
//!        ┌──────────────────────── 断开 / 唤醒 ────────────────────────┐
//!        ▼                                                              │
//! WaitingForDevice ──获取成功──▶ Connecting ──稳定延迟──▶ Connected ──▶ Disconnecting
//!        │                                                              │
//!        └──────────────── 取消 ──────────────▶ Stopped ◀───── 取消 ─────┘
//! ```
//!
//! 每次连接都是一个全新的会话：新的 Coordinator、新构造的模块，不复用任何状态。

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use stripdeck_coordinator::CoordinatorError;
use thiserror::Error;

mod acquire;
pub mod hotplug;
mod manager;
mod provider;
pub mod signals;
pub mod watchdog;

pub use acquire::{AcquireError, DEFAULT_ACQUIRE_TIMEOUT, SingleFlightAcquirer};
pub use hotplug::{HotplugToken, HotplugWatch};
pub use manager::{LifecycleManager, SessionSetup};
pub use provider::DeviceProvider;
pub use signals::{LifecycleSignals, WakeDetector, signal_channel};
pub use watchdog::{JoinTimeout, WatchdogError, run_with_timeout};

/// 生命周期配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleConfig {
    /// 单次设备获取的硬超时
    pub acquire_timeout: Duration,
    /// 无热插拔通知时的轮询周期
    pub poll_interval: Duration,
    /// 唤醒后的重试次数
    pub wake_retry_count: u32,
    /// 唤醒后的重试间隔
    pub wake_retry_interval: Duration,
    /// 获取成功后、交给 Coordinator 之前的稳定延迟
    pub stabilize_delay: Duration,
    /// Coordinator 停止的超时
    pub coordinator_stop_timeout: Duration,
    /// 关闭设备前等待回调排空的延迟
    pub close_drain_delay: Duration,
    /// 关闭设备的超时
    pub close_timeout: Duration,
    /// 每个会话开始时设置的亮度（百分比）
    pub brightness: u8,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            poll_interval: Duration::from_secs(2),
            wake_retry_count: 10,
            wake_retry_interval: Duration::from_millis(500),
            stabilize_delay: Duration::from_millis(500),
            coordinator_stop_timeout: Duration::from_secs(2),
            close_drain_delay: Duration::from_millis(200),
            close_timeout: Duration::from_secs(3),
            brightness: 80,
        }
    }
}

/// 生命周期错误（只有不可恢复的情况才会让 `run` 返回错误）
#[derive(Error, Debug)]
pub enum LifecycleError {
    /// 会话装配失败（注册模块出错；装配期间的设备故障按断开处理，不会返回此错误）
    #[error("Session setup failed: {0}")]
    Setup(#[from] CoordinatorError),

    /// 无法创建后台线程
    #[error("Failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        source: WatchdogError,
    },
}

/// `run` 的结束方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// 正常关闭
    Shutdown,
    /// 关闭设备时收到退出信号且关闭仍未完成；调用方应立即退出进程
    ForcedExit,
}

/// 生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum LifecycleState {
    #[default]
    WaitingForDevice = 0,
    Connecting = 1,
    Connected = 2,
    Disconnecting = 3,
    Stopped = 4,
}

impl LifecycleState {
    /// 从 u8 转换
    ///
    /// 如果值无效，返回 WaitingForDevice。
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Connected,
            3 => Self::Disconnecting,
            4 => Self::Stopped,
            _ => Self::WaitingForDevice,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// 生命周期状态（原子版本，用于线程间共享）
#[derive(Debug, Default)]
pub struct AtomicLifecycleState {
    inner: AtomicU8,
}

impl AtomicLifecycleState {
    pub fn new(state: LifecycleState) -> Self {
        Self {
            inner: AtomicU8::new(state.as_u8()),
        }
    }

    pub fn get(&self) -> LifecycleState {
        LifecycleState::from_u8(self.inner.load(Ordering::Acquire))
    }

    pub fn set(&self, state: LifecycleState) {
        self.inner.store(state.as_u8(), Ordering::Release);
    }
}
