//! # StripDeck Coordinator
//!
//! 单个设备会话的核心：持有所有模块、分配资源、路由输入事件、周期渲染。
//!
//! ## 会话流程
//!
//! ```text
//! register_module × N ──▶ start(ctx) ──(阻塞)──▶ ctx 取消 / listen 出错 ──▶ stop()
//!                          ├─ init 所有模块（失败者排除）
//!                          ├─ 为每个物理按键/旋钮/触摸条安装处理器
//!                          ├─ 后台线程：device.listen()
//!                          └─ 后台线程：渲染循环
//! ```
//!
//! ## 线程模型
//!
//! - 事件处理器在设备事件循环线程上同步执行
//! - 渲染循环在独立线程上按固定周期执行
//! - 所有权映射、失败集合和覆盖层状态由**同一把**读写锁保护；
//!   调用模块代码前总是先释放锁

use std::time::Duration;
use stripdeck_device::DeviceError;
use thiserror::Error;

mod coordinator;
pub mod render;
mod routing;

pub use coordinator::Coordinator;

/// 默认渲染周期
pub const DEFAULT_RENDER_INTERVAL: Duration = Duration::from_millis(500);

/// Coordinator 配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// 渲染周期（启动时额外立即渲染一次）
    pub render_interval: Duration,
    /// 覆盖层结束时是否清空所有按键
    pub overlay_clear_on_exit: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            render_interval: DEFAULT_RENDER_INTERVAL,
            overlay_clear_on_exit: true,
        }
    }
}

/// Coordinator 错误类型
#[derive(Error, Debug)]
pub enum CoordinatorError {
    /// 设备错误（含 listen 返回的断开错误）
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    /// 已经启动（注册必须在启动之前完成，且每个实例只能启动一次）
    #[error("Coordinator already started")]
    AlreadyStarted,

    /// 设备事件循环线程意外退出
    #[error("Device listen thread exited without a result")]
    ListenThreadLost,

    /// 线程创建失败
    #[error("Failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        source: std::io::Error,
    },
}

impl CoordinatorError {
    /// 是否由设备断开/失效引起
    pub fn is_device_lost(&self) -> bool {
        match self {
            CoordinatorError::Device(e) => e.is_fatal(),
            CoordinatorError::ListenThreadLost => true,
            _ => false,
        }
    }
}
