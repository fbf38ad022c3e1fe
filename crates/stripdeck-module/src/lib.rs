//! # StripDeck Module Interface
//!
//! 功能模块（天气、通知、媒体控制……）与 Coordinator 之间的契约。
//!
//! - [`Module`]：每个模块必须实现的能力接口
//! - [`OverlayProvider`]：可选的覆盖层能力，临时接管整个面板（全部按键、旋钮和触摸条）
//! - [`Resources`]：注册时分配给模块的硬件资源
//!
//! 模块以 `Arc<dyn Module>` 的形式被事件线程和渲染线程并发调用，
//! 所有方法都是 `&self`，模块自行负责内部状态的同步。

use image::RgbaImage;
use std::collections::HashMap;
use stripdeck_device::{CancelToken, DeviceError, DialId, KeyId};
use thiserror::Error;

pub mod base;
pub mod event;
pub mod overlay;
pub mod resources;
pub mod state;

pub use base::ModuleBase;
pub use event::{DialEvent, DialEventKind, KeyEvent, TouchStripEvent, TouchStripEventKind};
pub use overlay::{DEFAULT_OVERLAY_DURATION, OverlayTimer};
pub use resources::Resources;
pub use state::ModuleState;

/// 模块层错误类型
#[derive(Error, Debug)]
pub enum ModuleError {
    /// 初始化失败（模块在本会话内被排除）
    #[error("Module init failed: {0}")]
    Init(String),

    /// 缺少所需资源
    #[error("Missing resource: {0}")]
    MissingResource(&'static str),

    /// 模块已停止
    #[error("Module stopped")]
    Stopped,

    /// 设备错误
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),
}

/// 模块能力接口
///
/// 除 `id`/`init`/`stop` 外都有空的默认实现，模块只需覆盖自己关心的部分。
///
/// # 调用约定
///
/// - `init` 每个会话只调用一次；返回 `Err` 的模块在该会话内不再收到任何调用
/// - `handle_*` 可以阻塞，但不得为单个事件派生无界的并发任务
/// - `render_*` 由渲染线程周期调用，与事件处理并发
pub trait Module: Send + Sync {
    /// 稳定的模块标识
    fn id(&self) -> &str;

    /// 初始化
    ///
    /// # 参数
    ///
    /// - `ctx`: 会话取消令牌（会话结束时被取消）
    /// - `resources`: 分配给本模块的资源
    fn init(&self, ctx: CancelToken, resources: Resources) -> Result<(), ModuleError>;

    /// 停止（尽力而为，调用方负责施加超时）
    fn stop(&self) -> Result<(), ModuleError>;

    /// 渲染自有按键
    ///
    /// 未出现在返回值中的按键本周期保持不变。
    fn render_keys(&self) -> HashMap<KeyId, RgbaImage> {
        HashMap::new()
    }

    /// 渲染触摸条区域（尺寸为分配区域的尺寸）
    fn render_strip(&self) -> Option<RgbaImage> {
        None
    }

    fn handle_key(&self, _key: KeyId, _event: KeyEvent) -> Result<(), ModuleError> {
        Ok(())
    }

    fn handle_dial(&self, _dial: DialId, _event: DialEvent) -> Result<(), ModuleError> {
        Ok(())
    }

    fn handle_strip_touch(&self, _event: TouchStripEvent) -> Result<(), ModuleError> {
        Ok(())
    }

    /// 覆盖层能力（未实现覆盖层的模块返回 `None`）
    fn as_overlay(&self) -> Option<&dyn OverlayProvider> {
        None
    }
}

/// 覆盖层能力
///
/// 覆盖层激活期间，Coordinator 将**所有**输入事件路由到覆盖层，
/// 并只渲染覆盖层的画面。过期判断是惰性的：[`is_overlay_active`] 本身会清除过期状态。
///
/// [`is_overlay_active`]: OverlayProvider::is_overlay_active
pub trait OverlayProvider: Send + Sync {
    fn is_overlay_active(&self) -> bool;

    /// 渲染全部物理按键（不限于自有按键）
    fn render_overlay_keys(&self) -> HashMap<KeyId, RgbaImage>;

    /// 渲染整条触摸条
    fn render_overlay_strip(&self) -> Option<RgbaImage>;

    fn handle_overlay_key(&self, key: KeyId, event: KeyEvent) -> Result<(), ModuleError>;

    fn handle_overlay_dial(&self, dial: DialId, event: DialEvent) -> Result<(), ModuleError>;

    fn handle_overlay_strip_touch(&self, event: TouchStripEvent) -> Result<(), ModuleError>;
}
