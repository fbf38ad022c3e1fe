//! # StripDeck Device Layer
//!
//! 控制面板硬件抽象层，提供统一的设备能力接口。
//!
//! 上层（Coordinator / Lifecycle Manager）只通过 [`Device`] trait 访问硬件，
//! 不直接接触 USB/HID 帧格式等传输细节。真实硬件后端和模拟器都实现同一个 trait。

use image::RgbaImage;
use thiserror::Error;

pub mod cancel;
pub mod geometry;
pub mod handler;
pub mod ids;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use cancel::CancelToken;
pub use geometry::{Point, Rect};
pub use handler::{
    ButtonPress, DialRotateHandler, DialSwitchHandler, HandlerError, HandlerResult, KeyHandler,
    TouchStripSwipeHandler, TouchStripTouchHandler, TouchType,
};
pub use ids::{DialId, KeyId};

#[cfg(any(test, feature = "mock"))]
pub use mock::{MockDevice, MockDeviceConfig};

/// 设备层统一错误类型
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Transport Error: {0}")]
    Transport(#[from] TransportError),
    #[error("Device is not open")]
    NotOpen,
    #[error("Device is already open")]
    AlreadyOpen,
    #[error("Device is already listening")]
    AlreadyListening,
    #[error("Device disconnected")]
    Disconnected,
    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),
    #[error("Invalid image size: expected {expected_width}x{expected_height}, got {width}x{height}")]
    InvalidImageSize {
        expected_width: u32,
        expected_height: u32,
        width: u32,
        height: u32,
    },
}

impl DeviceError {
    /// 是否为致命错误（设备已不可用，需要重连）
    pub fn is_fatal(&self) -> bool {
        match self {
            DeviceError::Disconnected | DeviceError::NotOpen => true,
            DeviceError::Transport(e) => e.is_fatal(),
            _ => false,
        }
    }
}

/// 传输层错误的结构化分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Unknown,
    NotFound,
    NoDevice,
    AccessDenied,
    Busy,
    Timeout,
    InvalidResponse,
    Backend,
}

/// 结构化传输层错误
#[derive(Error, Debug, Clone)]
#[error("{kind:?}: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind,
            TransportErrorKind::NoDevice
                | TransportErrorKind::AccessDenied
                | TransportErrorKind::NotFound
        )
    }
}

impl From<String> for TransportError {
    fn from(message: String) -> Self {
        Self::new(TransportErrorKind::Unknown, message)
    }
}

impl From<&str> for TransportError {
    fn from(message: &str) -> Self {
        Self::new(TransportErrorKind::Unknown, message)
    }
}

/// 设备能力接口
///
/// 所有方法均为 `&self`：实现内部自行同步，句柄以 `Arc<dyn Device>` 在
/// 事件循环线程、渲染线程和生命周期管理线程之间共享。
///
/// # 调用约定
///
/// - 所有 `add_*_handler` 必须在 [`listen`](Device::listen) 之前调用
/// - 处理器在事件循环线程上**同步**执行：阻塞的处理器会延迟同一来源的后续事件
///   （按键处理器会阻塞到松开，以获得按住时长）
pub trait Device: Send + Sync {
    fn open(&self) -> Result<(), DeviceError>;
    fn close(&self) -> Result<(), DeviceError>;
    fn is_open(&self) -> bool;

    fn model_name(&self) -> String;
    fn key_count(&self) -> u8;
    fn dial_count(&self) -> u8;
    fn touch_strip_supported(&self) -> bool;
    fn key_image_rect(&self) -> Result<Rect, DeviceError>;
    fn touch_strip_image_rect(&self) -> Result<Rect, DeviceError>;

    fn set_brightness(&self, percent: u8) -> Result<(), DeviceError>;
    fn set_key_image(&self, key: KeyId, image: &RgbaImage) -> Result<(), DeviceError>;
    fn set_touch_strip_image(&self, image: &RgbaImage) -> Result<(), DeviceError>;

    /// 将按键清为全黑
    fn clear_key(&self, key: KeyId) -> Result<(), DeviceError> {
        let rect = self.key_image_rect()?;
        self.set_key_image(key, &RgbaImage::new(rect.width, rect.height))
    }

    /// 设备上实际存在的按键（按编号升序）
    fn keys(&self) -> Vec<KeyId> {
        KeyId::ALL
            .into_iter()
            .take(usize::from(self.key_count()))
            .collect()
    }

    /// 设备上实际存在的旋钮（按编号升序）
    fn dials(&self) -> Vec<DialId> {
        DialId::ALL
            .into_iter()
            .take(usize::from(self.dial_count()))
            .collect()
    }

    fn add_key_handler(&self, key: KeyId, handler: KeyHandler) -> Result<(), DeviceError>;
    fn add_dial_rotate_handler(
        &self,
        dial: DialId,
        handler: DialRotateHandler,
    ) -> Result<(), DeviceError>;
    fn add_dial_switch_handler(
        &self,
        dial: DialId,
        handler: DialSwitchHandler,
    ) -> Result<(), DeviceError>;
    fn add_touch_strip_touch_handler(
        &self,
        handler: TouchStripTouchHandler,
    ) -> Result<(), DeviceError>;
    fn add_touch_strip_swipe_handler(
        &self,
        handler: TouchStripSwipeHandler,
    ) -> Result<(), DeviceError>;

    /// 运行设备事件循环（阻塞）
    ///
    /// 直到 `cancel` 被取消（返回 `Ok(())`）或设备断开/出错（返回 `Err`）。
    fn listen(&self, cancel: &CancelToken) -> Result<(), DeviceError>;
}
