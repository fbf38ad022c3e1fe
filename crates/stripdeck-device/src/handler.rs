//! 设备事件处理器类型
//!
//! 处理器在设备事件循环线程上同步调用。注册后由设备持有，
//! 因此使用 `Arc<dyn Fn>`：事件分发时先克隆出处理器再释放内部锁，避免持锁回调。

use crate::geometry::Point;
use crate::ids::{DialId, KeyId};
use std::sync::Arc;
use std::time::Duration;

/// 处理器返回的错误（由设备事件循环记录日志，不会中断循环）
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// 处理器返回值
pub type HandlerResult = Result<(), HandlerError>;

/// 一次按下交互（按键或旋钮按压）
///
/// 处理器可以调用 [`wait_for_release`](ButtonPress::wait_for_release) 阻塞到松开，
/// 以获得按住时长。
pub trait ButtonPress {
    /// 阻塞直到松开，返回按住时长
    fn wait_for_release(&self) -> Duration;
}

/// 触摸条点击类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchType {
    /// 短按
    Short,
    /// 长按
    Long,
}

pub type KeyHandler = Arc<dyn Fn(KeyId, &dyn ButtonPress) -> HandlerResult + Send + Sync>;

pub type DialRotateHandler = Arc<dyn Fn(DialId, i8) -> HandlerResult + Send + Sync>;

pub type DialSwitchHandler = Arc<dyn Fn(DialId, &dyn ButtonPress) -> HandlerResult + Send + Sync>;

pub type TouchStripTouchHandler = Arc<dyn Fn(TouchType, Point) -> HandlerResult + Send + Sync>;

/// 参数依次为滑动起点、终点
pub type TouchStripSwipeHandler = Arc<dyn Fn(Point, Point) -> HandlerResult + Send + Sync>;
