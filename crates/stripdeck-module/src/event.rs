//! 模块可见的输入事件
//!
//! 设备层的按压交互被 Coordinator 拆成两个子事件：按下（立即）和松开（携带按住时长）。

use std::time::Duration;
use stripdeck_device::{Point, TouchType};

/// 按键事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    /// `true` 为按下，`false` 为松开
    pub pressed: bool,
    /// 按住时长（仅松开事件有意义）
    pub duration: Duration,
}

impl KeyEvent {
    pub fn pressed() -> Self {
        Self {
            pressed: true,
            duration: Duration::ZERO,
        }
    }

    pub fn released(duration: Duration) -> Self {
        Self {
            pressed: false,
            duration,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialEventKind {
    Rotate,
    Press,
    Release,
}

/// 旋钮事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DialEvent {
    pub kind: DialEventKind,
    /// 旋转量（正为顺时针，仅 `Rotate` 有意义）
    pub delta: i8,
    /// 按住时长（仅 `Release` 有意义）
    pub duration: Duration,
}

impl DialEvent {
    pub fn rotate(delta: i8) -> Self {
        Self {
            kind: DialEventKind::Rotate,
            delta,
            duration: Duration::ZERO,
        }
    }

    pub fn press() -> Self {
        Self {
            kind: DialEventKind::Press,
            delta: 0,
            duration: Duration::ZERO,
        }
    }

    pub fn release(duration: Duration) -> Self {
        Self {
            kind: DialEventKind::Release,
            delta: 0,
            duration,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchStripEventKind {
    Tap,
    LongTap,
    Swipe,
}

/// 触摸条事件
///
/// 对于滑动，`point` 与 `swipe_start` 相同。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TouchStripEvent {
    pub kind: TouchStripEventKind,
    pub point: Point,
    pub swipe_start: Point,
    pub swipe_end: Point,
}

impl TouchStripEvent {
    pub fn tap(point: Point) -> Self {
        Self {
            kind: TouchStripEventKind::Tap,
            point,
            swipe_start: Point::default(),
            swipe_end: Point::default(),
        }
    }

    pub fn long_tap(point: Point) -> Self {
        Self {
            kind: TouchStripEventKind::LongTap,
            ..Self::tap(point)
        }
    }

    pub fn swipe(from: Point, to: Point) -> Self {
        Self {
            kind: TouchStripEventKind::Swipe,
            point: from,
            swipe_start: from,
            swipe_end: to,
        }
    }

    /// 从设备层的触摸类型转换
    pub fn from_touch(touch: TouchType, point: Point) -> Self {
        match touch {
            TouchType::Short => Self::tap(point),
            TouchType::Long => Self::long_tap(point),
        }
    }
}
