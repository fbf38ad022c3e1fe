//! 像素几何类型

/// 触摸点坐标（触摸条像素坐标系，原点在左上角）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// 轴对齐矩形（左上角 + 尺寸）
///
/// 宽或高为 0 的矩形视为空矩形，用于表示"未分配触摸条区域"。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// 原点在 (0, 0) 的矩形
    pub const fn from_size(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// 右边界（不含）
    pub const fn right(&self) -> u32 {
        self.x.saturating_add(self.width)
    }

    /// 下边界（不含）
    pub const fn bottom(&self) -> u32 {
        self.y.saturating_add(self.height)
    }

    pub fn contains(&self, point: Point) -> bool {
        if self.is_empty() || point.x < 0 || point.y < 0 {
            return false;
        }
        let (x, y) = (point.x as u32, point.y as u32);
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }
}
