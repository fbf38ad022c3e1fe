//! 物理资源标识
//!
//! 按键与旋钮的数量由硬件决定（8 个按键、4 个旋钮），编号从 1 开始。

use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::fmt;

/// 物理按键编号（Key1-Key8）
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, IntoPrimitive, TryFromPrimitive,
)]
#[repr(u8)]
pub enum KeyId {
    Key1 = 1,
    Key2 = 2,
    Key3 = 3,
    Key4 = 4,
    Key5 = 5,
    Key6 = 6,
    Key7 = 7,
    Key8 = 8,
}

impl KeyId {
    /// 全部按键（升序）
    pub const ALL: [KeyId; 8] = [
        KeyId::Key1,
        KeyId::Key2,
        KeyId::Key3,
        KeyId::Key4,
        KeyId::Key5,
        KeyId::Key6,
        KeyId::Key7,
        KeyId::Key8,
    ];

    /// 从 0 开始的下标（Key1 → 0）
    pub fn index(self) -> usize {
        usize::from(u8::from(self)) - 1
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key{}", u8::from(*self))
    }
}

/// 旋钮编号（Dial1-Dial4）
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, IntoPrimitive, TryFromPrimitive,
)]
#[repr(u8)]
pub enum DialId {
    Dial1 = 1,
    Dial2 = 2,
    Dial3 = 3,
    Dial4 = 4,
}

impl DialId {
    /// 全部旋钮（升序）
    pub const ALL: [DialId; 4] = [DialId::Dial1, DialId::Dial2, DialId::Dial3, DialId::Dial4];

    pub fn index(self) -> usize {
        usize::from(u8::from(self)) - 1
    }
}

impl fmt::Display for DialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Dial{}", u8::from(*self))
    }
}
