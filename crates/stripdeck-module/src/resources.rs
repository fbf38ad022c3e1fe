//! 模块资源分配

use stripdeck_device::{DialId, KeyId, Rect};

/// 注册时分配给单个模块的硬件资源
///
/// 不同模块的资源集合不应重叠；系统不强制检查，重叠时后注册者的映射生效。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resources {
    pub keys: Vec<KeyId>,
    pub dials: Vec<DialId>,
    /// 触摸条区域（`None` 或空矩形表示未分配）
    pub strip_rect: Option<Rect>,
}

impl Resources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_keys(mut self, keys: impl IntoIterator<Item = KeyId>) -> Self {
        self.keys = keys.into_iter().collect();
        self
    }

    pub fn with_dials(mut self, dials: impl IntoIterator<Item = DialId>) -> Self {
        self.dials = dials.into_iter().collect();
        self
    }

    pub fn with_strip(mut self, rect: Rect) -> Self {
        self.strip_rect = Some(rect);
        self
    }

    pub fn has_keys(&self) -> bool {
        !self.keys.is_empty()
    }

    pub fn has_dials(&self) -> bool {
        !self.dials.is_empty()
    }

    pub fn has_strip(&self) -> bool {
        self.strip_rect.is_some_and(|r| !r.is_empty())
    }

    pub fn owns_key(&self, key: KeyId) -> bool {
        self.keys.contains(&key)
    }

    pub fn owns_dial(&self, dial: DialId) -> bool {
        self.dials.contains(&dial)
    }
}
