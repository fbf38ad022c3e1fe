//! 开关按键模块
//!
//! 每个按键是一个开关：短按切换，长按（≥1s）全部复位。

use image::{Rgba, RgbaImage};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use stripdeck_device::{CancelToken, KeyId, Rect};
use stripdeck_module::{KeyEvent, Module, ModuleBase, ModuleError, Resources};
use tracing::info;

/// 触发复位的最短按住时长
pub const RESET_HOLD: Duration = Duration::from_secs(1);

const ON: Rgba<u8> = Rgba([46, 204, 113, 255]);
const OFF: Rgba<u8> = Rgba([40, 40, 40, 255]);

pub struct ToggleModule {
    base: ModuleBase,
    key_rect: Rect,
    on: Mutex<HashSet<KeyId>>,
}

impl ToggleModule {
    pub fn new(key_rect: Rect) -> Self {
        Self {
            base: ModuleBase::new("toggle"),
            key_rect,
            on: Mutex::new(HashSet::new()),
        }
    }

    #[cfg(test)]
    fn is_on(&self, key: KeyId) -> bool {
        self.on.lock().contains(&key)
    }
}

impl Module for ToggleModule {
    fn id(&self) -> &str {
        self.base.id()
    }

    fn init(&self, ctx: CancelToken, resources: Resources) -> Result<(), ModuleError> {
        if !resources.has_keys() {
            return Err(ModuleError::MissingResource("keys"));
        }
        self.base.init(&ctx, resources);
        Ok(())
    }

    fn stop(&self) -> Result<(), ModuleError> {
        self.base.stop();
        Ok(())
    }

    fn render_keys(&self) -> HashMap<KeyId, RgbaImage> {
        let on = self.on.lock();
        self.base
            .resources()
            .keys
            .into_iter()
            .map(|key| {
                let color = if on.contains(&key) { ON } else { OFF };
                let tile = RgbaImage::from_pixel(self.key_rect.width, self.key_rect.height, color);
                (key, tile)
            })
            .collect()
    }

    fn handle_key(&self, key: KeyId, event: KeyEvent) -> Result<(), ModuleError> {
        self.base.ensure_running()?;
        // 只在松开时响应，长按需要按住时长
        if event.pressed {
            return Ok(());
        }

        let mut on = self.on.lock();
        if event.duration >= RESET_HOLD {
            info!("Toggle: reset all keys");
            on.clear();
        } else if !on.remove(&key) {
            on.insert(key);
        }
        Ok(())
    }
}
