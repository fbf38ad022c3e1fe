//! 电平模块（旋钮 + 触摸条 + 覆盖层）
//!
//! - 旋转旋钮调整电平（0-100），触摸条区域显示为进度条
//! - 点击触摸条按 x 坐标直接设置电平
//! - 按下旋钮打开覆盖层：全部按键按电平点亮，触摸条整体显示进度条
//! - 覆盖层期间每次交互都会续期；在覆盖层中松开旋钮即关闭

use image::{Rgba, RgbaImage};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use stripdeck_device::{CancelToken, DialId, KeyId, Rect};
use stripdeck_module::{
    DEFAULT_OVERLAY_DURATION, DialEvent, DialEventKind, KeyEvent, Module, ModuleBase,
    ModuleError, OverlayProvider, OverlayTimer, Resources, TouchStripEvent, TouchStripEventKind,
};
use tracing::debug;

const MAX_LEVEL: u8 = 100;
/// 每格旋转的步长
const STEP: i16 = 2;

const BAR: Rgba<u8> = Rgba([52, 152, 219, 255]);
const OVERLAY_BAR: Rgba<u8> = Rgba([241, 196, 15, 255]);
const TRACK: Rgba<u8> = Rgba([25, 25, 25, 255]);

pub struct LevelModule {
    base: ModuleBase,
    key_rect: Rect,
    /// 覆盖层接管的全部物理按键
    all_keys: Vec<KeyId>,
    strip: Rect,
    level: AtomicU8,
    overlay: OverlayTimer,
}

impl LevelModule {
    pub fn new(key_rect: Rect, all_keys: Vec<KeyId>, strip: Rect) -> Self {
        Self {
            base: ModuleBase::new("level"),
            key_rect,
            all_keys,
            strip,
            level: AtomicU8::new(50),
            overlay: OverlayTimer::new(DEFAULT_OVERLAY_DURATION),
        }
    }

    pub fn level(&self) -> u8 {
        self.level.load(Ordering::SeqCst)
    }

    fn adjust(&self, delta: i8) {
        let next = (i16::from(self.level()) + i16::from(delta) * STEP).clamp(0, MAX_LEVEL.into());
        self.level.store(next as u8, Ordering::SeqCst);
        debug!("Level: {}", next);
    }

    /// 按触摸点 x 坐标设置电平（相对本模块的触摸条区域）
    fn set_from_x(&self, region: Rect, x: i32) {
        if region.width == 0 {
            return;
        }
        let offset = (x - region.x as i32).clamp(0, region.width as i32) as u32;
        let level = offset * u32::from(MAX_LEVEL) / region.width;
        self.level.store(level as u8, Ordering::SeqCst);
        debug!("Level set from touch: {}", level);
    }

    fn bar(&self, width: u32, height: u32, color: Rgba<u8>) -> RgbaImage {
        let filled = width * u32::from(self.level()) / u32::from(MAX_LEVEL);
        RgbaImage::from_fn(width, height, |x, _| if x < filled { color } else { TRACK })
    }

    fn region(&self) -> Option<Rect> {
        self.base.resources().strip_rect.filter(|rect| !rect.is_empty())
    }
}

impl Module for LevelModule {
    fn id(&self) -> &str {
        self.base.id()
    }

    fn init(&self, ctx: CancelToken, resources: Resources) -> Result<(), ModuleError> {
        if !resources.has_dials() {
            return Err(ModuleError::MissingResource("dial"));
        }
        self.base.init(&ctx, resources);
        Ok(())
    }

    fn stop(&self) -> Result<(), ModuleError> {
        self.overlay.dismiss();
        self.base.stop();
        Ok(())
    }

    fn render_strip(&self) -> Option<RgbaImage> {
        let region = self.region()?;
        Some(self.bar(region.width, region.height, BAR))
    }

    fn handle_dial(&self, _dial: DialId, event: DialEvent) -> Result<(), ModuleError> {
        self.base.ensure_running()?;
        match event.kind {
            DialEventKind::Rotate => self.adjust(event.delta),
            DialEventKind::Press => self.overlay.activate(),
            DialEventKind::Release => {},
        }
        Ok(())
    }

    fn handle_strip_touch(&self, event: TouchStripEvent) -> Result<(), ModuleError> {
        self.base.ensure_running()?;
        if event.kind == TouchStripEventKind::Tap
            && let Some(region) = self.region()
        {
            self.set_from_x(region, event.point.x);
        }
        Ok(())
    }

    fn as_overlay(&self) -> Option<&dyn OverlayProvider> {
        Some(self)
    }
}

impl OverlayProvider for LevelModule {
    fn is_overlay_active(&self) -> bool {
        self.overlay.is_active()
    }

    fn render_overlay_keys(&self) -> HashMap<KeyId, RgbaImage> {
        let lit = self.all_keys.len() * usize::from(self.level()) / usize::from(MAX_LEVEL);
        self.all_keys
            .iter()
            .enumerate()
            .map(|(i, &key)| {
                let color = if i < lit { OVERLAY_BAR } else { TRACK };
                let tile = RgbaImage::from_pixel(self.key_rect.width, self.key_rect.height, color);
                (key, tile)
            })
            .collect()
    }

    fn render_overlay_strip(&self) -> Option<RgbaImage> {
        if self.strip.is_empty() {
            return None;
        }
        Some(self.bar(self.strip.width, self.strip.height, OVERLAY_BAR))
    }

    fn handle_overlay_key(&self, _key: KeyId, _event: KeyEvent) -> Result<(), ModuleError> {
        self.base.ensure_running()?;
        self.overlay.extend();
        Ok(())
    }

    fn handle_overlay_dial(&self, _dial: DialId, event: DialEvent) -> Result<(), ModuleError> {
        self.base.ensure_running()?;
        match event.kind {
            DialEventKind::Rotate => {
                self.adjust(event.delta);
                self.overlay.extend();
            },
            DialEventKind::Press => {
                self.overlay.extend();
            },
            DialEventKind::Release => self.overlay.dismiss(),
        }
        Ok(())
    }

    fn handle_overlay_strip_touch(&self, event: TouchStripEvent) -> Result<(), ModuleError> {
        self.base.ensure_running()?;
        if event.kind == TouchStripEventKind::Tap {
            self.set_from_x(self.strip, event.point.x);
        }
        self.overlay.extend();
        Ok(())
    }
}
