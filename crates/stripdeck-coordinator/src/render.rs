//! 渲染循环与触摸条合成
//!
//! 每个周期：
//!
//! - 覆盖层激活：只向覆盖层请求全部按键和整条触摸条，跳过普通模块
//! - 覆盖层刚结束：先把所有按键清黑，再恢复普通渲染
//! - 普通渲染：每个运行中模块的按键图像直接推送；触摸条按注册顺序合成到一张整条画布上
//!
//! 不做脏区跟踪，每个周期无条件推送。

use crate::coordinator::Shared;
use crossbeam_channel::{select, tick};
use image::{RgbaImage, imageops};
use std::sync::Arc;
use stripdeck_device::{CancelToken, Rect};
use stripdeck_module::Module;
use tracing::{debug, trace, warn};

/// 将各模块的触摸条图像按顺序合成到整条画布上
///
/// 每层绘制在其区域左上角，超出画布的部分被裁剪；
/// 使用 alpha 混合（后绘制的层覆盖先绘制的层，透明像素保留下层内容）。
pub fn composite_strip<'a>(
    strip: Rect,
    layers: impl IntoIterator<Item = (Rect, &'a RgbaImage)>,
) -> RgbaImage {
    let mut canvas = RgbaImage::new(strip.width, strip.height);
    for (region, image) in layers {
        imageops::overlay(
            &mut canvas,
            image,
            i64::from(region.x) - i64::from(strip.x),
            i64::from(region.y) - i64::from(strip.y),
        );
    }
    canvas
}

pub(crate) struct RenderLoop {
    shared: Arc<Shared>,
    session: CancelToken,
}

impl RenderLoop {
    pub(crate) fn new(shared: Arc<Shared>, session: CancelToken) -> Self {
        Self { shared, session }
    }

    pub(crate) fn run(self) {
        let ticker = tick(self.shared.config.render_interval);
        self.shared.render_tick();

        loop {
            select! {
                recv(self.session.done()) -> _ => break,
                recv(ticker) -> _ => {
                    if self.session.is_cancelled() {
                        break;
                    }
                    self.shared.render_tick();
                },
            }
        }
        debug!("Render loop exited");
    }
}

impl Shared {
    pub(crate) fn render_tick(&self) {
        if let Some(overlay) = self.active_overlay() {
            self.registry.write().overlay_was_active = true;
            self.render_overlay(&overlay);
            return;
        }

        let was_active = std::mem::replace(&mut self.registry.write().overlay_was_active, false);
        if was_active && self.config.overlay_clear_on_exit {
            self.clear_all_keys();
        }

        self.render_modules();
    }

    fn render_overlay(&self, module: &Arc<dyn Module>) {
        let Some(overlay) = module.as_overlay() else {
            return;
        };

        for (key, image) in overlay.render_overlay_keys() {
            if let Err(e) = self.device.set_key_image(key, &image) {
                warn!("Failed to push overlay image for {}: {}", key, e);
            }
        }

        if self.registry.read().strip_rect.is_empty() {
            return;
        }
        if let Some(image) = overlay.render_overlay_strip()
            && let Err(e) = self.device.set_touch_strip_image(&image)
        {
            warn!("Failed to push overlay strip image: {}", e);
        }
    }

    fn render_modules(&self) {
        let (modules, strip) = {
            let registry = self.registry.read();
            let modules: Vec<(Arc<dyn Module>, Option<Rect>)> = registry
                .running()
                .map(|e| {
                    let strip = e.resources.has_strip().then_some(e.resources.strip_rect).flatten();
                    (e.module.clone(), strip)
                })
                .collect();
            (modules, registry.strip_rect)
        };

        for (module, _) in &modules {
            for (key, image) in module.render_keys() {
                if let Err(e) = self.device.set_key_image(key, &image) {
                    warn!(
                        "Failed to push image for {} from '{}': {}",
                        key,
                        module.id(),
                        e
                    );
                }
            }
        }

        if strip.is_empty() {
            return;
        }

        let layers: Vec<(Rect, RgbaImage)> = modules
            .iter()
            .filter_map(|(module, region)| {
                let region = (*region)?;
                module.render_strip().map(|image| (region, image))
            })
            .collect();
        let canvas = composite_strip(strip, layers.iter().map(|(r, img)| (*r, img)));

        if let Err(e) = self.device.set_touch_strip_image(&canvas) {
            warn!("Failed to push touch strip image: {}", e);
        }
        trace!("Rendered {} strip layers", layers.len());
    }

    fn clear_all_keys(&self) {
        debug!("Overlay ended, clearing all keys");
        for key in self.device.keys() {
            if let Err(e) = self.device.clear_key(key) {
                warn!("Failed to clear {}: {}", key, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn solid(width: u32, height: u32, color: [u8; 4]) -> RgbaImage {
        RgbaImage::from_pixel(width, height, Rgba(color))
    }

    #[test]
    fn test_composite_places_layers_at_region_offset() {
        let strip = Rect::from_size(800, 100);
        let red = solid(200, 100, [255, 0, 0, 255]);
        let blue = solid(200, 100, [0, 0, 255, 255]);

        let canvas = composite_strip(
            strip,
            [(Rect::new(0, 0, 200, 100), &red), (Rect::new(400, 0, 200, 100), &blue)],
        );

        assert_eq!(canvas.dimensions(), (800, 100));
        assert_eq!(canvas.get_pixel(10, 10).0, [255, 0, 0, 255]);
        assert_eq!(canvas.get_pixel(450, 50).0, [0, 0, 255, 255]);
        // 未绘制区域保持透明黑
        assert_eq!(canvas.get_pixel(300, 50).0, [0, 0, 0, 0]);
    }

    #[test]
    fn test_later_layer_paints_over_earlier() {
        let strip = Rect::from_size(100, 10);
        let red = solid(100, 10, [255, 0, 0, 255]);
        let green = solid(50, 10, [0, 255, 0, 255]);

        let canvas = composite_strip(
            strip,
            [(Rect::new(0, 0, 100, 10), &red), (Rect::new(25, 0, 50, 10), &green)],
        );
        assert_eq!(canvas.get_pixel(10, 5).0, [255, 0, 0, 255]);
        assert_eq!(canvas.get_pixel(30, 5).0, [0, 255, 0, 255]);
        assert_eq!(canvas.get_pixel(90, 5).0, [255, 0, 0, 255]);
    }

    #[test]
    fn test_transparent_pixels_keep_lower_layer() {
        let strip = Rect::from_size(20, 10);
        let red = solid(20, 10, [255, 0, 0, 255]);
        let clear = solid(20, 10, [0, 0, 0, 0]);

        let canvas = composite_strip(
            strip,
            [(Rect::from_size(20, 10), &red), (Rect::from_size(20, 10), &clear)],
        );
        assert_eq!(canvas.get_pixel(5, 5).0, [255, 0, 0, 255]);
    }

    #[test]
    fn test_layer_outside_strip_is_clipped() {
        let strip = Rect::from_size(100, 10);
        let red = solid(50, 10, [255, 0, 0, 255]);

        let canvas = composite_strip(strip, [(Rect::new(80, 0, 50, 10), &red)]);
        assert_eq!(canvas.dimensions(), (100, 10));
        assert_eq!(canvas.get_pixel(99, 0).0, [255, 0, 0, 255]);
        assert_eq!(canvas.get_pixel(79, 0).0, [0, 0, 0, 0]);
    }
}
