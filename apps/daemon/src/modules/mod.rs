//! 内置演示模块与会话装配

mod level;
mod toggle;

use level::LevelModule;
use toggle::ToggleModule;

use std::sync::Arc;
use stripdeck_coordinator::{Coordinator, CoordinatorError};
use stripdeck_device::Rect;
use stripdeck_module::Resources;
use tracing::warn;

/// 在新会话的 Coordinator 上构造并注册全部模块
///
/// 资源划分：开关模块占用全部按键；电平模块占用全部旋钮和整个触摸条。
pub fn register_all(coordinator: &Coordinator) -> Result<(), CoordinatorError> {
    let device = coordinator.device();
    let key_rect = device.key_image_rect()?;
    let keys = device.keys();
    let dials = device.dials();

    coordinator.register_module(
        Arc::new(ToggleModule::new(key_rect)),
        Resources::new().with_keys(keys.iter().copied()),
    )?;

    let mut resources = Resources::new().with_dials(dials);
    let strip = if device.touch_strip_supported() {
        let strip = device.touch_strip_image_rect()?;
        resources = resources.with_strip(strip);
        strip
    } else {
        warn!("Device has no touch strip, level module gets no strip region");
        Rect::default()
    };
    coordinator.register_module(Arc::new(LevelModule::new(key_rect, keys, strip)), resources)?;

    Ok(())
}
