//! 事件路由
//!
//! 路由规则（按键、旋钮、触摸条一致）：
//!
//! 1. 若有运行中的模块报告覆盖层激活，事件只交给该覆盖层（注册顺序第一个）
//! 2. 否则交给资源的注册所有者（若存在且未失败）
//! 3. 否则丢弃
//!
//! 按压交互拆成按下/松开两个子事件，目标在按下时确定，松开事件交给同一目标。

use crate::CoordinatorError;
use crate::coordinator::Shared;
use std::sync::Arc;
use stripdeck_device::{ButtonPress, DialId, HandlerResult, KeyId, Point, TouchType};
use stripdeck_module::{DialEvent, KeyEvent, Module, ModuleError, TouchStripEvent};
use tracing::{trace, warn};

/// 一次交互的投递目标
enum Target {
    Overlay(Arc<dyn Module>),
    Owner(Arc<dyn Module>),
}

impl Target {
    fn module(&self) -> &Arc<dyn Module> {
        match self {
            Target::Overlay(m) | Target::Owner(m) => m,
        }
    }

    fn key(&self, key: KeyId, event: KeyEvent) {
        let result = match self {
            Target::Overlay(m) => match m.as_overlay() {
                Some(overlay) => overlay.handle_overlay_key(key, event),
                None => Ok(()),
            },
            Target::Owner(m) => m.handle_key(key, event),
        };
        self.log_error(result, "key");
    }

    fn dial(&self, dial: DialId, event: DialEvent) {
        let result = match self {
            Target::Overlay(m) => match m.as_overlay() {
                Some(overlay) => overlay.handle_overlay_dial(dial, event),
                None => Ok(()),
            },
            Target::Owner(m) => m.handle_dial(dial, event),
        };
        self.log_error(result, "dial");
    }

    fn strip(&self, event: TouchStripEvent) {
        let result = match self {
            Target::Overlay(m) => match m.as_overlay() {
                Some(overlay) => overlay.handle_overlay_strip_touch(event),
                None => Ok(()),
            },
            Target::Owner(m) => m.handle_strip_touch(event),
        };
        self.log_error(result, "touch strip");
    }

    fn log_error(&self, result: Result<(), ModuleError>, source: &str) {
        if let Err(e) = result {
            warn!(
                "Module '{}' failed to handle {} event: {}",
                self.module().id(),
                source,
                e
            );
        }
    }
}

impl Shared {
    /// 当前激活的覆盖层
    ///
    /// 多个模块同时报告激活时，注册顺序第一个胜出，其余记录告警。
    pub(crate) fn active_overlay(&self) -> Option<Arc<dyn Module>> {
        let candidates: Vec<Arc<dyn Module>> = self
            .registry
            .read()
            .running()
            .filter(|e| e.module.as_overlay().is_some())
            .map(|e| e.module.clone())
            .collect();

        let mut winner: Option<Arc<dyn Module>> = None;
        for module in candidates {
            let active = module
                .as_overlay()
                .is_some_and(|overlay| overlay.is_overlay_active());
            if !active {
                continue;
            }
            match &winner {
                None => winner = Some(module),
                Some(first) => warn!(
                    "Overlay conflict: '{}' is active but '{}' holds the surface",
                    module.id(),
                    first.id()
                ),
            }
        }
        winner
    }

    fn route_key(&self, key: KeyId) -> Option<Target> {
        if let Some(overlay) = self.active_overlay() {
            return Some(Target::Overlay(overlay));
        }
        let registry = self.registry.read();
        let entry = registry.entries.get(*registry.key_owners.get(&key)?)?;
        entry
            .state
            .is_running()
            .then(|| Target::Owner(entry.module.clone()))
    }

    fn route_dial(&self, dial: DialId) -> Option<Target> {
        if let Some(overlay) = self.active_overlay() {
            return Some(Target::Overlay(overlay));
        }
        let registry = self.registry.read();
        let entry = registry.entries.get(*registry.dial_owners.get(&dial)?)?;
        entry
            .state
            .is_running()
            .then(|| Target::Owner(entry.module.clone()))
    }

    /// 触摸条非覆盖层路由：第一个分配了触摸条区域的运行中模块（不按坐标命中）
    fn route_strip(&self) -> Option<Target> {
        if let Some(overlay) = self.active_overlay() {
            return Some(Target::Overlay(overlay));
        }
        self.registry
            .read()
            .running()
            .find(|e| e.resources.has_strip())
            .map(|e| Target::Owner(e.module.clone()))
    }

    pub(crate) fn on_key(&self, key: KeyId, press: &dyn ButtonPress) -> HandlerResult {
        let Some(target) = self.route_key(key) else {
            trace!("{} pressed with no owner", key);
            return Ok(());
        };
        target.key(key, KeyEvent::pressed());
        let held = press.wait_for_release();
        target.key(key, KeyEvent::released(held));
        Ok(())
    }

    pub(crate) fn on_dial_rotate(&self, dial: DialId, delta: i8) -> HandlerResult {
        if let Some(target) = self.route_dial(dial) {
            target.dial(dial, DialEvent::rotate(delta));
        }
        Ok(())
    }

    pub(crate) fn on_dial_switch(&self, dial: DialId, press: &dyn ButtonPress) -> HandlerResult {
        let Some(target) = self.route_dial(dial) else {
            trace!("{} pressed with no owner", dial);
            return Ok(());
        };
        target.dial(dial, DialEvent::press());
        let held = press.wait_for_release();
        target.dial(dial, DialEvent::release(held));
        Ok(())
    }

    pub(crate) fn on_strip_touch(&self, touch: TouchType, point: Point) -> HandlerResult {
        if let Some(target) = self.route_strip() {
            target.strip(TouchStripEvent::from_touch(touch, point));
        }
        Ok(())
    }

    pub(crate) fn on_strip_swipe(&self, from: Point, to: Point) -> HandlerResult {
        if let Some(target) = self.route_strip() {
            target.strip(TouchStripEvent::swipe(from, to));
        }
        Ok(())
    }

    /// 为每个物理控件安装处理器（与所有权无关，覆盖层可以接管任何控件）
    ///
    /// 处理器只持有弱引用，设备句柄与 Coordinator 之间不形成引用环。
    pub(crate) fn install_handlers(self: &Arc<Self>) -> Result<(), CoordinatorError> {
        let device = self.device.clone();

        for key in device.keys() {
            let shared = Arc::downgrade(self);
            device.add_key_handler(
                key,
                Arc::new(move |k: KeyId, press: &dyn ButtonPress| -> HandlerResult {
                    match shared.upgrade() {
                        Some(shared) => shared.on_key(k, press),
                        None => Ok(()),
                    }
                }),
            )?;
        }

        for dial in device.dials() {
            let shared = Arc::downgrade(self);
            device.add_dial_rotate_handler(
                dial,
                Arc::new(move |d: DialId, delta: i8| -> HandlerResult {
                    match shared.upgrade() {
                        Some(shared) => shared.on_dial_rotate(d, delta),
                        None => Ok(()),
                    }
                }),
            )?;

            let shared = Arc::downgrade(self);
            device.add_dial_switch_handler(
                dial,
                Arc::new(move |d: DialId, press: &dyn ButtonPress| -> HandlerResult {
                    match shared.upgrade() {
                        Some(shared) => shared.on_dial_switch(d, press),
                        None => Ok(()),
                    }
                }),
            )?;
        }

        if device.touch_strip_supported() {
            let shared = Arc::downgrade(self);
            device.add_touch_strip_touch_handler(Arc::new(
                move |touch: TouchType, point: Point| -> HandlerResult {
                    match shared.upgrade() {
                        Some(shared) => shared.on_strip_touch(touch, point),
                        None => Ok(()),
                    }
                },
            ))?;

            let shared = Arc::downgrade(self);
            device.add_touch_strip_swipe_handler(Arc::new(
                move |from: Point, to: Point| -> HandlerResult {
                    match shared.upgrade() {
                        Some(shared) => shared.on_strip_swipe(from, to),
                        None => Ok(()),
                    }
                },
            ))?;
        }

        Ok(())
    }
}
