//! Coordinator 集成测试的公共设施

#![allow(dead_code)]

use image::{Rgba, RgbaImage};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use stripdeck_coordinator::{Coordinator, CoordinatorConfig, CoordinatorError};
use stripdeck_device::{CancelToken, Device, DialId, KeyId, MockDevice};
use stripdeck_module::{
    DialEvent, KeyEvent, Module, ModuleError, OverlayProvider, OverlayTimer, Resources,
    TouchStripEvent,
};

pub const KEY_SIZE: u32 = 120;
pub const STRIP_WIDTH: u32 = 800;
pub const STRIP_HEIGHT: u32 = 100;

/// 轮询等待条件成立
pub fn wait_for_condition<F>(mut condition: F, timeout_ms: u64) -> bool
where
    F: FnMut() -> bool,
{
    let start = std::time::Instant::now();
    let timeout = Duration::from_millis(timeout_ms);
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

pub fn solid(width: u32, height: u32, color: [u8; 4]) -> RgbaImage {
    RgbaImage::from_pixel(width, height, Rgba(color))
}

/// 模块收到的调用
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Key(KeyId, KeyEvent),
    Dial(DialId, DialEvent),
    Strip(TouchStripEvent),
    OverlayKey(KeyId, KeyEvent),
    OverlayDial(DialId, DialEvent),
    OverlayStrip(TouchStripEvent),
}

/// 记录所有调用的测试模块
pub struct RecordingModule {
    id: String,
    fail_init: bool,
    color: [u8; 4],
    overlay: Option<OverlayTimer>,
    resources: Mutex<Resources>,
    calls: Mutex<Vec<Call>>,
    render_calls: AtomicUsize,
    stop_log: Option<Arc<Mutex<Vec<String>>>>,
}

impl RecordingModule {
    pub fn new(id: &str, color: [u8; 4]) -> Self {
        Self {
            id: id.to_string(),
            fail_init: false,
            color,
            overlay: None,
            resources: Mutex::new(Resources::default()),
            calls: Mutex::new(Vec::new()),
            render_calls: AtomicUsize::new(0),
            stop_log: None,
        }
    }

    pub fn failing(mut self) -> Self {
        self.fail_init = true;
        self
    }

    /// 启用覆盖层能力
    pub fn with_overlay(mut self, duration: Duration) -> Self {
        self.overlay = Some(OverlayTimer::new(duration));
        self
    }

    pub fn with_stop_log(mut self, log: Arc<Mutex<Vec<String>>>) -> Self {
        self.stop_log = Some(log);
        self
    }

    pub fn activate_overlay(&self) {
        if let Some(timer) = &self.overlay {
            timer.activate();
        }
    }

    pub fn dismiss_overlay(&self) {
        if let Some(timer) = &self.overlay {
            timer.dismiss();
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn render_calls(&self) -> usize {
        self.render_calls.load(Ordering::SeqCst)
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }
}

impl Module for RecordingModule {
    fn id(&self) -> &str {
        &self.id
    }

    fn init(&self, _ctx: CancelToken, resources: Resources) -> Result<(), ModuleError> {
        if self.fail_init {
            return Err(ModuleError::Init(format!("{} refuses to start", self.id)));
        }
        *self.resources.lock() = resources;
        Ok(())
    }

    fn stop(&self) -> Result<(), ModuleError> {
        if let Some(log) = &self.stop_log {
            log.lock().push(self.id.clone());
        }
        Ok(())
    }

    fn render_keys(&self) -> HashMap<KeyId, RgbaImage> {
        self.render_calls.fetch_add(1, Ordering::SeqCst);
        self.resources
            .lock()
            .keys
            .iter()
            .map(|&key| (key, solid(KEY_SIZE, KEY_SIZE, self.color)))
            .collect()
    }

    fn render_strip(&self) -> Option<RgbaImage> {
        let rect = self.resources.lock().strip_rect?;
        Some(solid(rect.width, rect.height, self.color))
    }

    fn handle_key(&self, key: KeyId, event: KeyEvent) -> Result<(), ModuleError> {
        self.record(Call::Key(key, event));
        Ok(())
    }

    fn handle_dial(&self, dial: DialId, event: DialEvent) -> Result<(), ModuleError> {
        self.record(Call::Dial(dial, event));
        Ok(())
    }

    fn handle_strip_touch(&self, event: TouchStripEvent) -> Result<(), ModuleError> {
        self.record(Call::Strip(event));
        Ok(())
    }

    fn as_overlay(&self) -> Option<&dyn OverlayProvider> {
        self.overlay.as_ref().map(|_| self as &dyn OverlayProvider)
    }
}

impl OverlayProvider for RecordingModule {
    fn is_overlay_active(&self) -> bool {
        self.overlay.as_ref().is_some_and(OverlayTimer::is_active)
    }

    fn render_overlay_keys(&self) -> HashMap<KeyId, RgbaImage> {
        KeyId::ALL
            .into_iter()
            .map(|key| (key, solid(KEY_SIZE, KEY_SIZE, self.color)))
            .collect()
    }

    fn render_overlay_strip(&self) -> Option<RgbaImage> {
        Some(solid(STRIP_WIDTH, STRIP_HEIGHT, self.color))
    }

    fn handle_overlay_key(&self, key: KeyId, event: KeyEvent) -> Result<(), ModuleError> {
        self.record(Call::OverlayKey(key, event));
        Ok(())
    }

    fn handle_overlay_dial(&self, dial: DialId, event: DialEvent) -> Result<(), ModuleError> {
        self.record(Call::OverlayDial(dial, event));
        if let Some(timer) = &self.overlay {
            timer.extend();
        }
        Ok(())
    }

    fn handle_overlay_strip_touch(&self, event: TouchStripEvent) -> Result<(), ModuleError> {
        self.record(Call::OverlayStrip(event));
        Ok(())
    }
}

/// 运行中的 Coordinator 会话
pub struct Session {
    pub device: Arc<MockDevice>,
    pub coordinator: Arc<Coordinator>,
    pub ctx: CancelToken,
    pub handle: JoinHandle<Result<(), CoordinatorError>>,
}

impl Session {
    /// 取消会话并停止 Coordinator，返回 `start` 的结果
    pub fn shutdown(self) -> Result<(), CoordinatorError> {
        self.ctx.cancel();
        let result = self.handle.join().expect("start thread panicked");
        self.coordinator.stop()?;
        result
    }
}

pub fn fast_config() -> CoordinatorConfig {
    CoordinatorConfig {
        render_interval: Duration::from_millis(20),
        ..Default::default()
    }
}

pub fn new_coordinator(device: &Arc<MockDevice>, config: CoordinatorConfig) -> Arc<Coordinator> {
    let device: Arc<dyn Device> = device.clone();
    Arc::new(Coordinator::new(device, config))
}

/// 打开设备并在后台线程启动 Coordinator，等待事件循环就绪
pub fn start_session(device: Arc<MockDevice>, coordinator: Arc<Coordinator>) -> Session {
    if !device.is_open() {
        device.open().expect("open mock device");
    }
    let ctx = CancelToken::new();
    let handle = {
        let coordinator = coordinator.clone();
        let ctx = ctx.clone();
        thread::spawn(move || coordinator.start(&ctx))
    };
    assert!(
        device.wait_until_listening(Duration::from_secs(2)),
        "device never started listening"
    );
    Session {
        device,
        coordinator,
        ctx,
        handle,
    }
}
