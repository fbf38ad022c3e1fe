//! 模拟设备
//!
//! 用于单元测试、集成测试以及守护进程的虚拟设备模式。
//! 事件由测试线程通过 [`MockDevice::press_key`] 等方法注入，在调用线程上同步执行处理器，
//! 与真实设备"处理器在事件循环线程上同步执行"的语义一致。

use crate::{
    ButtonPress, CancelToken, DeviceError, DialId, DialRotateHandler, DialSwitchHandler, KeyHandler,
    KeyId, Point, Rect, TouchStripSwipeHandler, TouchStripTouchHandler, TouchType,
};
use crossbeam_channel::{Receiver, Sender};
use image::RgbaImage;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{trace, warn};

/// 模拟设备参数
#[derive(Debug, Clone)]
pub struct MockDeviceConfig {
    pub model_name: String,
    pub key_count: u8,
    pub dial_count: u8,
    pub touch_strip: bool,
    /// 按键图像边长（像素）
    pub key_size: u32,
    pub strip_width: u32,
    pub strip_height: u32,
    /// `close()` 的阻塞时长（模拟卡住的关闭调用）
    pub close_delay: Duration,
}

impl Default for MockDeviceConfig {
    fn default() -> Self {
        Self {
            model_name: "Mock Deck Plus".to_string(),
            key_count: 8,
            dial_count: 4,
            touch_strip: true,
            key_size: 120,
            strip_width: 800,
            strip_height: 100,
            close_delay: Duration::ZERO,
        }
    }
}

#[derive(Default)]
struct Handlers {
    keys: HashMap<KeyId, Vec<KeyHandler>>,
    dial_rotate: HashMap<DialId, Vec<DialRotateHandler>>,
    dial_switch: HashMap<DialId, Vec<DialSwitchHandler>>,
    strip_touch: Vec<TouchStripTouchHandler>,
    strip_swipe: Vec<TouchStripSwipeHandler>,
}

/// 固定按住时长的模拟按压
struct MockPress {
    hold: Duration,
}

impl ButtonPress for MockPress {
    fn wait_for_release(&self) -> Duration {
        thread::sleep(self.hold);
        self.hold
    }
}

pub struct MockDevice {
    config: MockDeviceConfig,
    open: AtomicBool,
    listening: AtomicBool,
    disconnected: AtomicBool,
    brightness: AtomicU8,
    handlers: RwLock<Handlers>,
    key_images: Mutex<HashMap<KeyId, RgbaImage>>,
    strip_image: Mutex<Option<RgbaImage>>,
    key_pushes: AtomicUsize,
    strip_pushes: AtomicUsize,
    open_count: AtomicUsize,
    close_count: AtomicUsize,
    disconnect_tx: Sender<()>,
    disconnect_rx: Receiver<()>,
}

impl MockDevice {
    pub fn new(config: MockDeviceConfig) -> Self {
        let (disconnect_tx, disconnect_rx) = crossbeam_channel::bounded(1);
        Self {
            config,
            open: AtomicBool::new(false),
            listening: AtomicBool::new(false),
            disconnected: AtomicBool::new(false),
            brightness: AtomicU8::new(100),
            handlers: RwLock::new(Handlers::default()),
            key_images: Mutex::new(HashMap::new()),
            strip_image: Mutex::new(None),
            key_pushes: AtomicUsize::new(0),
            strip_pushes: AtomicUsize::new(0),
            open_count: AtomicUsize::new(0),
            close_count: AtomicUsize::new(0),
            disconnect_tx,
            disconnect_rx,
        }
    }

    pub fn config(&self) -> &MockDeviceConfig {
        &self.config
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    /// 轮询等待事件循环启动
    pub fn wait_until_listening(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.is_listening() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        self.is_listening()
    }

    /// 模拟拔出设备：`listen` 返回 [`DeviceError::Disconnected`]
    pub fn simulate_disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
        let _ = self.disconnect_tx.try_send(());
    }

    pub fn brightness(&self) -> u8 {
        self.brightness.load(Ordering::SeqCst)
    }

    /// 最近一次推送到按键的图像
    pub fn key_image(&self, key: KeyId) -> Option<RgbaImage> {
        self.key_images.lock().get(&key).cloned()
    }

    pub fn strip_image(&self) -> Option<RgbaImage> {
        self.strip_image.lock().clone()
    }

    pub fn key_push_count(&self) -> usize {
        self.key_pushes.load(Ordering::SeqCst)
    }

    pub fn strip_push_count(&self) -> usize {
        self.strip_pushes.load(Ordering::SeqCst)
    }

    pub fn open_count(&self) -> usize {
        self.open_count.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.close_count.load(Ordering::SeqCst)
    }

    /// 按下按键并保持 `hold` 后松开
    ///
    /// 返回 `false` 表示事件循环未运行，事件被丢弃。
    pub fn press_key(&self, key: KeyId, hold: Duration) -> bool {
        if !self.is_listening() {
            return false;
        }
        let handlers = self.handlers.read().keys.get(&key).cloned().unwrap_or_default();
        let press = MockPress { hold };
        for handler in handlers {
            if let Err(e) = handler(key, &press) {
                warn!("Key handler for {} failed: {}", key, e);
            }
        }
        true
    }

    pub fn rotate_dial(&self, dial: DialId, delta: i8) -> bool {
        if !self.is_listening() {
            return false;
        }
        let handlers = self
            .handlers
            .read()
            .dial_rotate
            .get(&dial)
            .cloned()
            .unwrap_or_default();
        for handler in handlers {
            if let Err(e) = handler(dial, delta) {
                warn!("Dial rotate handler for {} failed: {}", dial, e);
            }
        }
        true
    }

    pub fn press_dial(&self, dial: DialId, hold: Duration) -> bool {
        if !self.is_listening() {
            return false;
        }
        let handlers = self
            .handlers
            .read()
            .dial_switch
            .get(&dial)
            .cloned()
            .unwrap_or_default();
        let press = MockPress { hold };
        for handler in handlers {
            if let Err(e) = handler(dial, &press) {
                warn!("Dial switch handler for {} failed: {}", dial, e);
            }
        }
        true
    }

    pub fn touch_strip(&self, touch: TouchType, point: Point) -> bool {
        if !self.is_listening() {
            return false;
        }
        let handlers = self.handlers.read().strip_touch.clone();
        for handler in handlers {
            if let Err(e) = handler(touch, point) {
                warn!("Touch strip handler failed: {}", e);
            }
        }
        true
    }

    pub fn swipe_strip(&self, from: Point, to: Point) -> bool {
        if !self.is_listening() {
            return false;
        }
        let handlers = self.handlers.read().strip_swipe.clone();
        for handler in handlers {
            if let Err(e) = handler(from, to) {
                warn!("Touch strip swipe handler failed: {}", e);
            }
        }
        true
    }

    fn ensure_open(&self) -> Result<(), DeviceError> {
        if self.open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DeviceError::NotOpen)
        }
    }

    fn ensure_not_listening(&self) -> Result<(), DeviceError> {
        if self.is_listening() {
            Err(DeviceError::AlreadyListening)
        } else {
            Ok(())
        }
    }

    fn check_size(image: &RgbaImage, expected: Rect) -> Result<(), DeviceError> {
        if image.width() != expected.width || image.height() != expected.height {
            return Err(DeviceError::InvalidImageSize {
                expected_width: expected.width,
                expected_height: expected.height,
                width: image.width(),
                height: image.height(),
            });
        }
        Ok(())
    }
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new(MockDeviceConfig::default())
    }
}

impl crate::Device for MockDevice {
    fn open(&self) -> Result<(), DeviceError> {
        if self.open.swap(true, Ordering::SeqCst) {
            return Err(DeviceError::AlreadyOpen);
        }
        self.disconnected.store(false, Ordering::SeqCst);
        while self.disconnect_rx.try_recv().is_ok() {}
        self.open_count.fetch_add(1, Ordering::SeqCst);
        trace!("Mock device opened");
        Ok(())
    }

    /// 关闭设备并清空所有已注册处理器（下一个会话需重新注册）
    fn close(&self) -> Result<(), DeviceError> {
        if !self.config.close_delay.is_zero() {
            thread::sleep(self.config.close_delay);
        }
        if !self.open.swap(false, Ordering::SeqCst) {
            return Err(DeviceError::NotOpen);
        }
        *self.handlers.write() = Handlers::default();
        self.close_count.fetch_add(1, Ordering::SeqCst);
        trace!("Mock device closed");
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn model_name(&self) -> String {
        self.config.model_name.clone()
    }

    fn key_count(&self) -> u8 {
        self.config.key_count
    }

    fn dial_count(&self) -> u8 {
        self.config.dial_count
    }

    fn touch_strip_supported(&self) -> bool {
        self.config.touch_strip
    }

    fn key_image_rect(&self) -> Result<Rect, DeviceError> {
        Ok(Rect::from_size(self.config.key_size, self.config.key_size))
    }

    fn touch_strip_image_rect(&self) -> Result<Rect, DeviceError> {
        if !self.config.touch_strip {
            return Err(DeviceError::Unsupported("touch strip"));
        }
        Ok(Rect::from_size(
            self.config.strip_width,
            self.config.strip_height,
        ))
    }

    fn set_brightness(&self, percent: u8) -> Result<(), DeviceError> {
        self.ensure_open()?;
        self.brightness.store(percent.min(100), Ordering::SeqCst);
        Ok(())
    }

    fn set_key_image(&self, key: KeyId, image: &RgbaImage) -> Result<(), DeviceError> {
        self.ensure_open()?;
        Self::check_size(image, self.key_image_rect()?)?;
        self.key_images.lock().insert(key, image.clone());
        self.key_pushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn set_touch_strip_image(&self, image: &RgbaImage) -> Result<(), DeviceError> {
        self.ensure_open()?;
        Self::check_size(image, self.touch_strip_image_rect()?)?;
        *self.strip_image.lock() = Some(image.clone());
        self.strip_pushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn add_key_handler(&self, key: KeyId, handler: KeyHandler) -> Result<(), DeviceError> {
        self.ensure_not_listening()?;
        self.handlers.write().keys.entry(key).or_default().push(handler);
        Ok(())
    }

    fn add_dial_rotate_handler(
        &self,
        dial: DialId,
        handler: DialRotateHandler,
    ) -> Result<(), DeviceError> {
        self.ensure_not_listening()?;
        self.handlers
            .write()
            .dial_rotate
            .entry(dial)
            .or_default()
            .push(handler);
        Ok(())
    }

    fn add_dial_switch_handler(
        &self,
        dial: DialId,
        handler: DialSwitchHandler,
    ) -> Result<(), DeviceError> {
        self.ensure_not_listening()?;
        self.handlers
            .write()
            .dial_switch
            .entry(dial)
            .or_default()
            .push(handler);
        Ok(())
    }

    fn add_touch_strip_touch_handler(
        &self,
        handler: TouchStripTouchHandler,
    ) -> Result<(), DeviceError> {
        self.ensure_not_listening()?;
        self.handlers.write().strip_touch.push(handler);
        Ok(())
    }

    fn add_touch_strip_swipe_handler(
        &self,
        handler: TouchStripSwipeHandler,
    ) -> Result<(), DeviceError> {
        self.ensure_not_listening()?;
        self.handlers.write().strip_swipe.push(handler);
        Ok(())
    }

    fn listen(&self, cancel: &CancelToken) -> Result<(), DeviceError> {
        self.ensure_open()?;
        if self.listening.swap(true, Ordering::SeqCst) {
            return Err(DeviceError::AlreadyListening);
        }

        let result = if self.disconnected.load(Ordering::SeqCst) {
            Err(DeviceError::Disconnected)
        } else {
            crossbeam_channel::select! {
                recv(cancel.done()) -> _ => Ok(()),
                recv(self.disconnect_rx) -> _ => Err(DeviceError::Disconnected),
            }
        };

        self.listening.store(false, Ordering::SeqCst);
        result
    }
}
