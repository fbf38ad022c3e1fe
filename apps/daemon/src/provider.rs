//! 虚拟设备来源
//!
//! USB/HID 传输不在本仓库内；没有真实后端时守护进程使用一块虚拟面板，
//! 它与真实硬件走同一个 [`DeviceProvider`] 接口，可以周期性模拟拔插以验证重连路径。

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use stripdeck_device::{
    CancelToken, Device, DeviceError, MockDevice, MockDeviceConfig, TransportError,
    TransportErrorKind,
};
use stripdeck_lifecycle::{DeviceProvider, HotplugToken, hotplug};
use tracing::{debug, info};

/// 虚拟面板的厂商 ID
pub const VIRTUAL_VENDOR_ID: u16 = 0x0fd9;

/// 拔出到重新插入之间的间隔
const REPLUG_GAP: Duration = Duration::from_secs(1);

pub struct VirtualDeckProvider {
    device: Arc<MockDevice>,
    present: AtomicBool,
}

impl VirtualDeckProvider {
    pub fn new(model_name: &str) -> Self {
        let config = MockDeviceConfig {
            model_name: model_name.to_string(),
            ..MockDeviceConfig::default()
        };
        Self {
            device: Arc::new(MockDevice::new(config)),
            present: AtomicBool::new(true),
        }
    }

    pub fn is_present(&self) -> bool {
        self.present.load(Ordering::SeqCst)
    }

    /// 拔出：正在运行的事件循环返回断开错误
    pub fn unplug(&self) {
        self.present.store(false, Ordering::SeqCst);
        self.device.simulate_disconnect();
    }

    /// 插入；有热插拔监听时投递到达通知
    pub fn plug(&self, token: Option<HotplugToken>) {
        self.present.store(true, Ordering::SeqCst);
        if let Some(token) = token
            && !hotplug::dispatch_arrival(token, VIRTUAL_VENDOR_ID)
        {
            debug!("Hotplug watch is gone, arrival not delivered");
        }
    }

    /// 周期性模拟拔插，直到 `stop` 被取消
    pub fn spawn_replug(
        self: &Arc<Self>,
        interval: Duration,
        token: Option<HotplugToken>,
        stop: CancelToken,
    ) -> io::Result<JoinHandle<()>> {
        let provider = self.clone();
        thread::Builder::new()
            .name("stripdeck-replug".into())
            .spawn(move || {
                while !stop.wait_timeout(interval) {
                    info!("Simulating virtual deck unplug");
                    provider.unplug();
                    if stop.wait_timeout(REPLUG_GAP) {
                        break;
                    }
                    info!("Simulating virtual deck replug");
                    provider.plug(token);
                }
            })
    }
}

impl DeviceProvider for VirtualDeckProvider {
    fn acquire(&self) -> Result<Arc<dyn Device>, DeviceError> {
        if !self.is_present() {
            return Err(TransportError::new(
                TransportErrorKind::NotFound,
                "virtual deck is unplugged",
            )
            .into());
        }
        self.device.open()?;
        Ok(self.device.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_opens_device() {
        let provider = VirtualDeckProvider::new("Test Deck");
        let device = provider.acquire().unwrap();
        assert!(device.is_open());
        assert_eq!(device.model_name(), "Test Deck");
    }

    #[test]
    fn test_unplugged_deck_is_not_found() {
        let provider = VirtualDeckProvider::new("Test Deck");
        provider.unplug();
        match provider.acquire() {
            Err(DeviceError::Transport(e)) => assert_eq!(e.kind, TransportErrorKind::NotFound),
            other => panic!("unexpected result: {:?}", other.map(|d| d.model_name())),
        }
    }

    #[test]
    fn test_plug_dispatches_arrival() {
        let provider = VirtualDeckProvider::new("Test Deck");
        let watch = hotplug::watch(VIRTUAL_VENDOR_ID);
        provider.unplug();
        provider.plug(Some(watch.token()));
        assert!(provider.is_present());
        assert!(watch.arrivals().try_recv().is_ok());
    }
}
