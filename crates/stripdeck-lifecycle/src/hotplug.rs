//! 热插拔回调注册表
//!
//! 平台的热插拔通知来自原生回调，不在正常调用栈上，无法携带 Rust 闭包。
//! 这里为每个监听者分配一个不透明令牌（`u64`），原生层只保存令牌；
//! 回调时通过 [`dispatch_arrival`] 按令牌查表投递。
//!
//! [`HotplugWatch`] 被丢弃时令牌从表中移除，此后带该令牌的回调被安全忽略。

use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

struct Registration {
    vendor_id: u16,
    tx: Sender<()>,
}

static REGISTRY: LazyLock<Mutex<HashMap<u64, Registration>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// 交给原生回调的不透明令牌
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HotplugToken(u64);

impl HotplugToken {
    /// 原生层保存的原始值
    pub fn as_raw(self) -> u64 {
        self.0
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

/// 一个活跃的热插拔监听
///
/// 到达通知被合并：未消费时重复到达只保留一个。
pub struct HotplugWatch {
    token: HotplugToken,
    rx: Receiver<()>,
}

impl HotplugWatch {
    pub fn token(&self) -> HotplugToken {
        self.token
    }

    /// 设备到达通知
    pub fn arrivals(&self) -> Receiver<()> {
        self.rx.clone()
    }
}

impl Drop for HotplugWatch {
    fn drop(&mut self) {
        REGISTRY.lock().remove(&self.token.0);
        debug!("Hotplug watch {} invalidated", self.token.0);
    }
}

/// 注册监听指定厂商 ID 的设备到达
pub fn watch(vendor_id: u16) -> HotplugWatch {
    let token = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
    let (tx, rx) = crossbeam_channel::bounded(1);
    REGISTRY.lock().insert(token, Registration { vendor_id, tx });
    debug!(
        "Hotplug watch {} registered for vendor {:#06x}",
        token, vendor_id
    );
    HotplugWatch {
        token: HotplugToken(token),
        rx,
    }
}

/// 原生回调入口：投递一次设备到达
///
/// 返回 `false` 表示令牌已失效或厂商 ID 不匹配。
pub fn dispatch_arrival(token: HotplugToken, vendor_id: u16) -> bool {
    let registry = REGISTRY.lock();
    let Some(registration) = registry.get(&token.0) else {
        trace!("Arrival for stale hotplug token {}", token.0);
        return false;
    };
    if registration.vendor_id != vendor_id {
        trace!(
            "Ignoring arrival of vendor {:#06x} (watching {:#06x})",
            vendor_id, registration.vendor_id
        );
        return false;
    }
    match registration.tx.try_send(()) {
        Ok(()) | Err(TrySendError::Full(())) => true,
        Err(TrySendError::Disconnected(())) => false,
    }
}

/// 当前注册的监听数量
pub fn active_watches() -> usize {
    REGISTRY.lock().len()
}
