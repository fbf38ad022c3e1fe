//! 生命周期外部信号：休眠唤醒与设备到达
//!
//! # 唤醒检测
//!
//! [`WakeDetector`] 是一个可移植的唤醒来源：系统挂起期间单调时钟不前进，
//! 而墙上时钟前进。周期性比较两者的增量，差值超过阈值即视为刚从休眠中恢复。

use crate::watchdog::{JoinTimeout, WatchdogError};
use crossbeam_channel::{Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime};
use stripdeck_device::CancelToken;
use tracing::{info, warn};

/// 生命周期管理器监听的信号
#[derive(Clone)]
pub struct LifecycleSignals {
    pub(crate) wake: Receiver<()>,
    pub(crate) arrival: Option<Receiver<()>>,
}

impl LifecycleSignals {
    /// 只有唤醒信号（等待设备时退化为定时轮询）
    pub fn new(wake: Receiver<()>) -> Self {
        Self {
            wake,
            arrival: None,
        }
    }

    /// 无任何外部信号
    pub fn none() -> Self {
        Self::new(crossbeam_channel::never())
    }

    /// 附加平台热插拔到达信号（提供后不再定时轮询）
    pub fn with_arrival(mut self, arrival: Receiver<()>) -> Self {
        self.arrival = Some(arrival);
        self
    }

    pub fn has_arrival(&self) -> bool {
        self.arrival.is_some()
    }
}

/// 容量为 1 的信号通道（未消费的重复信号被合并）
pub fn signal_channel() -> (Sender<()>, Receiver<()>) {
    crossbeam_channel::bounded(1)
}

/// 墙上时钟是否比单调时钟多走了超过 `threshold`
pub fn clock_jumped(wall_elapsed: Duration, mono_elapsed: Duration, threshold: Duration) -> bool {
    wall_elapsed.saturating_sub(mono_elapsed) > threshold
}

pub struct WakeDetector {
    stop: CancelToken,
    handle: Option<JoinHandle<()>>,
}

impl WakeDetector {
    /// 启动检测线程，检测到唤醒时向 `tx` 发送（非阻塞，满则丢弃）
    pub fn spawn(
        check_interval: Duration,
        threshold: Duration,
        tx: Sender<()>,
    ) -> Result<Self, WatchdogError> {
        let stop = CancelToken::new();
        let thread_stop = stop.clone();
        let handle = thread::Builder::new()
            .name("stripdeck-wake".into())
            .spawn(move || {
                let mut last_wall = SystemTime::now();
                let mut last_mono = Instant::now();
                while !thread_stop.wait_timeout(check_interval) {
                    let wall = SystemTime::now();
                    let mono = Instant::now();
                    // 墙上时钟回拨时按 0 处理
                    let wall_elapsed = wall.duration_since(last_wall).unwrap_or_default();
                    let mono_elapsed = mono.duration_since(last_mono);
                    if clock_jumped(wall_elapsed, mono_elapsed, threshold) {
                        info!(
                            "System wake detected (wall clock advanced {:?} more than monotonic)",
                            wall_elapsed.saturating_sub(mono_elapsed)
                        );
                        let _ = tx.try_send(());
                    }
                    last_wall = wall;
                    last_mono = mono;
                }
            })?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    pub fn stop(&mut self) {
        self.stop.cancel();
        if let Some(handle) = self.handle.take()
            && let Err(e) = handle.join_timeout(Duration::from_secs(1))
        {
            warn!("Wake detector did not stop cleanly: {}", e);
        }
    }
}

impl Drop for WakeDetector {
    fn drop(&mut self) {
        self.stop();
    }
}
