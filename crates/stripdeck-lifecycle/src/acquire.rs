//! 单飞（single-flight）设备获取
//!
//! 设备枚举可能在内核中无限阻塞且无法取消。若每次超时都重新发起枚举，
//! 卡住的工作线程会越积越多并占住稀缺的硬件资源，之后的枚举全部失败。
//!
//! 因此：
//!
//! - 任意时刻最多只有一次枚举在进行；进行中再次请求立即返回 [`AcquireError::InFlight`]
//! - 等待有硬超时；超时后工作线程被放弃
//! - 被放弃的枚举若迟到成功，设备立即关闭，结果丢弃
//!
//! 结果通过零容量（rendezvous）通道交付：调用方超时后丢弃接收端，
//! 工作线程的发送随即失败，从而确定"无人接收"并负责关闭迟到的设备。

use crate::provider::DeviceProvider;
use crate::watchdog::WatchdogError;
use crossbeam_channel::{RecvTimeoutError, SendError};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use stripdeck_device::{Device, DeviceError};
use thiserror::Error;
use tracing::{debug, info, warn};

/// 默认获取超时
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum AcquireError {
    /// 上一次枚举仍在进行（设备暂不可用）
    #[error("A device enumeration is already in flight")]
    InFlight,

    /// 枚举超时（工作线程已被放弃）
    #[error("Device enumeration timed out after {0:?}")]
    TimedOut(Duration),

    /// 设备不存在或无法打开
    #[error("Device unavailable: {0}")]
    Failed(#[from] DeviceError),

    /// 工作线程异常退出
    #[error("Enumeration worker failed: {0}")]
    Worker(#[from] WatchdogError),
}

pub struct SingleFlightAcquirer {
    provider: Arc<dyn DeviceProvider>,
    timeout: Duration,
    in_flight: Arc<AtomicBool>,
}

impl SingleFlightAcquirer {
    pub fn new(provider: Arc<dyn DeviceProvider>, timeout: Duration) -> Self {
        Self {
            provider,
            timeout,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// 是否有枚举正在进行（包括已超时但尚未返回的）
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// 尝试获取一个已打开的设备
    ///
    /// 最多阻塞 `timeout`；有枚举在进行时立即返回 [`AcquireError::InFlight`]。
    pub fn try_acquire(&self) -> Result<Arc<dyn Device>, AcquireError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Device enumeration still in flight, skipping");
            return Err(AcquireError::InFlight);
        }

        let (tx, rx) = crossbeam_channel::bounded::<Result<Arc<dyn Device>, DeviceError>>(0);
        let provider = self.provider.clone();
        let in_flight = self.in_flight.clone();

        let spawned = thread::Builder::new()
            .name("stripdeck-acquire".into())
            .spawn(move || {
                let result = provider.acquire();
                in_flight.store(false, Ordering::SeqCst);
                match tx.send(result) {
                    Ok(()) => {},
                    Err(SendError(Ok(device))) => {
                        info!("Late device arrival from timed-out enumeration, closing");
                        if let Err(e) = device.close() {
                            warn!("Failed to close late device: {}", e);
                        }
                    },
                    Err(SendError(Err(e))) => {
                        debug!("Timed-out enumeration finished with error: {}", e);
                    },
                }
            });
        if let Err(e) = spawned {
            self.in_flight.store(false, Ordering::SeqCst);
            return Err(WatchdogError::Spawn(e).into());
        }

        match rx.recv_timeout(self.timeout) {
            Ok(result) => Ok(result?),
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "Device detection timed out after {:?} (enumeration still blocked)",
                    self.timeout
                );
                Err(AcquireError::TimedOut(self.timeout))
            },
            Err(RecvTimeoutError::Disconnected) => Err(WatchdogError::Panicked.into()),
        }
    }
}
