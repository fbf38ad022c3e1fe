use std::sync::Arc;
use stripdeck_device::{Device, DeviceError};

/// 设备来源（枚举 + 打开）
///
/// 实现可以无限阻塞（例如卡在内核枚举调用中），调用方通过
/// [`SingleFlightAcquirer`](crate::SingleFlightAcquirer) 施加超时与单飞保护。
pub trait DeviceProvider: Send + Sync + 'static {
    /// 查找并打开设备，返回已打开的句柄
    fn acquire(&self) -> Result<Arc<dyn Device>, DeviceError>;
}

impl<F> DeviceProvider for F
where
    F: Fn() -> Result<Arc<dyn Device>, DeviceError> + Send + Sync + 'static,
{
    fn acquire(&self) -> Result<Arc<dyn Device>, DeviceError> {
        self()
    }
}
