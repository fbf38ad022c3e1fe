//! 生命周期集成测试的公共设施

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use stripdeck_coordinator::{Coordinator, CoordinatorConfig, CoordinatorError};
use stripdeck_device::{
    CancelToken, Device, DeviceError, KeyId, MockDevice, MockDeviceConfig, TransportError,
    TransportErrorKind,
};
use stripdeck_lifecycle::{
    DeviceProvider, JoinTimeout, LifecycleConfig, LifecycleError, LifecycleManager,
    LifecycleSignals, RunOutcome,
};
use stripdeck_module::{Module, ModuleError, Resources};

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

/// 可插拔的测试设备来源
pub struct TestDeck {
    pub device: Arc<MockDevice>,
    present: AtomicBool,
    acquires: AtomicUsize,
}

impl TestDeck {
    pub fn new(present: bool) -> Arc<Self> {
        Self::with_config(MockDeviceConfig::default(), present)
    }

    pub fn with_config(config: MockDeviceConfig, present: bool) -> Arc<Self> {
        Arc::new(Self {
            device: Arc::new(MockDevice::new(config)),
            present: AtomicBool::new(present),
            acquires: AtomicUsize::new(0),
        })
    }

    pub fn plug(&self) {
        self.present.store(true, Ordering::SeqCst);
    }

    pub fn unplug(&self) {
        self.present.store(false, Ordering::SeqCst);
    }

    pub fn acquires(&self) -> usize {
        self.acquires.load(Ordering::SeqCst)
    }
}

impl DeviceProvider for TestDeck {
    fn acquire(&self) -> Result<Arc<dyn Device>, DeviceError> {
        self.acquires.fetch_add(1, Ordering::SeqCst);
        if !self.present.load(Ordering::SeqCst) {
            return Err(TransportError::new(TransportErrorKind::NotFound, "no device").into());
        }
        self.device.open()?;
        Ok(self.device.clone())
    }
}

/// 占用第一个按键的最小模块；`stop` 可配置为挂起
pub struct SessionModule {
    stop_delay: Duration,
    inits: Arc<AtomicUsize>,
}

impl Module for SessionModule {
    fn id(&self) -> &str {
        "session"
    }

    fn init(&self, _ctx: CancelToken, _resources: Resources) -> Result<(), ModuleError> {
        self.inits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) -> Result<(), ModuleError> {
        if !self.stop_delay.is_zero() {
            thread::sleep(self.stop_delay);
        }
        Ok(())
    }
}

/// 生成会话装配闭包，返回装配次数计数器
pub fn session_setup(
    stop_delay: Duration,
) -> (
    impl Fn(&Coordinator) -> Result<(), CoordinatorError> + Send + Sync + 'static,
    Arc<AtomicUsize>,
) {
    let inits = Arc::new(AtomicUsize::new(0));
    let counter = inits.clone();
    let setup = move |coordinator: &Coordinator| -> Result<(), CoordinatorError> {
        let module = Arc::new(SessionModule {
            stop_delay,
            inits: counter.clone(),
        });
        coordinator.register_module(module, Resources::new().with_keys(vec![KeyId::Key1]))
    };
    (setup, inits)
}

/// 所有延迟都缩短的配置
pub fn fast_config() -> LifecycleConfig {
    LifecycleConfig {
        acquire_timeout: Duration::from_millis(500),
        poll_interval: Duration::from_millis(20),
        wake_retry_count: 3,
        wake_retry_interval: Duration::from_millis(20),
        stabilize_delay: Duration::from_millis(20),
        coordinator_stop_timeout: Duration::from_millis(300),
        close_drain_delay: Duration::from_millis(10),
        close_timeout: Duration::from_millis(300),
        brightness: 80,
    }
}

pub fn fast_coordinator_config() -> CoordinatorConfig {
    CoordinatorConfig {
        render_interval: Duration::from_millis(20),
        ..CoordinatorConfig::default()
    }
}

/// 在后台线程运行的管理器
pub struct Running {
    pub manager: Arc<LifecycleManager>,
    pub shutdown: CancelToken,
    handle: JoinHandle<Result<RunOutcome, LifecycleError>>,
}

impl Running {
    pub fn start(manager: LifecycleManager, signals: LifecycleSignals) -> Self {
        let manager = Arc::new(manager);
        let shutdown = CancelToken::new();
        let handle = {
            let manager = manager.clone();
            let shutdown = shutdown.clone();
            thread::spawn(move || manager.run(&shutdown, &signals))
        };
        Self {
            manager,
            shutdown,
            handle,
        }
    }

    pub fn sessions(&self) -> u64 {
        self.manager.sessions()
    }

    /// 请求退出并等待 `run` 返回
    pub fn shutdown(self, timeout: Duration) -> Result<RunOutcome, LifecycleError> {
        self.shutdown.cancel();
        self.handle
            .join_timeout(timeout)
            .expect("lifecycle run did not return in time")
    }
}
