//! 设备生命周期管理器
//!
//! 外层循环：等待设备 → 稳定延迟 → 运行会话 → 拆除会话 → 回到等待。
//! 只有顶层取消会终止循环；获取失败、设备断开、唤醒都只会让循环重新开始。

use crate::acquire::{AcquireError, SingleFlightAcquirer};
use crate::provider::DeviceProvider;
use crate::signals::LifecycleSignals;
use crate::watchdog::{WatchdogError, run_with_timeout, spawn_watched};
use crate::{AtomicLifecycleState, LifecycleConfig, LifecycleError, LifecycleState, RunOutcome};
use crossbeam_channel::{after, never, select};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;
use stripdeck_coordinator::{Coordinator, CoordinatorConfig, CoordinatorError};
use stripdeck_device::{CancelToken, Device, DeviceError};
use tracing::{debug, error, info, warn};

/// 退出信号到达时，仍给关闭调用的短暂宽限
const SHUTDOWN_CLOSE_GRACE: Duration = Duration::from_millis(100);

/// 会话装配：在新的 Coordinator 上构造并注册模块
pub type SessionSetup = dyn Fn(&Coordinator) -> Result<(), CoordinatorError> + Send + Sync;

/// 等待设备时的触发源
enum WaitTrigger {
    Cancelled,
    Arrival,
    ArrivalClosed,
    Poll,
    Wake,
    WakeClosed,
}

/// 会话运行期间的触发源
enum SessionTrigger {
    Shutdown,
    Ended(Option<Result<(), CoordinatorError>>),
    Wake,
    WakeClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Shutdown,
    Disconnected,
    Wake,
    ForcedExit,
}

enum WakeProbe {
    Found(Arc<dyn Device>),
    NotFound,
    Cancelled,
}

pub struct LifecycleManager {
    acquirer: SingleFlightAcquirer,
    config: LifecycleConfig,
    coordinator_config: CoordinatorConfig,
    setup: Box<SessionSetup>,
    state: AtomicLifecycleState,
    sessions: AtomicU64,
}

impl LifecycleManager {
    /// 创建管理器
    ///
    /// # 参数
    ///
    /// - `provider`: 设备来源
    /// - `config`: 生命周期参数
    /// - `coordinator_config`: 每个会话的 Coordinator 参数
    /// - `setup`: 每个会话调用一次，负责构造模块并注册到新的 Coordinator
    pub fn new<F>(
        provider: Arc<dyn DeviceProvider>,
        config: LifecycleConfig,
        coordinator_config: CoordinatorConfig,
        setup: F,
    ) -> Self
    where
        F: Fn(&Coordinator) -> Result<(), CoordinatorError> + Send + Sync + 'static,
    {
        Self {
            acquirer: SingleFlightAcquirer::new(provider, config.acquire_timeout),
            config,
            coordinator_config,
            setup: Box::new(setup),
            state: AtomicLifecycleState::new(LifecycleState::WaitingForDevice),
            sessions: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state.get()
    }

    /// 已建立的会话数量
    pub fn sessions(&self) -> u64 {
        self.sessions.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// 运行生命周期循环（阻塞）
    ///
    /// 直到 `shutdown` 被取消。返回 [`RunOutcome::ForcedExit`] 时调用方应立即退出进程，
    /// 因为设备关闭调用仍卡在后台线程中。
    pub fn run(
        &self,
        shutdown: &CancelToken,
        signals: &LifecycleSignals,
    ) -> Result<RunOutcome, LifecycleError> {
        let mut signals = signals.clone();
        let result = self.run_loop(shutdown, &mut signals);
        self.state.set(LifecycleState::Stopped);
        result
    }

    fn run_loop(
        &self,
        shutdown: &CancelToken,
        signals: &mut LifecycleSignals,
    ) -> Result<RunOutcome, LifecycleError> {
        loop {
            self.state.set(LifecycleState::WaitingForDevice);
            let Some(device) = self.wait_for_device(shutdown, signals) else {
                info!("Exiting...");
                return Ok(RunOutcome::Shutdown);
            };

            // 设备恰好在退出请求之后到达
            if shutdown.is_cancelled() {
                info!("Exiting...");
                return Ok(self.close_device(&device, shutdown));
            }

            self.state.set(LifecycleState::Connecting);
            if shutdown.wait_timeout(self.config.stabilize_delay) {
                info!("Exiting...");
                return Ok(self.close_device(&device, shutdown));
            }
            while signals.wake.try_recv().is_ok() {
                debug!("Draining stale wake signal");
            }

            self.state.set(LifecycleState::Connected);
            let session = self.sessions.fetch_add(1, Ordering::SeqCst) + 1;
            match self.run_session(session, device, shutdown, signals)? {
                SessionEnd::ForcedExit => return Ok(RunOutcome::ForcedExit),
                end => debug!("Session {} ended: {:?}", session, end),
            }

            if shutdown.is_cancelled() {
                info!("Exiting...");
                return Ok(RunOutcome::Shutdown);
            }
            info!("Waiting for device reconnect...");
        }
    }

    /// 尝试获取一次设备；失败不致命
    fn probe(&self) -> Option<Arc<dyn Device>> {
        match self.acquirer.try_acquire() {
            Ok(device) => {
                info!("Device connected!");
                Some(device)
            },
            // 进行中与超时已在获取器中记录
            Err(AcquireError::InFlight) | Err(AcquireError::TimedOut(_)) => None,
            Err(e) => {
                debug!("Device not available: {}", e);
                None
            },
        }
    }

    fn wait_for_device(
        &self,
        shutdown: &CancelToken,
        signals: &mut LifecycleSignals,
    ) -> Option<Arc<dyn Device>> {
        if let Some(device) = self.probe() {
            return Some(device);
        }

        info!("Waiting for device...");
        loop {
            let wake = signals.wake.clone();
            let (arrival, poll) = match &signals.arrival {
                Some(arrival) => (arrival.clone(), never()),
                None => (never(), after(self.config.poll_interval)),
            };

            let trigger = select! {
                recv(shutdown.done()) -> _ => WaitTrigger::Cancelled,
                recv(arrival) -> msg => match msg {
                    Ok(()) => WaitTrigger::Arrival,
                    Err(_) => WaitTrigger::ArrivalClosed,
                },
                recv(poll) -> _ => WaitTrigger::Poll,
                recv(wake) -> msg => match msg {
                    Ok(()) => WaitTrigger::Wake,
                    Err(_) => WaitTrigger::WakeClosed,
                },
            };

            match trigger {
                WaitTrigger::Cancelled => return None,
                WaitTrigger::Arrival => info!("Device arrival detected, probing..."),
                WaitTrigger::ArrivalClosed => {
                    warn!("Hotplug source closed, falling back to polling");
                    signals.arrival = None;
                    continue;
                },
                WaitTrigger::Poll => {},
                WaitTrigger::Wake => {
                    // 唤醒后设备可能需要数秒才能重新枚举
                    info!("Wake signal received, probing for device...");
                    match self.probe_after_wake(shutdown) {
                        WakeProbe::Found(device) => return Some(device),
                        WakeProbe::Cancelled => return None,
                        WakeProbe::NotFound => {
                            info!("Device not found after wake, resuming wait...");
                            continue;
                        },
                    }
                },
                WaitTrigger::WakeClosed => {
                    warn!("Wake signal source closed");
                    signals.wake = never();
                    continue;
                },
            }

            if let Some(device) = self.probe() {
                return Some(device);
            }
        }
    }

    fn probe_after_wake(&self, shutdown: &CancelToken) -> WakeProbe {
        for attempt in 1..=self.config.wake_retry_count {
            if let Some(device) = self.probe() {
                return WakeProbe::Found(device);
            }
            debug!(
                "Wake probe {}/{} found no device",
                attempt, self.config.wake_retry_count
            );
            if shutdown.wait_timeout(self.config.wake_retry_interval) {
                return WakeProbe::Cancelled;
            }
        }
        WakeProbe::NotFound
    }

    /// 会话开始前的设备准备：亮度 + 清空按键
    fn prepare_device(&self, device: &dyn Device) {
        if let Err(e) = device.set_brightness(self.config.brightness) {
            warn!("Failed to set brightness: {}", e);
        }
        for key in device.keys() {
            if let Err(e) = device.clear_key(key) {
                warn!("Failed to clear {}: {}", key, e);
                break;
            }
        }
    }

    fn run_session(
        &self,
        session: u64,
        device: Arc<dyn Device>,
        shutdown: &CancelToken,
        signals: &mut LifecycleSignals,
    ) -> Result<SessionEnd, LifecycleError> {
        info!("Session {}: connected to {}", session, device.model_name());
        self.prepare_device(device.as_ref());

        // 每个会话都是全新的 Coordinator 和模块
        let coordinator = Arc::new(Coordinator::new(
            device.clone(),
            self.coordinator_config.clone(),
        ));
        if let Err(e) = (self.setup)(coordinator.as_ref()) {
            self.state.set(LifecycleState::Disconnecting);
            if is_device_fault(&e) {
                warn!("Session {}: device error during setup: {}", session, e);
                return Ok(self.close_session(&device, shutdown, SessionEnd::Disconnected));
            }
            error!("Session {}: setup failed: {}", session, e);
            return match self.close_device(&device, shutdown) {
                RunOutcome::ForcedExit => Ok(SessionEnd::ForcedExit),
                RunOutcome::Shutdown => Err(e.into()),
            };
        }

        let run_ctx = shutdown.child();
        let done = {
            let coordinator = coordinator.clone();
            let run_ctx = run_ctx.clone();
            spawn_watched("stripdeck-coordinator", move || coordinator.start(&run_ctx))
        };
        let done = match done {
            Ok(rx) => rx,
            Err(source) => {
                self.state.set(LifecycleState::Disconnecting);
                return match self.close_device(&device, shutdown) {
                    RunOutcome::ForcedExit => Ok(SessionEnd::ForcedExit),
                    RunOutcome::Shutdown => Err(LifecycleError::Spawn {
                        name: "coordinator",
                        source,
                    }),
                };
            },
        };

        let end = loop {
            let wake = signals.wake.clone();
            let trigger = select! {
                recv(shutdown.done()) -> _ => SessionTrigger::Shutdown,
                recv(done) -> msg => SessionTrigger::Ended(msg.ok()),
                recv(wake) -> msg => match msg {
                    Ok(()) => SessionTrigger::Wake,
                    Err(_) => SessionTrigger::WakeClosed,
                },
            };

            match trigger {
                SessionTrigger::Shutdown => {
                    info!("Shutting down...");
                    break SessionEnd::Shutdown;
                },
                SessionTrigger::Ended(Some(Ok(()))) => {
                    info!("Coordinator exited");
                    break SessionEnd::Disconnected;
                },
                SessionTrigger::Ended(Some(Err(e))) => {
                    warn!("Device disconnected: {}", e);
                    break SessionEnd::Disconnected;
                },
                SessionTrigger::Ended(None) => {
                    error!("Coordinator thread exited without a result");
                    break SessionEnd::Disconnected;
                },
                SessionTrigger::Wake => {
                    // 休眠可能让句柄处于不可用状态，即使看起来仍连接
                    info!("Reconnecting device after wake...");
                    break SessionEnd::Wake;
                },
                SessionTrigger::WakeClosed => {
                    warn!("Wake signal source closed");
                    signals.wake = never();
                },
            }
        };

        self.state.set(LifecycleState::Disconnecting);
        run_ctx.cancel();
        self.stop_coordinator(coordinator);

        // 传输层关闭时不取消进行中的 I/O，先让回调排空
        thread::sleep(self.config.close_drain_delay);

        Ok(self.close_session(&device, shutdown, end))
    }

    /// 关闭设备；关闭被强制放弃时会话以 [`SessionEnd::ForcedExit`] 结束
    fn close_session(
        &self,
        device: &Arc<dyn Device>,
        shutdown: &CancelToken,
        end: SessionEnd,
    ) -> SessionEnd {
        match self.close_device(device, shutdown) {
            RunOutcome::ForcedExit => SessionEnd::ForcedExit,
            RunOutcome::Shutdown => end,
        }
    }

    fn stop_coordinator(&self, coordinator: Arc<Coordinator>) {
        let timeout = self.config.coordinator_stop_timeout;
        match run_with_timeout("stripdeck-stop", timeout, move || coordinator.stop()) {
            Ok(Ok(())) => debug!("Coordinator stopped"),
            Ok(Err(e)) => warn!("Coordinator stop failed: {}", e),
            Err(WatchdogError::TimedOut(_)) => warn!("Cleanup timed out after {:?}", timeout),
            Err(e) => warn!("Coordinator stop failed: {}", e),
        }
    }

    /// 带超时关闭设备
    ///
    /// 关闭挂起期间收到退出信号时返回 [`RunOutcome::ForcedExit`]。
    fn close_device(&self, device: &Arc<dyn Device>, shutdown: &CancelToken) -> RunOutcome {
        let closing = device.clone();
        let rx = match spawn_watched("stripdeck-close", move || closing.close()) {
            Ok(rx) => rx,
            Err(e) => {
                warn!("Failed to spawn close thread: {}", e);
                return RunOutcome::Shutdown;
            },
        };

        let grace = SHUTDOWN_CLOSE_GRACE.min(self.config.close_timeout);
        select! {
            recv(rx) -> msg => log_close(msg.ok()),
            recv(shutdown.done()) -> _ => match rx.recv_timeout(grace) {
                Ok(result) => log_close(Some(result)),
                Err(_) => {
                    warn!("Device close still pending at shutdown, forcing exit");
                    return RunOutcome::ForcedExit;
                },
            },
            recv(after(self.config.close_timeout)) -> _ => {
                warn!("Device close timed out after {:?}", self.config.close_timeout);
            },
        }
        RunOutcome::Shutdown
    }
}

/// 装配期间的设备故障按断开处理；其余错误说明装配本身有误
fn is_device_fault(e: &CoordinatorError) -> bool {
    e.is_device_lost() || matches!(e, CoordinatorError::Device(DeviceError::Transport(_)))
}

fn log_close(result: Option<Result<(), DeviceError>>) {
    match result {
        Some(Ok(())) => debug!("Device closed"),
        Some(Err(e)) => warn!("Device close failed: {}", e),
        None => error!("Device close thread exited without a result"),
    }
}
