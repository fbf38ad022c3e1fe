use crate::render::RenderLoop;
use crate::{CoordinatorConfig, CoordinatorError};
use crossbeam_channel::select;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use stripdeck_device::{CancelToken, Device, DialId, KeyId, Rect};
use stripdeck_module::{Module, ModuleState, Resources};
use tracing::{debug, error, info, warn};

pub(crate) struct ModuleEntry {
    pub(crate) module: Arc<dyn Module>,
    pub(crate) resources: Resources,
    pub(crate) state: ModuleState,
}

/// 受单一读写锁保护的 Coordinator 状态
#[derive(Default)]
pub(crate) struct Registry {
    /// 注册顺序
    pub(crate) entries: Vec<ModuleEntry>,
    /// 反向索引：按键 → entries 下标
    pub(crate) key_owners: HashMap<KeyId, usize>,
    pub(crate) dial_owners: HashMap<DialId, usize>,
    /// 整条触摸条的几何（设备不支持时为空）
    pub(crate) strip_rect: Rect,
    /// 上一个渲染周期是否处于覆盖层
    pub(crate) overlay_was_active: bool,
}

impl Registry {
    /// 参与路由和渲染的模块（注册顺序）
    pub(crate) fn running(&self) -> impl Iterator<Item = &ModuleEntry> {
        self.entries.iter().filter(|e| e.state.is_running())
    }
}

/// 事件处理器、渲染线程与 Coordinator 共享的部分
pub(crate) struct Shared {
    pub(crate) device: Arc<dyn Device>,
    pub(crate) config: CoordinatorConfig,
    pub(crate) registry: RwLock<Registry>,
}

/// 模块协调器
///
/// 一个实例对应一个设备会话，不跨重连复用。
///
/// # 示例
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use stripdeck_coordinator::{Coordinator, CoordinatorConfig};
/// use stripdeck_device::{CancelToken, Device};
///
/// fn run(device: Arc<dyn Device>) {
///     let coordinator = Arc::new(Coordinator::new(device, CoordinatorConfig::default()));
///     // coordinator.register_module(...);
///     let ctx = CancelToken::new();
///     if let Err(e) = coordinator.start(&ctx) {
///         eprintln!("session ended: {}", e);
///     }
///     let _ = coordinator.stop();
/// }
/// ```
pub struct Coordinator {
    shared: Arc<Shared>,
    started: AtomicBool,
    session: Mutex<Option<CancelToken>>,
    render_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Coordinator {
    pub fn new(device: Arc<dyn Device>, config: CoordinatorConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                device,
                config,
                registry: RwLock::new(Registry::default()),
            }),
            started: AtomicBool::new(false),
            session: Mutex::new(None),
            render_thread: Mutex::new(None),
        }
    }

    pub fn device(&self) -> &Arc<dyn Device> {
        &self.shared.device
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.shared.config
    }

    /// 注册模块及其资源
    ///
    /// 必须在 [`start`](Self::start) 之前调用。资源重叠时后注册者覆盖前者的反向映射。
    pub fn register_module(
        &self,
        module: Arc<dyn Module>,
        resources: Resources,
    ) -> Result<(), CoordinatorError> {
        if self.started.load(Ordering::SeqCst) {
            return Err(CoordinatorError::AlreadyStarted);
        }

        let mut registry = self.shared.registry.write();
        let index = registry.entries.len();
        for &key in &resources.keys {
            if let Some(prev) = registry.key_owners.insert(key, index) {
                warn!(
                    "{} reassigned from '{}' to '{}'",
                    key,
                    registry.entries[prev].module.id(),
                    module.id()
                );
            }
        }
        for &dial in &resources.dials {
            if let Some(prev) = registry.dial_owners.insert(dial, index) {
                warn!(
                    "{} reassigned from '{}' to '{}'",
                    dial,
                    registry.entries[prev].module.id(),
                    module.id()
                );
            }
        }

        debug!("Registered module '{}': {:?}", module.id(), resources);
        registry.entries.push(ModuleEntry {
            module,
            resources,
            state: ModuleState::Uninitialized,
        });
        Ok(())
    }

    /// 查询模块注册时分配的资源
    pub fn resources_of(&self, id: &str) -> Option<Resources> {
        self.shared
            .registry
            .read()
            .entries
            .iter()
            .find(|e| e.module.id() == id)
            .map(|e| e.resources.clone())
    }

    pub fn module_state(&self, id: &str) -> Option<ModuleState> {
        self.shared
            .registry
            .read()
            .entries
            .iter()
            .find(|e| e.module.id() == id)
            .map(|e| e.state)
    }

    /// 已注册模块的标识（注册顺序）
    pub fn module_ids(&self) -> Vec<String> {
        self.shared
            .registry
            .read()
            .entries
            .iter()
            .map(|e| e.module.id().to_string())
            .collect()
    }

    /// 当前是否有覆盖层激活（会触发惰性过期）
    pub fn is_overlay_active(&self) -> bool {
        self.shared.active_overlay().is_some()
    }

    /// 启动会话（阻塞）
    ///
    /// 直到 `ctx` 被取消（返回 `Ok`）或设备事件循环出错（返回 `Err`）。
    /// 返回后调用方必须调用 [`stop`](Self::stop)。
    pub fn start(&self, ctx: &CancelToken) -> Result<(), CoordinatorError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(CoordinatorError::AlreadyStarted);
        }

        let session = ctx.child();
        *self.session.lock() = Some(session.clone());

        let device = self.shared.device.clone();
        if device.touch_strip_supported() {
            match device.touch_strip_image_rect() {
                Ok(rect) => self.shared.registry.write().strip_rect = rect,
                Err(e) => warn!("Failed to query touch strip geometry: {}", e),
            }
        }

        self.init_modules(&session);
        self.shared.install_handlers()?;

        let (listen_tx, listen_rx) = crossbeam_channel::bounded(1);
        let listen_session = session.clone();
        let listen_device = device.clone();
        thread::Builder::new()
            .name("stripdeck-listen".into())
            .spawn(move || {
                let result = listen_device.listen(&listen_session);
                let _ = listen_tx.send(result);
            })
            .map_err(|source| CoordinatorError::Spawn {
                name: "listen",
                source,
            })?;

        let render = RenderLoop::new(self.shared.clone(), session.clone());
        let handle = thread::Builder::new()
            .name("stripdeck-render".into())
            .spawn(move || render.run())
            .map_err(|source| CoordinatorError::Spawn {
                name: "render",
                source,
            })?;
        *self.render_thread.lock() = Some(handle);

        info!(
            "Coordinator started on {} ({} modules)",
            device.model_name(),
            self.shared.registry.read().entries.len()
        );

        select! {
            recv(session.done()) -> _ => Ok(()),
            recv(listen_rx) -> msg => match msg {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => {
                    warn!("Device listen ended with error: {}", e);
                    Err(e.into())
                },
                Err(_) => Err(CoordinatorError::ListenThreadLost),
            },
        }
    }

    /// 停止会话
    ///
    /// 取消会话令牌，按注册顺序串行调用每个模块的 `stop`，然后等待渲染线程退出。
    /// 没有内部超时，调用方负责施加超时。
    pub fn stop(&self) -> Result<(), CoordinatorError> {
        if let Some(session) = self.session.lock().as_ref() {
            session.cancel();
        }

        let modules: Vec<(usize, Arc<dyn Module>)> = self
            .shared
            .registry
            .read()
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (i, e.module.clone()))
            .collect();

        for (index, module) in modules {
            if let Err(e) = module.stop() {
                warn!("Module '{}' failed to stop: {}", module.id(), e);
            }
            let mut registry = self.shared.registry.write();
            let entry = &mut registry.entries[index];
            if !entry.state.is_failed() {
                entry.state = ModuleState::Stopped;
            }
        }

        if let Some(handle) = self.render_thread.lock().take()
            && handle.join().is_err()
        {
            error!("Render thread panicked");
        }

        debug!("Coordinator stopped");
        Ok(())
    }

    /// 按注册顺序初始化；失败的模块标记为 `Failed` 并继续
    fn init_modules(&self, session: &CancelToken) {
        let pending: Vec<(usize, Arc<dyn Module>, Resources)> = {
            let mut registry = self.shared.registry.write();
            registry
                .entries
                .iter_mut()
                .enumerate()
                .map(|(i, e)| {
                    e.state = ModuleState::Initializing;
                    (i, e.module.clone(), e.resources.clone())
                })
                .collect()
        };

        for (index, module, resources) in pending {
            let state = match module.init(session.clone(), resources) {
                Ok(()) => {
                    debug!("Module '{}' initialized", module.id());
                    ModuleState::Running
                },
                Err(e) => {
                    error!(
                        "Module '{}' failed to initialize: {} (skipping)",
                        module.id(),
                        e
                    );
                    ModuleState::Failed
                },
            };
            self.shared.registry.write().entries[index].state = state;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stripdeck_device::MockDevice;
    use stripdeck_module::ModuleError;

    struct Named(&'static str);

    impl Module for Named {
        fn id(&self) -> &str {
            self.0
        }

        fn init(&self, _ctx: CancelToken, _resources: Resources) -> Result<(), ModuleError> {
            Ok(())
        }

        fn stop(&self) -> Result<(), ModuleError> {
            Ok(())
        }
    }

    fn coordinator() -> Coordinator {
        Coordinator::new(Arc::new(MockDevice::default()), CoordinatorConfig::default())
    }

    #[test]
    fn test_register_builds_reverse_maps() {
        let c = coordinator();
        c.register_module(
            Arc::new(Named("a")),
            Resources::new().with_keys([KeyId::Key1, KeyId::Key2]),
        )
        .unwrap();
        c.register_module(
            Arc::new(Named("b")),
            Resources::new()
                .with_keys([KeyId::Key3])
                .with_dials([DialId::Dial1]),
        )
        .unwrap();

        let registry = c.shared.registry.read();
        assert_eq!(registry.key_owners[&KeyId::Key1], 0);
        assert_eq!(registry.key_owners[&KeyId::Key3], 1);
        assert_eq!(registry.dial_owners[&DialId::Dial1], 1);
        assert!(!registry.key_owners.contains_key(&KeyId::Key8));
    }

    #[test]
    fn test_overlapping_registration_later_wins() {
        let c = coordinator();
        c.register_module(Arc::new(Named("a")), Resources::new().with_keys([KeyId::Key1]))
            .unwrap();
        c.register_module(Arc::new(Named("b")), Resources::new().with_keys([KeyId::Key1]))
            .unwrap();

        assert_eq!(c.shared.registry.read().key_owners[&KeyId::Key1], 1);
        // 资源记录本身不被修改
        assert_eq!(
            c.resources_of("a"),
            Some(Resources::new().with_keys([KeyId::Key1]))
        );
    }

    #[test]
    fn test_unknown_module_queries() {
        let c = coordinator();
        assert!(c.resources_of("missing").is_none());
        assert!(c.module_state("missing").is_none());
        assert!(c.module_ids().is_empty());
    }

    #[test]
    fn test_stop_without_start_stops_modules() {
        let c = coordinator();
        c.register_module(Arc::new(Named("a")), Resources::default())
            .unwrap();
        c.stop().unwrap();
        assert_eq!(c.module_state("a"), Some(ModuleState::Stopped));
    }
}
