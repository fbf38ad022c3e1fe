//! 模块通用状态
//!
//! 具体模块内嵌 [`ModuleBase`]，在自己的 `init`/`stop` 中委托给它，
//! 从而统一保存标识、资源和派生的取消令牌。

use crate::{ModuleError, Resources};
use parking_lot::Mutex;
use stripdeck_device::CancelToken;
use tracing::debug;

#[derive(Default)]
struct BaseState {
    resources: Resources,
    ctx: Option<CancelToken>,
}

pub struct ModuleBase {
    id: String,
    state: Mutex<BaseState>,
}

impl ModuleBase {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: Mutex::new(BaseState::default()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// 保存资源，并从会话令牌派生模块自己的令牌
    pub fn init(&self, ctx: &CancelToken, resources: Resources) {
        let mut state = self.state.lock();
        state.ctx = Some(ctx.child());
        state.resources = resources;
        debug!("Module '{}' initialized", self.id);
    }

    /// 取消模块令牌（模块的后台任务应随之退出）
    pub fn stop(&self) {
        if let Some(ctx) = self.state.lock().ctx.as_ref() {
            ctx.cancel();
        }
    }

    pub fn resources(&self) -> Resources {
        self.state.lock().resources.clone()
    }

    /// 模块令牌（`init` 之前为 `None`）
    pub fn context(&self) -> Option<CancelToken> {
        self.state.lock().ctx.clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.state
            .lock()
            .ctx
            .as_ref()
            .is_some_and(CancelToken::is_cancelled)
    }

    /// 模块已停止时返回 [`ModuleError::Stopped`]，供事件处理器开头调用
    pub fn ensure_running(&self) -> Result<(), ModuleError> {
        if self.is_stopped() {
            return Err(ModuleError::Stopped);
        }
        Ok(())
    }
}
