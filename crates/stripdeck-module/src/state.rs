//! 模块生命周期状态

use std::fmt;

/// 模块在单个设备会话内的状态
///
/// ```text
/// Uninitialized ──init──▶ Initializing ──ok──▶ Running ──stop──▶ Stopped
///                                     └──err──▶ Failed
/// ```
///
/// `Failed` 是会话内的终态：不重试，不再接收事件和渲染调用。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModuleState {
    #[default]
    Uninitialized,
    Initializing,
    Running,
    Failed,
    Stopped,
}

impl ModuleState {
    /// 是否参与事件路由与渲染
    pub fn is_running(self) -> bool {
        self == Self::Running
    }

    pub fn is_failed(self) -> bool {
        self == Self::Failed
    }
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::Running => "running",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}
