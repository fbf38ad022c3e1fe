//! 惰性过期的覆盖层计时器
//!
//! 覆盖层没有独立的定时器线程：激活时记录过期时刻，
//! 每次查询 [`OverlayTimer::is_active`] 时比较当前时刻，过期则顺带清除状态。
//!
//! 所有操作都有 `*_at(now)` 变体，测试可以用显式时刻驱动，无需真实等待。
//!
//! # 示例
//!
//! ```
//! use std::time::{Duration, Instant};
//! use stripdeck_module::OverlayTimer;
//!
//! let timer = OverlayTimer::new(Duration::from_secs(5));
//! let t0 = Instant::now();
//! timer.activate_at(t0);
//! timer.extend_at(t0 + Duration::from_secs(3));
//! assert!(timer.is_active_at(t0 + Duration::from_secs(6)));
//! assert!(!timer.is_active_at(t0 + Duration::from_secs(9)));
//! ```

use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

/// 默认覆盖层持续时间
pub const DEFAULT_OVERLAY_DURATION: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub struct OverlayTimer {
    duration: Duration,
    expires_at: Mutex<Option<Instant>>,
}

impl OverlayTimer {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            expires_at: Mutex::new(None),
        }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn activate(&self) {
        self.activate_at(Instant::now());
    }

    /// 激活（已激活时重置过期时刻）
    pub fn activate_at(&self, now: Instant) {
        *self.expires_at.lock() = Some(now + self.duration);
        debug!("Overlay activated for {:?}", self.duration);
    }

    pub fn extend(&self) -> bool {
        self.extend_at(Instant::now())
    }

    /// 延长到 `now + duration`
    ///
    /// 只有仍处于激活状态时才延长；返回是否延长成功。
    pub fn extend_at(&self, now: Instant) -> bool {
        let mut expires_at = self.expires_at.lock();
        match *expires_at {
            Some(deadline) if now < deadline => {
                *expires_at = Some(now + self.duration);
                true
            },
            Some(_) => {
                *expires_at = None;
                false
            },
            None => false,
        }
    }

    pub fn dismiss(&self) {
        if self.expires_at.lock().take().is_some() {
            debug!("Overlay dismissed");
        }
    }

    pub fn is_active(&self) -> bool {
        self.is_active_at(Instant::now())
    }

    /// 查询是否激活；已过期时清除状态
    pub fn is_active_at(&self, now: Instant) -> bool {
        let mut expires_at = self.expires_at.lock();
        match *expires_at {
            Some(deadline) if now < deadline => true,
            Some(_) => {
                *expires_at = None;
                debug!("Overlay expired");
                false
            },
            None => false,
        }
    }

    /// 当前记录的过期时刻（不做过期检查）
    pub fn expires_at(&self) -> Option<Instant> {
        *self.expires_at.lock()
    }
}

impl Default for OverlayTimer {
    fn default() -> Self {
        Self::new(DEFAULT_OVERLAY_DURATION)
    }
}
