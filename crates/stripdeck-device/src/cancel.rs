//! 层级取消令牌
//!
//! 一个会话由一个顶层令牌控制：取消父令牌会级联取消所有子令牌，
//! 子令牌的取消不影响父令牌。
//!
//! # 等待取消
//!
//! [`CancelToken::done`] 返回一个永不发送数据的 `Receiver`：取消时发送端被丢弃，
//! 接收端立即返回 `Disconnected`。因此它可以直接放进 `crossbeam_channel::select!`
//! 与其它通道一起等待：
//!
//! ```
//! use crossbeam_channel::{select, after};
//! use stripdeck_device::CancelToken;
//! use std::time::Duration;
//!
//! let token = CancelToken::new();
//! token.cancel();
//! select! {
//!     recv(token.done()) -> _ => {},
//!     recv(after(Duration::from_secs(5))) -> _ => panic!("should be cancelled"),
//! }
//! ```

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// 可克隆的取消令牌（克隆共享同一状态）
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

struct Inner {
    cancelled: AtomicBool,
    /// 取消时丢弃，唤醒所有 `done()` 的等待者
    tx: Mutex<Option<Sender<()>>>,
    rx: Receiver<()>,
    children: Mutex<Vec<Weak<Inner>>>,
}

impl Inner {
    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        self.tx.lock().take();

        let children = std::mem::take(&mut *self.children.lock());
        for child in children {
            if let Some(child) = child.upgrade() {
                child.cancel();
            }
        }
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::bounded(0);
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                tx: Mutex::new(Some(tx)),
                rx,
                children: Mutex::new(Vec::new()),
            }),
        }
    }

    /// 派生子令牌
    ///
    /// 父令牌已取消时，返回的子令牌也处于取消状态。
    pub fn child(&self) -> Self {
        let child = Self::new();
        {
            let mut children = self.inner.children.lock();
            children.retain(|c| c.strong_count() > 0);
            children.push(Arc::downgrade(&child.inner));
        }
        // 父令牌可能在 push 之前已取消（children 已被取走）
        if self.is_cancelled() {
            child.cancel();
        }
        child
    }

    pub fn cancel(&self) {
        self.inner.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// 取消通知通道（用于 `select!`）
    pub fn done(&self) -> &Receiver<()> {
        &self.inner.rx
    }

    /// 阻塞直到取消
    pub fn wait(&self) {
        let _ = self.inner.rx.recv();
    }

    /// 最多等待 `timeout`，返回 `true` 表示已取消
    ///
    /// 可作为"可取消的 sleep"使用。
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        match self.inner.rx.recv_timeout(timeout) {
            Err(RecvTimeoutError::Disconnected) => true,
            _ => self.is_cancelled(),
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
