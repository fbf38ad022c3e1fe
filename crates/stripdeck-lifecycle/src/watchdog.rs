//! 阻塞调用的超时看门狗
//!
//! 设备关闭、模块停止等调用可能在内核或第三方代码中无限阻塞，且没有取消原语。
//! 这里的做法是把调用放到独立线程，调用方最多等待给定时长；
//! 超时后工作线程继续运行（被放弃），进程退出时由操作系统回收。

use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WatchdogError {
    #[error("Operation timed out after {0:?}")]
    TimedOut(Duration),
    #[error("Worker thread panicked")]
    Panicked,
    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// 带超时的线程 join
pub trait JoinTimeout<T> {
    fn join_timeout(self, timeout: Duration) -> Result<T, WatchdogError>;
}

impl<T: Send + 'static> JoinTimeout<T> for JoinHandle<T> {
    fn join_timeout(self, timeout: Duration) -> Result<T, WatchdogError> {
        let (tx, rx) = crossbeam_channel::bounded(1);

        // 由辅助线程执行 join，调用方只在通道上等待
        thread::spawn(move || {
            let _ = tx.send(self.join());
        });

        match rx.recv_timeout(timeout) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(WatchdogError::Panicked),
            Err(RecvTimeoutError::Timeout) => Err(WatchdogError::TimedOut(timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(WatchdogError::Panicked),
        }
    }
}

/// 在命名线程上执行 `f`，返回结果通道
///
/// 通道容量为 1，接收方被丢弃后工作线程的发送不会阻塞。
pub fn spawn_watched<T, F>(name: &str, f: F) -> Result<Receiver<T>, WatchdogError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = crossbeam_channel::bounded(1);
    thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let _ = tx.send(f());
        })?;
    Ok(rx)
}

/// 执行 `f`，最多等待 `timeout`
pub fn run_with_timeout<T, F>(name: &str, timeout: Duration, f: F) -> Result<T, WatchdogError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let rx = spawn_watched(name, f)?;
    match rx.recv_timeout(timeout) {
        Ok(value) => Ok(value),
        Err(RecvTimeoutError::Timeout) => Err(WatchdogError::TimedOut(timeout)),
        Err(RecvTimeoutError::Disconnected) => Err(WatchdogError::Panicked),
    }
}
