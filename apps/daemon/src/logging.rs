//! 日志初始化
//!
//! stderr 输出始终开启；指定目录时额外写入每日轮转的日志文件（非阻塞写入）。
//! `RUST_LOG` 优先，否则使用 `stripdeck=info`。

use anyhow::{Context, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

const DEFAULT_DIRECTIVE: &str = "stripdeck=info";
const LOG_FILE_PREFIX: &str = "stripdeckd.log";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE))
}

/// 安装全局 subscriber
///
/// 返回的 guard 必须在进程生命周期内持有，丢弃后文件日志停止刷新。
pub fn init(log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let registry = tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_writer(std::io::stderr));

    match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            registry
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .try_init()
                .context("Failed to install tracing subscriber")?;
            Ok(Some(guard))
        },
        None => {
            registry
                .try_init()
                .context("Failed to install tracing subscriber")?;
            Ok(None)
        },
    }
}
