//! # StripDeck 守护进程
//!
//! 保持与控制面板的连接，在断开、休眠唤醒后自动恢复，并运行内置模块。
//!
//! ```bash
//! # 前台运行（默认子命令）
//! stripdeckd
//!
//! # 生成默认配置文件
//! stripdeckd config init
//!
//! # 检查配置与设备
//! stripdeckd status
//! ```

mod config;
mod logging;
mod modules;
mod provider;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use config::DaemonConfig;
use provider::{VIRTUAL_VENDOR_ID, VirtualDeckProvider};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use stripdeck_device::CancelToken;
use stripdeck_lifecycle::{
    HotplugWatch, LifecycleManager, LifecycleSignals, RunOutcome, SingleFlightAcquirer,
    WakeDetector, hotplug, signal_channel,
};
use tracing::{info, warn};

/// `status` 探测设备的超时
const STATUS_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// StripDeck 守护进程
#[derive(Parser, Debug)]
#[command(name = "stripdeckd")]
#[command(about = "StripDeck dashboard daemon", long_about = None)]
#[command(version)]
struct Cli {
    /// 配置文件路径
    ///
    /// 默认: $STRIPDECK_CONFIG 或 <config_dir>/stripdeck/config.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// 日志文件目录（每日轮转），覆盖配置文件中的 `log.dir`
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 前台运行（默认）
    Run(RunArgs),

    /// 显示配置文件位置并探测设备
    Status,

    /// 配置管理
    #[command(subcommand)]
    Config(ConfigCommand),
}

/// 运行参数（覆盖配置文件）
#[derive(Args, Debug, Default)]
struct RunArgs {
    /// 亮度（0-100）
    #[arg(long)]
    brightness: Option<u8>,

    /// 渲染周期（毫秒）
    #[arg(long)]
    render_interval_ms: Option<u64>,

    /// 虚拟设备拔插周期（毫秒，0 关闭）
    #[arg(long)]
    replug_interval_ms: Option<u64>,

    /// 关闭休眠唤醒检测
    #[arg(long)]
    no_wake: bool,

    /// 关闭热插拔通知（退化为轮询）
    #[arg(long)]
    no_hotplug: bool,
}

impl RunArgs {
    fn apply(&self, config: &mut DaemonConfig) {
        if let Some(brightness) = self.brightness {
            config.lifecycle.brightness = brightness;
        }
        if let Some(interval) = self.render_interval_ms {
            config.coordinator.render_interval_ms = interval;
        }
        if let Some(interval) = self.replug_interval_ms {
            config.virtual_deck.replug_interval_ms = interval;
        }
        if self.no_wake {
            config.wake.enabled = false;
        }
        if self.no_hotplug {
            config.virtual_deck.hotplug = false;
        }
    }
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// 写入默认配置文件
    Init {
        /// 覆盖已存在的文件
        #[arg(long)]
        force: bool,
    },

    /// 打印生效的配置
    Show,
}

impl ConfigCommand {
    fn execute(self, path: Option<&Path>, config: &DaemonConfig) -> Result<()> {
        match self {
            ConfigCommand::Init { force } => {
                let Some(path) = path else {
                    bail!("Cannot determine config directory, pass --config");
                };
                if path.exists() && !force {
                    bail!(
                        "Config file {} already exists (use --force to overwrite)",
                        path.display()
                    );
                }
                DaemonConfig::default().save(path)?;
                println!("Wrote default config to {}", path.display());
                Ok(())
            },

            ConfigCommand::Show => {
                match path {
                    Some(path) if path.exists() => println!("# {}", path.display()),
                    Some(path) => println!("# {} (not found, defaults)", path.display()),
                    None => println!("# (defaults)"),
                }
                print!("{}", config.to_toml()?);
                Ok(())
            },
        }
    }
}

/// 安装 Ctrl+C / SIGTERM 处理：第一次优雅退出，第二次立即退出
fn install_signal_handler(shutdown: CancelToken) -> Result<()> {
    let received = AtomicUsize::new(0);
    ctrlc::set_handler(move || {
        if received.fetch_add(1, Ordering::SeqCst) == 0 {
            eprintln!("\nReceived interrupt signal. Shutting down...");
            shutdown.cancel();
        } else {
            eprintln!("Received second interrupt signal. Exiting immediately.");
            process::exit(1);
        }
    })
    .context("Failed to set signal handler")
}

fn run_daemon(config: &DaemonConfig) -> Result<RunOutcome> {
    let shutdown = CancelToken::new();
    install_signal_handler(shutdown.clone())?;

    let provider = Arc::new(VirtualDeckProvider::new(&config.virtual_deck.model_name));

    // 监听与探测器必须活到 run 返回
    let watch = config
        .virtual_deck
        .hotplug
        .then(|| hotplug::watch(VIRTUAL_VENDOR_ID));
    let (wake_tx, wake_rx) = signal_channel();
    let _detector = if config.wake.enabled {
        Some(
            WakeDetector::spawn(
                Duration::from_millis(config.wake.check_interval_ms.max(1)),
                Duration::from_millis(config.wake.threshold_ms),
                wake_tx,
            )
            .context("Failed to start wake detector")?,
        )
    } else {
        None
    };

    let mut signals = if config.wake.enabled {
        LifecycleSignals::new(wake_rx)
    } else {
        LifecycleSignals::none()
    };
    if let Some(watch) = &watch {
        signals = signals.with_arrival(watch.arrivals());
    }

    let replug = match config.replug_interval() {
        Some(interval) => Some(
            provider
                .spawn_replug(
                    interval,
                    watch.as_ref().map(HotplugWatch::token),
                    shutdown.clone(),
                )
                .context("Failed to start replug thread")?,
        ),
        None => None,
    };

    let manager = LifecycleManager::new(
        provider,
        config.lifecycle_config(),
        config.coordinator_config(),
        modules::register_all,
    );

    info!("StripDeck daemon started. Press Ctrl+C to stop.");
    let result = manager.run(&shutdown, &signals);

    shutdown.cancel();
    if let Some(handle) = replug
        && handle.join().is_err()
    {
        warn!("Replug thread panicked");
    }

    Ok(result?)
}

fn status(path: Option<&Path>, config: &DaemonConfig) -> Result<()> {
    match path {
        Some(path) if path.exists() => println!("Config: {}", path.display()),
        Some(path) => println!("Config: {} (not found, using defaults)", path.display()),
        None => println!("Config: (no config directory, using defaults)"),
    }

    let provider = Arc::new(VirtualDeckProvider::new(&config.virtual_deck.model_name));
    let acquirer = SingleFlightAcquirer::new(provider, STATUS_PROBE_TIMEOUT);
    match acquirer.try_acquire() {
        Ok(device) => {
            println!(
                "Device: {} ({} keys, {} dials, touch strip: {})",
                device.model_name(),
                device.key_count(),
                device.dial_count(),
                if device.touch_strip_supported() {
                    "yes"
                } else {
                    "no"
                }
            );
            if let Err(e) = device.close() {
                warn!("Failed to close device: {}", e);
            }
        },
        Err(e) => println!("Device: not available ({})", e),
    }
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.clone().or_else(config::default_config_path);
    let mut config = match &config_path {
        Some(path) => DaemonConfig::load(path)?,
        None => DaemonConfig::default(),
    };
    if let Some(dir) = cli.log_dir {
        config.log.dir = Some(dir);
    }

    match cli.command.unwrap_or(Commands::Run(RunArgs::default())) {
        Commands::Config(cmd) => cmd.execute(config_path.as_deref(), &config),

        Commands::Status => {
            let _guard = logging::init(config.log.dir.as_deref())?;
            status(config_path.as_deref(), &config)
        },

        Commands::Run(args) => {
            args.apply(&mut config);
            let guard = logging::init(config.log.dir.as_deref())?;
            if let Some(path) = &config_path {
                info!("Using config {}", path.display());
            }

            if run_daemon(&config)? == RunOutcome::ForcedExit {
                // 关闭调用仍卡在后台线程，直接退出进程
                drop(guard);
                process::exit(0);
            }
            info!("StripDeck daemon stopped");
            Ok(())
        },
    }
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}
