//! LanShare CLI
//!
//! 命令行前端：扫描附近 BLE 设备、开启/关闭局域网文件共享

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use lanshare_core::LogLevel;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lanshare", version, about = "局域网共享 - BLE 设备扫描与文件共享")]
struct Cli {
    /// 日志级别 (error/warn/info/debug/trace)，RUST_LOG 优先
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 扫描附近设备
    Scan {
        /// 扫描时长 (秒)，<= 0 时使用 5 秒
        #[arg(short, long, allow_negative_numbers = true)]
        seconds: Option<i64>,
        /// 输出格式化的 JSON
        #[arg(long)]
        pretty: bool,
    },
    /// 开启文件共享，Ctrl+C 停止
    Share {
        /// 监听端口 (0 表示随机分配)
        #[arg(short, long)]
        port: Option<u16>,
        /// 共享目录 (默认: ./shared)
        #[arg(short, long)]
        root: Option<PathBuf>,
    },
    /// 查看当前配置
    Config {
        /// 把当前配置写入配置文件
        #[arg(long)]
        save: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = lanshare_core::Settings::load();

    let level = cli.log_level.unwrap_or(if settings.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    });
    init_logging(level);

    match cli.command {
        Commands::Scan { seconds, pretty } => {
            commands::scan(seconds.unwrap_or(settings.scan_seconds), pretty).await?;
        }
        Commands::Share { port, root } => {
            let root = root.unwrap_or_else(|| settings.share_root.clone());
            commands::share(port.unwrap_or(settings.share_port), root).await?;
        }
        Commands::Config { save } => {
            commands::config(&settings, save)?;
        }
    }

    Ok(())
}

fn init_logging(level: LogLevel) {
    // 桥接 log crate（lanshare-core 使用）到 tracing
    let _ = tracing_log::LogTracer::init();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(level.filter_directive())),
        )
        .with_writer(std::io::stderr)
        .try_init();
}
