//! 子命令实现

use anyhow::{Context, Result};
use lanshare_core::{BtleplugDiscovery, LanShare, Settings, ShareServer};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// 扫描并打印 JSON 结果；Ctrl+C 提前结束扫描
pub async fn scan(seconds: i64, pretty: bool) -> Result<()> {
    let lanshare = LanShare::new();

    let cancel = CancellationToken::new();
    let ctrl_c = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("收到 Ctrl+C，结束扫描");
                cancel.cancel();
            }
        }
    });

    eprintln!("🔍 扫描设备 ({}s)...", seconds);
    let result = lanshare.scan_devices_until(seconds, cancel).await;
    ctrl_c.abort();

    let json = result?;
    if pretty {
        let value: serde_json::Value = serde_json::from_str(&json)?;
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("{}", json);
    }
    Ok(())
}

/// 开启共享直到 Ctrl+C
pub async fn share(port: u16, root: PathBuf) -> Result<()> {
    let lanshare = LanShare::with_parts(BtleplugDiscovery::new(), ShareServer::new(root));

    let addr = lanshare.start_sharing(port).await?;
    println!("📂 共享目录: {}", lanshare.share_root().display());
    println!("🌐 WebDAV 地址: http://{}/", addr);
    println!("   按 Ctrl+C 停止共享");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;

    println!("⏹️  停止共享");
    lanshare.stop_sharing().await?;
    Ok(())
}

pub fn config(settings: &Settings, save: bool) -> Result<()> {
    print!("{}", settings.to_toml()?);
    if save {
        let path = settings.save()?;
        println!("# 已保存到 {}", path.display());
    } else {
        println!("# 配置文件: {}", Settings::config_path().display());
    }
    Ok(())
}
