//! 面向桌面端的接口
//!
//! 对扫描器和共享服务器的薄封装：扫描结果编码为 JSON 字符串，
//! 所有错误先记录日志再原样返回给上层。

use log::{error, info};

use crate::ble::{BtleplugDiscovery, Device, DiscoveryBackend, ScanCoordinator, ScanError};
use crate::share::{ShareError, ShareServer};
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// 接口层错误
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error(transparent)]
    Share(#[from] ShareError),

    #[error("Failed to encode devices: {0}")]
    Encode(#[from] serde_json::Error),
}

pub struct LanShare<B = BtleplugDiscovery> {
    scanner: ScanCoordinator<B>,
    server: ShareServer,
}

impl LanShare<BtleplugDiscovery> {
    /// 使用系统蓝牙适配器和 `<cwd>/shared` 共享目录
    pub fn new() -> Self {
        Self::with_parts(BtleplugDiscovery::new(), ShareServer::with_default_root())
    }
}

impl Default for LanShare<BtleplugDiscovery> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: DiscoveryBackend> LanShare<B> {
    pub fn with_parts(backend: B, server: ShareServer) -> Self {
        Self {
            scanner: ScanCoordinator::new(backend),
            server,
        }
    }

    /// 扫描 `seconds` 秒，返回 `[{"addr","name","rssi"}]` 形式的 JSON
    pub async fn scan_devices(&self, seconds: i64) -> Result<String, ApiError> {
        self.scan_devices_until(seconds, CancellationToken::new())
            .await
    }

    /// 同 [`Self::scan_devices`]，`cancel` 被取消时提前结束并返回已发现的设备
    pub async fn scan_devices_until(
        &self,
        seconds: i64,
        cancel: CancellationToken,
    ) -> Result<String, ApiError> {
        let devices = self
            .scanner
            .scan_until(seconds, cancel)
            .await
            .inspect_err(|e| error!("Scan failed: {}", e))?;
        let json = encode_devices(&devices).inspect_err(|e| error!("{}", e))?;
        info!("Scan result: {}", json);
        Ok(json)
    }

    /// 启动共享，返回 `host:port`
    pub async fn start_sharing(&self, port: u16) -> Result<String, ApiError> {
        self.server.start(port).await.map_err(|e| {
            error!("Failed to start sharing: {}", e);
            ApiError::from(e)
        })
    }

    pub async fn stop_sharing(&self) -> Result<(), ApiError> {
        self.server.stop().await.map_err(|e| {
            error!("Failed to stop sharing: {}", e);
            ApiError::from(e)
        })
    }

    pub async fn is_sharing(&self) -> bool {
        self.server.is_running().await
    }

    pub fn share_root(&self) -> &Path {
        self.server.root()
    }
}

fn encode_devices(devices: &[Device]) -> Result<String, ApiError> {
    Ok(serde_json::to_string(devices)?)
}
