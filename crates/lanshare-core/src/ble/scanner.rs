//! BLE Scanner - 有时限的邻近设备扫描
//!
//! 一次扫描的流程：
//! 1. 打开发现后端（失败即 [`ScanError::AdapterUnavailable`]）
//! 2. 设置截止时间；调用方也可以通过 `CancellationToken` 提前结束
//! 3. 后端把广播推入 [`DeviceSink`]，按地址去重，后到覆盖先到
//! 4. 截止或取消视为正常结束，返回已收集的设备
//!
//! 同一个扫描器上的并发扫描会排队依次执行。

use log::{debug, error, info, warn};

use crate::ble::{Device, DeviceSink, DiscoveryBackend, DiscoverySession, ScanError};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// `seconds <= 0` 时使用的默认扫描时长
pub const DEFAULT_SCAN_SECS: i64 = 5;

pub struct ScanCoordinator<B> {
    backend: B,
    gate: Mutex<()>,
}

impl<B: DiscoveryBackend> ScanCoordinator<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            gate: Mutex::new(()),
        }
    }

    /// 扫描 `seconds` 秒
    pub async fn scan(&self, seconds: i64) -> Result<Vec<Device>, ScanError> {
        self.scan_until(seconds, CancellationToken::new()).await
    }

    /// 扫描直到截止时间或 `cancel` 被取消
    pub async fn scan_until(
        &self,
        seconds: i64,
        cancel: CancellationToken,
    ) -> Result<Vec<Device>, ScanError> {
        let timeout = normalize_duration(seconds);

        let _guard = match self.gate.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                debug!("Another scan is in progress, waiting for it to finish");
                self.gate.lock().await
            }
        };

        debug!("Opening discovery backend");
        let mut session = self.backend.open().await.map_err(|e| {
            error!("Failed to open discovery backend: {}", e);
            ScanError::AdapterUnavailable(e.to_string())
        })?;

        let stop = cancel.child_token();
        let deadline = tokio::spawn({
            let stop = stop.clone();
            async move {
                tokio::select! {
                    () = tokio::time::sleep(timeout) => {
                        debug!("Scan deadline reached");
                        stop.cancel();
                    }
                    () = stop.cancelled() => {}
                }
            }
        });

        info!("Starting BLE scan for {} seconds", timeout.as_secs());

        let sink = DeviceSink::new();
        let result = session.discover(sink.clone(), stop.clone()).await;

        stop.cancel();
        deadline.abort();

        match result {
            Ok(()) => debug!("Discovery ended"),
            Err(e) if e.is_interruption() => {
                if cancel.is_cancelled() {
                    info!("Scan cancelled by caller");
                } else {
                    debug!("Scan finished by timeout: {}", e);
                }
            }
            Err(e) => {
                warn!("Scan finished with error: {}", e);
                return Err(ScanError::Discovery(e.to_string()));
            }
        }

        let devices = sink.drain();
        info!("Scan complete: found {} unique device(s)", devices.len());
        Ok(devices)
    }
}

fn normalize_duration(seconds: i64) -> Duration {
    match u64::try_from(seconds) {
        Ok(secs) if secs > 0 => Duration::from_secs(secs),
        _ => {
            debug!(
                "Scan called with non-positive seconds={}, using default {}s",
                seconds, DEFAULT_SCAN_SECS
            );
            Duration::from_secs(DEFAULT_SCAN_SECS.unsigned_abs())
        }
    }
}
