//! BLE 邻近设备发现
//!
//! - **scanner**: 有时限的扫描会话 ([`ScanCoordinator`])
//! - **central**: 基于 btleplug 的发现后端 ([`BtleplugDiscovery`])
//!
//! 底层无线协议栈通过 [`DiscoveryBackend`] / [`DiscoverySession`] 接入，
//! 扫描器本身只负责截止时间、取消和事件聚合。

pub mod central;
pub mod scanner;

pub use central::BtleplugDiscovery;
pub use scanner::{DEFAULT_SCAN_SECS, ScanCoordinator};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;

/// 一次扫描中发现的设备
///
/// JSON 字段名与桌面端约定一致: `{"addr", "name", "rssi"}`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Device {
    #[serde(rename = "addr")]
    pub address: String,
    #[serde(rename = "name")]
    pub display_name: String,
    #[serde(rename = "rssi")]
    pub signal_strength: i32,
}

/// 后端上报的一条原始广播
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub address: String,
    /// 可能为空；空名称的广播不会进入结果
    pub local_name: String,
    pub rssi: i32,
}

impl Advertisement {
    pub fn new(address: impl Into<String>, local_name: impl Into<String>, rssi: i32) -> Self {
        Self {
            address: address.into(),
            local_name: local_name.into(),
            rssi,
        }
    }
}

/// 扫描错误
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("Bluetooth adapter unavailable: {0}")]
    AdapterUnavailable(String),

    #[error("Discovery failed: {0}")]
    Discovery(String),
}

/// 发现后端返回的错误
///
/// `Cancelled` 与 `DeadlineExceeded` 是扫描的正常结束方式。
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("discovery cancelled")]
    Cancelled,

    #[error("discovery deadline exceeded")]
    DeadlineExceeded,

    #[error("adapter error: {0}")]
    Adapter(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("btleplug error: {0}")]
    Btleplug(#[from] btleplug::Error),
}

impl DiscoveryError {
    /// 是否属于截止时间/取消导致的结束
    pub fn is_interruption(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }
}

/// 发现事件的汇聚点
///
/// 可以被克隆并在任意线程中调用 [`DeviceSink::push`]；同一地址后到的事件覆盖先到的。
#[derive(Clone, Default)]
pub struct DeviceSink {
    devices: Arc<Mutex<HashMap<String, Device>>>,
}

impl DeviceSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// 处理一条广播；返回是否被收录
    pub fn push(&self, adv: Advertisement) -> bool {
        if adv.local_name.is_empty() {
            log::trace!("Ignoring unnamed advertisement from {}", adv.address);
            return false;
        }

        log::debug!(
            "Advertisement: addr={}, name='{}', rssi={}",
            adv.address,
            adv.local_name,
            adv.rssi
        );

        let device = Device {
            address: adv.address.clone(),
            display_name: adv.local_name,
            signal_strength: adv.rssi,
        };
        self.devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(adv.address, device);
        true
    }

    pub fn len(&self) -> usize {
        self.devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 取出当前收集到的全部设备（顺序不保证）
    pub fn drain(&self) -> Vec<Device> {
        let mut devices = self.devices.lock().unwrap_or_else(PoisonError::into_inner);
        devices.drain().map(|(_, device)| device).collect()
    }
}

/// 可以打开扫描会话的无线发现能力
#[async_trait::async_trait]
pub trait DiscoveryBackend: Send + Sync {
    type Session: DiscoverySession;

    /// 获取适配器；失败意味着本次扫描不可能收到任何事件
    async fn open(&self) -> Result<Self::Session, DiscoveryError>;
}

/// 一次发现会话
#[async_trait::async_trait]
pub trait DiscoverySession: Send {
    /// 开始发现，把每条广播推入 `sink`，直到 `stop` 被取消或出错
    ///
    /// 因 `stop` 结束时应返回 [`DiscoveryError::Cancelled`]（或 `Ok`）。
    async fn discover(
        &mut self,
        sink: DeviceSink,
        stop: CancellationToken,
    ) -> Result<(), DiscoveryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_event_wins() {
        let sink = DeviceSink::new();
        assert!(sink.push(Advertisement::new("A", "x", -40)));
        assert!(sink.push(Advertisement::new("A", "y", -30)));

        let devices = sink.drain();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].display_name, "y");
        assert_eq!(devices[0].signal_strength, -30);
    }

    #[test]
    fn test_unnamed_advertisement_dropped() {
        let sink = DeviceSink::new();
        assert!(!sink.push(Advertisement::new("B", "", -50)));
        assert!(sink.is_empty());
    }

    #[test]
    fn test_unnamed_event_keeps_previous_entry() {
        let sink = DeviceSink::new();
        sink.push(Advertisement::new("A", "phone", -60));
        sink.push(Advertisement::new("A", "", -20));

        let devices = sink.drain();
        assert_eq!(
            devices,
            vec![Device {
                address: "A".to_string(),
                display_name: "phone".to_string(),
                signal_strength: -60,
            }]
        );
    }

    #[test]
    fn test_concurrent_pushes() {
        let sink = DeviceSink::new();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let sink = sink.clone();
                std::thread::spawn(move || {
                    for j in 0..100 {
                        sink.push(Advertisement::new(format!("dev-{}", j % 10), "n", -i));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(sink.len(), 10);
    }

    #[test]
    fn test_device_json_field_names() {
        let device = Device {
            address: "AA:BB:CC:DD:EE:FF".to_string(),
            display_name: "Pixel".to_string(),
            signal_strength: -42,
        };
        let json = serde_json::to_string(&device).unwrap();
        assert_eq!(json, r#"{"addr":"AA:BB:CC:DD:EE:FF","name":"Pixel","rssi":-42}"#);
    }

    #[test]
    fn test_interruption_classification() {
        assert!(DiscoveryError::Cancelled.is_interruption());
        assert!(DiscoveryError::DeadlineExceeded.is_interruption());
        assert!(!DiscoveryError::Backend("boom".into()).is_interruption());
    }
}
