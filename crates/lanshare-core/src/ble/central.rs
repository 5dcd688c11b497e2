//! btleplug 发现后端
//!
//! 使用系统默认（第一个）蓝牙适配器做 Central 模式扫描，
//! 每次 `DeviceDiscovered` / `DeviceUpdated` 事件读取一次外设属性并上报，
//! 属性查询与停止信号竞争，停止后不再等待未完成的查询。

use log::{debug, info, trace, warn};

use crate::ble::{Advertisement, DeviceSink, DiscoveryBackend, DiscoveryError, DiscoverySession};
use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, PeripheralId};
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default, Clone, Copy)]
pub struct BtleplugDiscovery;

impl BtleplugDiscovery {
    pub fn new() -> Self {
        Self
    }
}

pub struct BtleplugSession {
    adapter: Adapter,
}

#[async_trait::async_trait]
impl DiscoveryBackend for BtleplugDiscovery {
    type Session = BtleplugSession;

    async fn open(&self) -> Result<BtleplugSession, DiscoveryError> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DiscoveryError::Adapter("No Bluetooth adapters found".to_string()))?;

        if let Ok(info) = adapter.adapter_info().await {
            debug!("Using Bluetooth adapter: {}", info);
        }
        Ok(BtleplugSession { adapter })
    }
}

#[async_trait::async_trait]
impl DiscoverySession for BtleplugSession {
    async fn discover(
        &mut self,
        sink: DeviceSink,
        stop: CancellationToken,
    ) -> Result<(), DiscoveryError> {
        let mut events = self.adapter.events().await?;
        self.adapter.start_scan(ScanFilter::default()).await?;

        let outcome = loop {
            tokio::select! {
                () = stop.cancelled() => {
                    break Err(DiscoveryError::Cancelled);
                }
                event = events.next() => {
                    match event {
                        Some(CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id)) => {
                            // 属性查询可能很慢，期间仍需响应停止信号
                            let lookup = tokio::select! {
                                () = stop.cancelled() => break Err(DiscoveryError::Cancelled),
                                lookup = self.advertisement(&id) => lookup,
                            };
                            match lookup {
                                Ok(Some(adv)) => {
                                    sink.push(adv);
                                }
                                Ok(None) => trace!("No properties for {:?}", id),
                                Err(e) => debug!("Failed to read properties of {:?}: {}", id, e),
                            }
                        }
                        Some(_) => {}
                        None => {
                            info!("Adapter event stream closed");
                            break Ok(());
                        }
                    }
                }
            }
        };

        if let Err(e) = self.adapter.stop_scan().await {
            warn!("Failed to stop BLE scan: {}", e);
        }
        outcome
    }
}

impl BtleplugSession {
    async fn advertisement(&self, id: &PeripheralId) -> Result<Option<Advertisement>, DiscoveryError> {
        let peripheral = self.adapter.peripheral(id).await?;
        let Some(props) = peripheral.properties().await? else {
            return Ok(None);
        };

        Ok(Some(Advertisement {
            address: props.address.to_string(),
            local_name: props.local_name.unwrap_or_default(),
            rssi: props.rssi.map_or(0, i32::from),
        }))
    }
}
