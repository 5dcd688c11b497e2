//! LanShare Core Library
//!
//! 局域网共享的核心实现：附近 BLE 设备扫描 + 局域网文件共享服务器
//!
//! # 模块
//!
//! - **ble**: 有时限的 BLE 扫描，按地址去重
//! - **share**: 文件共享服务器的启动/停止
//! - **net**: 本机局域网 IPv4 地址解析
//! - **api**: 面向桌面端的 JSON 接口
//! - **config**: 设置持久化
//!
//! # 使用示例
//!
//! ```ignore
//! use lanshare_core::LanShare;
//!
//! let lanshare = LanShare::new();
//!
//! // 1. 扫描 5 秒
//! let json = lanshare.scan_devices(5).await?;
//!
//! // 2. 开启共享（0 表示随机端口）
//! let addr = lanshare.start_sharing(0).await?;
//! println!("http://{}/", addr);
//!
//! // 3. 关闭共享
//! lanshare.stop_sharing().await?;
//! ```

pub mod api;
pub mod ble;
pub mod config;
pub mod logging;
pub mod net;
pub mod share;

pub use api::{ApiError, LanShare};

// BLE re-exports
pub use ble::{
    Advertisement, BtleplugDiscovery, Device, DeviceSink, DiscoveryBackend, DiscoveryError,
    DiscoverySession, ScanCoordinator, ScanError,
};

// Share re-exports
pub use net::resolve_local_ipv4;
pub use share::{ServerTimeouts, ShareError, ShareProtocol, ShareServer, WebDav};

pub use config::Settings;
pub use logging::LogLevel;
