//! 局域网地址解析
//!
//! 找出本机第一个可被局域网访问的 IPv4 地址（非回环），找不到时返回 `None`，
//! 调用方自行回退到 `127.0.0.1`。

use log::trace;

use pnet::datalink::{self, NetworkInterface};
use std::net::{IpAddr, Ipv4Addr};

/// 网卡在某一时刻的状态快照
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceSnapshot {
    pub name: String,
    pub is_up: bool,
    pub is_loopback: bool,
    pub addresses: Vec<IpAddr>,
}

impl From<&NetworkInterface> for InterfaceSnapshot {
    fn from(iface: &NetworkInterface) -> Self {
        Self {
            name: iface.name.clone(),
            is_up: iface.is_up(),
            is_loopback: iface.is_loopback(),
            addresses: iface.ips.iter().map(|net| net.ip()).collect(),
        }
    }
}

/// 枚举本机网卡并返回第一个可用的局域网 IPv4 地址
pub fn resolve_local_ipv4() -> Option<Ipv4Addr> {
    let snapshot: Vec<InterfaceSnapshot> = datalink::interfaces()
        .iter()
        .map(InterfaceSnapshot::from)
        .collect();
    first_lan_ipv4(&snapshot)
}

/// 按枚举顺序挑选地址：跳过未启用和回环网卡，取第一个非回环的 IPv4（含 IPv4 映射的 IPv6）
pub fn first_lan_ipv4(interfaces: &[InterfaceSnapshot]) -> Option<Ipv4Addr> {
    interfaces
        .iter()
        .filter(|iface| iface.is_up && !iface.is_loopback)
        .flat_map(|iface| {
            trace!("Inspecting interface {}: {:?}", iface.name, iface.addresses);
            iface.addresses.iter()
        })
        .find_map(|addr| as_ipv4(*addr).filter(|v4| !v4.is_loopback()))
}

fn as_ipv4(addr: IpAddr) -> Option<Ipv4Addr> {
    match addr {
        IpAddr::V4(v4) => Some(v4),
        IpAddr::V6(v6) if v6.is_loopback() => None,
        IpAddr::V6(v6) => v6.to_ipv4_mapped(),
    }
}
