pub mod address;

pub use address::{InterfaceSnapshot, first_lan_ipv4, resolve_local_ipv4};
