//! 局域网文件共享
//!
//! - **server**: 共享服务器的生命周期 ([`ShareServer`])
//! - **deadline**: 连接级的写超时与空闲超时
//!
//! 具体的文件协议由 [`ShareProtocol`] 提供，默认实现 [`WebDav`]
//! 把共享目录以可读写的 WebDAV 树挂载在 `/` 下
//! （PROPFIND / GET / PUT / MKCOL / DELETE / MOVE / COPY / LOCK）。

mod deadline;
pub mod server;

pub use server::ShareServer;

use axum::Router;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::response::Response;
use dav_server::DavHandler;
use dav_server::localfs::LocalFs;
use dav_server::memls::MemLs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 默认共享目录名（位于当前工作目录下）
pub const DEFAULT_SHARE_DIR: &str = "shared";

/// 停止服务器时等待连接结束的宽限期
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// 共享服务器错误
#[derive(Debug, thiserror::Error)]
pub enum ShareError {
    #[error("Share server already running")]
    AlreadyRunning,

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("Graceful shutdown failed: {0}")]
    Shutdown(String),
}

/// 服务器的超时设置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerTimeouts {
    /// 请求头和请求体各自必须在此时间内读完
    pub read: Duration,
    /// 处理器必须在此时间内给出响应；响应写出时单次写阻塞也不得超过此时间
    pub write: Duration,
    /// 连接上没有任何收发的最长时间（keep-alive 等待下一个请求）
    pub idle: Duration,
}

impl Default for ServerTimeouts {
    fn default() -> Self {
        Self {
            read: Duration::from_secs(5),
            write: Duration::from_secs(30),
            idle: Duration::from_secs(60),
        }
    }
}

/// 文件协议引擎：给定根目录，构造处理请求的路由
pub trait ShareProtocol: Send + Sync {
    fn router(&self, root: &Path) -> Router;
}

/// 可读写的 WebDAV 共享：本地文件系统 + 内存锁表
///
/// 每次 `router` 调用都会新建锁表，重启服务器后旧的锁不再有效。
#[derive(Debug, Default, Clone, Copy)]
pub struct WebDav;

impl ShareProtocol for WebDav {
    fn router(&self, root: &Path) -> Router {
        let dav = DavHandler::builder()
            .filesystem(LocalFs::new(root, false, false, false))
            .locksystem(MemLs::new())
            .build_handler();

        Router::new().fallback(serve_dav).with_state(dav)
    }
}

async fn serve_dav(State(dav): State<DavHandler>, request: Request) -> Response {
    dav.handle(request).await.map(Body::new)
}

/// `<cwd>/shared`；无法获取当前目录时退回到 `./shared`
pub fn default_share_root() -> PathBuf {
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(DEFAULT_SHARE_DIR)
}
